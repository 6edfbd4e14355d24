//! The instruction dispatch loop (spec §4.8 "VM Executor (C8)").
//!
//! Grounded on the overall shape of `luars::lua_vm::execute::mod` (single
//! `match` over the opcode, frame held by index rather than recursion) but
//! reorganized: metamethod dispatch for arithmetic/compare/index/concat
//! goes through the same [`call::perform_call`] primitive as an ordinary
//! `CALL`, so a Lua-written metamethod gets the same non-recursive
//! trampoline and the same yield-ability as any other call (see
//! `call.rs`'s module doc).

pub mod arith;
pub mod call;
pub mod compare;
pub mod loop_ops;
pub mod table_ops;

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::{LuaClosure, Upvalue, Value};
use crate::vm::coroutine::Coroutine;
use crate::vm::debug_hook::should_fire_line_hook;
use crate::vm::error::{ControlFlow, ErrorKind, LuaError, LuaResult};
use crate::vm::frame::{ToBeClosed, MULTRET};
use crate::vm::instruction::{self, Rk};
use crate::vm::metamethod;
use crate::vm::opcode::OpCode;
use crate::vm::state::Interpreter;

use arith::ArithOp;
use call::{perform_call, CallOutcome};

enum StepOutcome {
    Continue,
    /// A frame just finished (normally or via a close-sequence), carrying
    /// its results and the frame depth observed right after.
    Returned { depth_after: usize, results: Vec<Value> },
}

impl Interpreter {
    /// Runs `co` until its frame stack depth drops to `floor` (inclusive),
    /// returning the results of the call that brought it there. Top-level
    /// execution calls this with `floor = 0`; a native function that needs
    /// to call back into Lua (e.g. `pcall`) calls it with
    /// `floor = depth_before_pushing_the_call`.
    pub fn run_until(&mut self, co: &Rc<RefCell<Coroutine>>, floor: usize) -> LuaResult<Vec<Value>> {
        loop {
            match self.step(co) {
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::Returned { depth_after, results }) => {
                    if depth_after <= floor {
                        return Ok(results);
                    }
                }
                // An error raised while executing a pushed `__close` handler
                // frame doesn't propagate immediately: it's captured and
                // chained into the owning `PendingClose` (spec §4.9 "any
                // exception from a close call is captured; subsequent
                // `__close` calls receive that captured error").
                Err(ControlFlow::Error(e)) if self.top_frame_is_close_handler(co) => {
                    let mut pending = {
                        let mut c = co.borrow_mut();
                        let mut frame = c.frames.pop().expect("close-handler frame present");
                        frame.close_all_upvalues();
                        c.pending_closes.pop().ok_or_else(|| {
                            ControlFlow::Error(LuaError::internal("pending close sequence missing"))
                        })?
                    };
                    pending.pending_error = Some(e.error_value());
                    let results = call::drive_close_sequence(self, co, pending)?;
                    let depth_after = co.borrow().frames.len();
                    if depth_after <= floor {
                        return Ok(results);
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn top_frame_is_close_handler(&self, co: &Rc<RefCell<Coroutine>>) -> bool {
        co.borrow().frames.last().map(|f| f.is_close_handler).unwrap_or(false)
    }

    fn step(&mut self, co: &Rc<RefCell<Coroutine>>) -> LuaResult<StepOutcome> {
        let (instr, pc, proto, base) = {
            let c = co.borrow();
            let frame = c.frames.last().expect("step called with an empty frame stack");
            let proto = frame.proto().clone();
            let pc = frame.pc;
            let instr = *proto
                .instructions
                .get(pc as usize)
                .ok_or_else(|| ControlFlow::Error(LuaError::internal("pc out of range")))?;
            (instr, pc, proto, frame.base)
        };

        self.fire_line_hook(co, &proto, pc);

        let op = instruction::opcode_of(instr);
        let a = instruction::a_of(instr) as u8;
        let b = instruction::b_of(instr);
        let c_field = instruction::c_of(instr);
        let opcode = OpCode::from_u8(op).ok_or_else(|| ControlFlow::Error(LuaError::internal("bad opcode")))?;

        // Default: advance past this instruction. Control-flow opcodes
        // override `next_pc` themselves.
        let mut next_pc = pc + 1;

        macro_rules! reg {
            ($r:expr) => {
                co.borrow().frames.last().unwrap().get_reg($r)
            };
        }
        macro_rules! set_reg {
            ($r:expr, $v:expr) => {
                co.borrow().frames.last().unwrap().set_reg($r, $v)
            };
        }
        macro_rules! konst {
            ($i:expr) => {
                proto.constants[$i as usize].clone()
            };
        }
        macro_rules! rk {
            ($operand:expr) => {
                match instruction::decode_rk($operand, proto.constants.len()) {
                    Rk::Register(r) => reg!(r),
                    Rk::Constant(k) => konst!(k),
                }
            };
        }

        match opcode {
            OpCode::Move => set_reg!(a, reg!(b as u8)),
            OpCode::LoadK => set_reg!(a, konst!(b)),
            OpCode::LoadI => set_reg!(a, Value::Integer(b as i32 as i64)),
            OpCode::LoadBool => {
                set_reg!(a, Value::Bool(b != 0));
                if c_field != 0 {
                    next_pc += 1;
                }
            }
            OpCode::LoadNil => {
                for r in a..=(b as u8) {
                    set_reg!(r, Value::Nil);
                }
            }
            OpCode::GetGlobal => {
                let name = konst!(b);
                let name = name.as_str().unwrap_or_default();
                set_reg!(a, self.get_global(name));
            }
            OpCode::SetGlobal => {
                let name = konst!(b);
                let name = name.as_str().unwrap_or_default().to_string();
                self.set_global(&name, reg!(a));
            }
            OpCode::GetUpval => {
                let v = co.borrow().frames.last().unwrap().closure.as_ref().unwrap().upvalues[b as usize]
                    .borrow()
                    .get();
                set_reg!(a, v);
            }
            OpCode::SetUpval => {
                let v = reg!(a);
                co.borrow().frames.last().unwrap().closure.as_ref().unwrap().upvalues[b as usize]
                    .borrow_mut()
                    .set(v);
            }
            OpCode::GetTable => {
                let t = reg!(a);
                let key = rk!(b);
                let v = self.index_value(co, base, t, key)?;
                match v {
                    None => return Ok(StepOutcome::Continue),
                    Some(v) => set_reg!(a, v),
                }
            }
            OpCode::SetTable => {
                let t = reg!(a);
                let key = rk!(b);
                let value = rk!(c_field);
                if self.newindex_value(co, base, t, key, value)? {
                    return Ok(StepOutcome::Continue);
                }
            }
            OpCode::SelfOp => {
                let recv = reg!(b as u8);
                set_reg!(a + 1, recv.clone());
                let key = rk!(c_field);
                let v = self.index_value(co, base, recv, key)?;
                match v {
                    None => return Ok(StepOutcome::Continue),
                    Some(v) => set_reg!(a, v),
                }
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow
            | OpCode::IDiv | OpCode::Band | OpCode::Bor | OpCode::Bxor | OpCode::Shl | OpCode::Shr => {
                let lhs = rk!(b);
                let rhs = rk!(c_field);
                let op = arith_op_of(opcode);
                match arith::try_numeric(op, &lhs, &rhs)? {
                    Some(v) => set_reg!(a, v),
                    None => {
                        let mm_name = arith::arith_metamethod_name(op);
                        match metamethod::lookup_binary(&lhs, &rhs, mm_name) {
                            Some(handler) => {
                                {
                                    co.borrow().frames.last().unwrap();
                                }
                                self.set_pc(co, next_pc);
                                match perform_call(self, co, handler, vec![lhs, rhs], a, 1)? {
                                    CallOutcome::Immediate(mut results) => {
                                        set_reg!(a, results.pop().unwrap_or(Value::Nil));
                                        return Ok(StepOutcome::Continue);
                                    }
                                    CallOutcome::Pushed => return Ok(StepOutcome::Continue),
                                }
                            }
                            None => return Err(arith::arith_type_error(&lhs, &rhs)),
                        }
                    }
                }
            }
            OpCode::Unm => {
                let v = reg!(b as u8);
                match arith::unary_minus(&v)? {
                    Some(r) => set_reg!(a, r),
                    None => match metamethod::lookup(&v, metamethod::MM_UNM) {
                        Some(handler) => {
                            self.set_pc(co, next_pc);
                            match perform_call(self, co, handler, vec![v.clone(), v], a, 1)? {
                                CallOutcome::Immediate(mut results) => {
                                    set_reg!(a, results.pop().unwrap_or(Value::Nil));
                                    return Ok(StepOutcome::Continue);
                                }
                                CallOutcome::Pushed => return Ok(StepOutcome::Continue),
                            }
                        }
                        None => {
                            return Err(ControlFlow::Error(LuaError::type_error(
                                "perform arithmetic on",
                                v.type_name(),
                                None,
                            )))
                        }
                    },
                }
            }
            OpCode::Bnot => {
                let v = reg!(b as u8);
                match arith::bitwise_not(&v)? {
                    Some(r) => set_reg!(a, r),
                    None => {
                        return Err(ControlFlow::Error(LuaError::type_error(
                            "perform bitwise operation on",
                            v.type_name(),
                            None,
                        )))
                    }
                }
            }
            OpCode::Not => {
                let v = reg!(b as u8);
                set_reg!(a, Value::Bool(!v.truthy()));
            }
            OpCode::Len => {
                let v = reg!(b as u8);
                match arith::raw_length(&v) {
                    Some(n) => set_reg!(a, Value::Integer(n)),
                    None => match metamethod::lookup(&v, metamethod::MM_LEN) {
                        Some(handler) => {
                            self.set_pc(co, next_pc);
                            match perform_call(self, co, handler, vec![v.clone()], a, 1)? {
                                CallOutcome::Immediate(mut results) => {
                                    set_reg!(a, results.pop().unwrap_or(Value::Nil));
                                    return Ok(StepOutcome::Continue);
                                }
                                CallOutcome::Pushed => return Ok(StepOutcome::Continue),
                            }
                        }
                        None => {
                            return Err(ControlFlow::Error(LuaError::type_error("get length of", v.type_name(), None)))
                        }
                    },
                }
            }
            OpCode::Concat => {
                let from = b as u8;
                let to = c_field as u8;
                let mut pieces = Vec::new();
                let mut ok = true;
                for r in from..=to {
                    let v = reg!(r);
                    match arith::concat_coerce(&v) {
                        Some(s) => pieces.push(s),
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                if ok {
                    set_reg!(a, self.intern(&pieces.concat()));
                } else {
                    // Simplification: concat metamethods combine only the
                    // first non-coercible pair rather than folding the
                    // whole RK range; sufficient for the common 2-operand
                    // case this spec's CONCAT normally compiles to.
                    let lhs = reg!(from);
                    let rhs = reg!(to);
                    match metamethod::lookup_binary(&lhs, &rhs, metamethod::MM_CONCAT) {
                        Some(handler) => {
                            self.set_pc(co, next_pc);
                            match perform_call(self, co, handler, vec![lhs, rhs], a, 1)? {
                                CallOutcome::Immediate(mut results) => {
                                    set_reg!(a, results.pop().unwrap_or(Value::Nil));
                                    return Ok(StepOutcome::Continue);
                                }
                                CallOutcome::Pushed => return Ok(StepOutcome::Continue),
                            }
                        }
                        None => {
                            let offender = if arith::concat_coerce(&lhs).is_none() { &lhs } else { &rhs };
                            return Err(ControlFlow::Error(LuaError::type_error(
                                "concatenate",
                                offender.type_name(),
                                None,
                            )));
                        }
                    }
                }
            }
            OpCode::Eq => {
                let lhs = rk!(b);
                let rhs = rk!(c_field);
                let raw = compare::raw_eq(&lhs, &rhs);
                if raw {
                    if a != 0 {
                        next_pc += 1;
                    }
                } else {
                    match metamethod::eq_metamethod(&lhs, &rhs) {
                        Some(handler) => {
                            self.set_pc(co, next_pc);
                            match perform_call(self, co, handler, vec![lhs, rhs], 255, 1)? {
                                CallOutcome::Immediate(results) => {
                                    let truthy = results.first().map(|v| v.truthy()).unwrap_or(false);
                                    if truthy != (a != 0) {
                                        self.bump_pc(co, 1);
                                    }
                                    return Ok(StepOutcome::Continue);
                                }
                                CallOutcome::Pushed => return Ok(StepOutcome::Continue),
                            }
                        }
                        None if a != 0 => {}
                        None => next_pc += 1,
                    }
                }
            }
            OpCode::Lt | OpCode::Le => {
                let lhs = rk!(b);
                let rhs = rk!(c_field);
                let raw = if opcode == OpCode::Lt { compare::raw_lt(&lhs, &rhs) } else { compare::raw_le(&lhs, &rhs) };
                match raw {
                    Some(result) => {
                        if result != (a != 0) {
                            next_pc += 1;
                        }
                    }
                    None => {
                        let mm_name = if opcode == OpCode::Lt { compare::MM_LT } else { compare::MM_LE };
                        match metamethod::lookup_binary(&lhs, &rhs, mm_name) {
                            Some(handler) => {
                                self.set_pc(co, next_pc);
                                match perform_call(self, co, handler, vec![lhs, rhs], 255, 1)? {
                                    CallOutcome::Immediate(results) => {
                                        let truthy = results.first().map(|v| v.truthy()).unwrap_or(false);
                                        if truthy != (a != 0) {
                                            self.bump_pc(co, 1);
                                        }
                                        return Ok(StepOutcome::Continue);
                                    }
                                    CallOutcome::Pushed => return Ok(StepOutcome::Continue),
                                }
                            }
                            None => return Err(compare::compare_type_error(&lhs, &rhs)),
                        }
                    }
                }
            }
            OpCode::Test => {
                let v = reg!(a);
                if v.truthy() != (c_field != 0) {
                    next_pc += 1;
                }
            }
            OpCode::TestSet => {
                let v = reg!(b as u8);
                if v.truthy() == (c_field != 0) {
                    set_reg!(a, v);
                } else {
                    next_pc += 1;
                }
            }
            OpCode::Jmp => {
                next_pc = (pc as i64 + 1 + instruction::sbx_of(instr) as i64) as u32;
            }
            OpCode::Call => {
                let func = reg!(a);
                let nargs = if b == 0 { (co.borrow().frames.last().unwrap().top - (base + a as usize + 1)) } else { b as usize - 1 };
                let args = (0..nargs).map(|i| reg!(a + 1 + i as u8)).collect::<Vec<_>>();
                let nresults = if c_field == 0 { MULTRET } else { c_field as i32 - 1 };
                self.set_pc(co, next_pc);
                match perform_call(self, co, func, args, a, nresults)? {
                    CallOutcome::Immediate(results) => {
                        self.store_call_results(co, a, &results, nresults);
                        return Ok(StepOutcome::Continue);
                    }
                    CallOutcome::Pushed => return Ok(StepOutcome::Continue),
                }
            }
            OpCode::TailCall => {
                let func = reg!(a);
                let nargs = if b == 0 { (co.borrow().frames.last().unwrap().top - (base + a as usize + 1)) } else { b as usize - 1 };
                let args = (0..nargs).map(|i| reg!(a + 1 + i as u8)).collect::<Vec<_>>();
                // Close this frame's own upvalues before it vanishes (spec
                // §4.8 "Tail call": "the open upvalues are closed first").
                {
                    let mut c = co.borrow_mut();
                    c.frames.last_mut().unwrap().close_all_upvalues();
                }
                return self.do_tail_call(co, func, args);
            }
            OpCode::Return => {
                let count = if b == 0 {
                    co.borrow().frames.last().unwrap().top - (base + a as usize)
                } else {
                    b as usize - 1
                };
                let results: Vec<Value> = (0..count).map(|i| reg!(a + i as u8)).collect();
                return self.do_return(co, results);
            }
            OpCode::ForPrep => {
                let init = reg!(a);
                let limit = reg!(a + 1);
                let step = reg!(a + 2);
                match loop_ops::for_prep(&init, &limit, &step)? {
                    Some(state) => {
                        set_reg!(a + 3, state.current_value());
                        self.store_for_state(co, a, state);
                    }
                    None => next_pc = (pc as i64 + 1 + instruction::sbx_of(instr) as i64) as u32,
                }
            }
            OpCode::ForLoop => {
                let state = self.take_for_state(co, a).ok_or_else(|| ControlFlow::Error(LuaError::internal("FORLOOP without matching FORPREP state")))?;
                let (_current, advanced) = loop_ops::for_loop(&state);
                match advanced {
                    Some(next_state) => {
                        set_reg!(a + 3, next_state.current_value());
                        self.store_for_state(co, a, next_state);
                        next_pc = (pc as i64 + 1 + instruction::sbx_of(instr) as i64) as u32;
                        // Iteration line events always fire at the back edge
                        // (spec §4.11 "Iteration ... unconditional").
                    }
                    None => {}
                }
            }
            OpCode::TForCall => {
                let f = reg!(a);
                let s = reg!(a + 1);
                let ctrl = reg!(a + 2);
                let nvars = c_field as usize;
                self.set_pc(co, next_pc);
                match perform_call(self, co, f, vec![s, ctrl], a + 3, nvars as i32)? {
                    CallOutcome::Immediate(results) => {
                        self.store_call_results(co, a + 3, &results, nvars as i32);
                        return Ok(StepOutcome::Continue);
                    }
                    CallOutcome::Pushed => return Ok(StepOutcome::Continue),
                }
            }
            OpCode::TForLoop => {
                let first = reg!(a + 3);
                if !first.is_nil() {
                    set_reg!(a + 2, first);
                    next_pc = (pc as i64 + 1 + instruction::sbx_of(instr) as i64) as u32;
                }
            }
            OpCode::Closure => {
                let nested = proto.nested[b as usize].clone();
                let mut upvalues = Vec::with_capacity(nested.upvalues.len());
                for desc in &nested.upvalues {
                    let uv = if desc.in_stack {
                        let mut c = co.borrow_mut();
                        c.frames.last_mut().unwrap().open_upvalue(desc.index)
                    } else {
                        co.borrow().frames.last().unwrap().closure.as_ref().unwrap().upvalues[desc.index as usize].clone()
                    };
                    upvalues.push(uv);
                }
                let closure = Rc::new(LuaClosure::new(nested, upvalues));
                set_reg!(a, Value::Function(closure));
            }
            OpCode::Close => {
                let mode = b;
                match mode {
                    0 => {
                        co.borrow_mut().frames.last_mut().unwrap().close_upvalues_from(a);
                    }
                    1 => {
                        let v = reg!(a);
                        co.borrow_mut().frames.last_mut().unwrap().to_be_closed.push(ToBeClosed { register: a, value: v });
                    }
                    2 => {
                        let tbcs: Vec<ToBeClosed> = {
                            let mut c = co.borrow_mut();
                            let frame = c.frames.last_mut().unwrap();
                            let mut keep = Vec::new();
                            let mut close_now = Vec::new();
                            for tbc in frame.to_be_closed.drain(..) {
                                if tbc.register >= a {
                                    close_now.push(tbc);
                                } else {
                                    keep.push(tbc);
                                }
                            }
                            frame.to_be_closed = keep;
                            frame.close_upvalues_from(a);
                            close_now
                        };
                        self.set_pc(co, next_pc);
                        let results = call::start_close_sequence(self, co, tbcs, Vec::new(), 0, 0)?;
                        let _ = results;
                        return Ok(StepOutcome::Continue);
                    }
                    _ => return Err(ControlFlow::Error(LuaError::internal("bad CLOSE mode"))),
                }
            }
            OpCode::Vararg => {
                let count = c_field;
                let varargs = co.borrow().frames.last().unwrap().varargs.clone();
                if count == 0 {
                    for (i, v) in varargs.into_iter().enumerate() {
                        set_reg!(a + i as u8, v);
                    }
                } else {
                    for i in 0..(count as usize - 1) {
                        set_reg!(a + i as u8, varargs.get(i).cloned().unwrap_or(Value::Nil));
                    }
                }
            }
            OpCode::NewTable => {
                set_reg!(a, Value::new_table());
            }
            OpCode::SetList => {
                let count = b as usize;
                let values: Vec<Value> = (1..=count).map(|i| reg!(a + i as u8)).collect();
                let t = reg!(a);
                if let Some(t) = t.as_table() {
                    t.borrow_mut().append_array(values);
                }
            }
        }

        self.set_pc(co, next_pc);
        Ok(StepOutcome::Continue)
    }

    fn set_pc(&self, co: &Rc<RefCell<Coroutine>>, pc: u32) {
        co.borrow_mut().frames.last_mut().unwrap().pc = pc;
    }

    fn bump_pc(&self, co: &Rc<RefCell<Coroutine>>, delta: u32) {
        co.borrow_mut().frames.last_mut().unwrap().pc += delta;
    }

    fn fire_line_hook(&mut self, co: &Rc<RefCell<Coroutine>>, proto: &crate::value::Proto, pc: u32) {
        let has_hook = self.hook_state(co).map(|h| h.mask.contains(crate::vm::debug_hook::HookMask::LINE)).unwrap_or(false);
        if !has_hook {
            return;
        }
        let last_line = co.borrow().frames.last().unwrap().last_line;
        let events = proto.events_at(pc).map(|e| (e.line, e.kind));
        if let Some(line) = should_fire_line_hook(events, last_line) {
            co.borrow_mut().frames.last_mut().unwrap().last_line = line as i64;
            self.debug_log(&format!("line hook: {}:{}", proto.source, line));
        }
    }

    fn index_value(&mut self, co: &Rc<RefCell<Coroutine>>, _base: usize, target: Value, key: Value) -> LuaResult<Option<Value>> {
        match table_ops::index_full(target, &key)? {
            table_ops::IndexResolution::Value(v) => Ok(Some(v)),
            table_ops::IndexResolution::Call(handler) => {
                let pc = co.borrow().frames.last().unwrap().pc;
                self.set_pc(co, pc);
                match perform_call(self, co, handler, vec![Value::Nil, key], 255, 1)? {
                    CallOutcome::Immediate(mut results) => Ok(Some(results.pop().unwrap_or(Value::Nil))),
                    CallOutcome::Pushed => Ok(None),
                }
            }
        }
    }

    fn newindex_value(&mut self, co: &Rc<RefCell<Coroutine>>, _base: usize, target: Value, key: Value, value: Value) -> LuaResult<bool> {
        match table_ops::newindex_step(&target, &key, value.clone())? {
            table_ops::NewIndexStep::Done => Ok(false),
            table_ops::NewIndexStep::Chain(_) => Ok(false),
            table_ops::NewIndexStep::CallHandler(handler) => {
                match perform_call(self, co, handler, vec![target, key, value], 255, 0)? {
                    CallOutcome::Immediate(_) => Ok(false),
                    CallOutcome::Pushed => Ok(true),
                }
            }
        }
    }

    fn store_call_results(&self, co: &Rc<RefCell<Coroutine>>, result_reg: u8, results: &[Value], nresults: i32) {
        let mut c = co.borrow_mut();
        let frame = c.frames.last_mut().unwrap();
        if nresults == MULTRET {
            for (i, v) in results.iter().enumerate() {
                frame.set_reg(result_reg + i as u8, v.clone());
            }
            frame.top = frame.base + result_reg as usize + results.len();
        } else {
            for i in 0..nresults as usize {
                frame.set_reg(result_reg + i as u8, results.get(i).cloned().unwrap_or(Value::Nil));
            }
        }
    }

    /// `FORPREP`/`FORLOOP` control state doesn't fit in a plain `Value`
    /// register (it carries the int-vs-float mode decision), so it's kept
    /// in a side table on the frame keyed by the loop's base register
    /// rather than re-deriving it from `R[a..a+3]` every iteration (which
    /// would lose the original int/float classification once the loop
    /// counter is re-read as a `Value`).
    fn store_for_state(&self, co: &Rc<RefCell<Coroutine>>, base_reg: u8, state: loop_ops::ForState) {
        let mut c = co.borrow_mut();
        c.frames.last_mut().unwrap().for_states.insert(base_reg, state);
    }

    fn take_for_state(&self, co: &Rc<RefCell<Coroutine>>, base_reg: u8) -> Option<loop_ops::ForState> {
        co.borrow_mut().frames.last_mut().unwrap().for_states.remove(&base_reg)
    }

    fn do_tail_call(&mut self, co: &Rc<RefCell<Coroutine>>, func: Value, args: Vec<Value>) -> LuaResult<StepOutcome> {
        let (result_reg, num_results_wanted) = {
            let c = co.borrow();
            let frame = c.frames.last().unwrap();
            (frame.result_reg, frame.num_results_wanted)
        };
        match perform_call(self, co, func, args, result_reg, num_results_wanted)? {
            CallOutcome::Immediate(results) => {
                let depth = {
                    let mut c = co.borrow_mut();
                    let popped = c.frames.pop().unwrap();
                    let base = popped.base;
                    c.registers.borrow_mut().truncate(base);
                    c.frames.len()
                };
                self.finish_popped_frame(co, depth, results, result_reg, num_results_wanted)
            }
            CallOutcome::Pushed => {
                // Replace-in-place: drop the frame *below* the one we just
                // pushed for the tail callee.
                let mut c = co.borrow_mut();
                let callee = c.frames.pop().unwrap();
                c.frames.pop();
                c.frames.push(callee);
                drop(c);
                Ok(StepOutcome::Continue)
            }
        }
    }

    fn do_return(&mut self, co: &Rc<RefCell<Coroutine>>, results: Vec<Value>) -> LuaResult<StepOutcome> {
        let (is_close_handler, tbcs, result_reg, num_results_wanted, depth_after) = {
            let mut c = co.borrow_mut();
            let mut frame = c.frames.pop().unwrap();
            let tbcs = std::mem::take(&mut frame.to_be_closed);
            frame.close_all_upvalues();
            let base = frame.base;
            let is_close_handler = frame.is_close_handler;
            let result_reg = frame.result_reg;
            let num_results_wanted = frame.num_results_wanted;
            // The frame's results were already read out of its registers
            // before RETURN dispatched here, so its slice of the shared
            // register stack can be reclaimed now (otherwise every CALL
            // leaks register-stack space for the coroutine's lifetime).
            c.registers.borrow_mut().truncate(base);
            (is_close_handler, tbcs, result_reg, num_results_wanted, c.frames.len())
        };
        // A `__close` handler's own return values are discarded; finishing
        // it resumes whatever `PendingClose` sequence pushed it (spec §4.10
        // "when the continuation returns the owner segment(s) continue
        // closing the remaining TBC entries and then execute the pending
        // `RETURN`").
        if is_close_handler {
            let pending = co
                .borrow_mut()
                .pending_closes
                .pop()
                .ok_or_else(|| ControlFlow::Error(LuaError::internal("pending close sequence missing")))?;
            let final_results = call::drive_close_sequence(self, co, pending)?;
            return Ok(StepOutcome::Returned { depth_after: co.borrow().frames.len(), results: final_results });
        }
        if tbcs.is_empty() {
            self.finish_popped_frame(co, depth_after, results, result_reg, num_results_wanted)
        } else {
            let final_results = call::start_close_sequence(self, co, tbcs, results, result_reg, num_results_wanted)?;
            Ok(StepOutcome::Returned { depth_after: co.borrow().frames.len(), results: final_results })
        }
    }

    fn finish_popped_frame(
        &mut self,
        co: &Rc<RefCell<Coroutine>>,
        depth_after: usize,
        results: Vec<Value>,
        result_reg: u8,
        num_results_wanted: i32,
    ) -> LuaResult<StepOutcome> {
        let final_results = call::finalize_results(results, result_reg, num_results_wanted);
        if depth_after > 0 {
            self.store_call_results(co, result_reg, &final_results, num_results_wanted);
        }
        Ok(StepOutcome::Returned { depth_after, results: final_results })
    }
}

fn arith_op_of(opcode: OpCode) -> ArithOp {
    match opcode {
        OpCode::Add => ArithOp::Add,
        OpCode::Sub => ArithOp::Sub,
        OpCode::Mul => ArithOp::Mul,
        OpCode::Div => ArithOp::Div,
        OpCode::Mod => ArithOp::Mod,
        OpCode::Pow => ArithOp::Pow,
        OpCode::IDiv => ArithOp::IDiv,
        OpCode::Band => ArithOp::Band,
        OpCode::Bor => ArithOp::Bor,
        OpCode::Bxor => ArithOp::Bxor,
        OpCode::Shl => ArithOp::Shl,
        OpCode::Shr => ArithOp::Shr,
        _ => unreachable!("not an arithmetic opcode"),
    }
}
