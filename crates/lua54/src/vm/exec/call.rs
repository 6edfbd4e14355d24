//! Call dispatch, the non-recursive trampoline, and `RETURN`'s `__close`
//! sequencing (spec §4.8 "Call dispatch"/"Tail call"/"RETURN", §4.9
//! "`__close` error chaining", §4.10 "Yield inside `__close`").
//!
//! Grounded on `luars::lua_vm::execute::call` for the push-frame-don't-
//! recurse shape, and `execute::return_handler` for `RETURN`'s shape — both
//! re-expressed so that a `__close` call is itself just another pushed
//! frame rather than a nested native Rust call, which is what lets a
//! `yield` inside `__close` survive: the main dispatch loop never recurses
//! into Rust for *any* Lua-level call, `__close` included.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::{LuaClosure, Value};
use crate::vm::coroutine::{Coroutine, PendingClose};
use crate::vm::error::{ControlFlow, ErrorKind, LuaError, LuaResult};
use crate::vm::frame::{CallFrame, MULTRET};
use crate::vm::metamethod::{self, MM_CALL, MM_CLOSE};
use crate::vm::state::Interpreter;

pub enum Callee {
    Lua(Rc<LuaClosure>),
    Native(Rc<crate::vm::state::NativeFn>),
}

/// Resolves `target` to something directly callable, walking `__call`
/// metamethods and accumulating their receivers as leading arguments (spec
/// §4.8 "Resolve the callee ... walk `__call` metamethods, accumulating the
/// metamethod receivers as leading arguments").
pub fn resolve_callee(mut target: Value, args: &mut Vec<Value>) -> LuaResult<Callee> {
    const MAX_CALL_CHAIN: u32 = 100;
    for _ in 0..MAX_CALL_CHAIN {
        match target {
            Value::Function(c) => return Ok(Callee::Lua(c)),
            Value::Native(f) => return Ok(Callee::Native(f)),
            other => match metamethod::lookup(&other, MM_CALL) {
                Some(handler) => {
                    args.insert(0, other);
                    target = handler;
                }
                None => {
                    return Err(ControlFlow::Error(LuaError::type_error("call", other.type_name(), None)));
                }
            },
        }
    }
    Err(ControlFlow::Error(LuaError::internal("'__call' chain too long; possible loop")))
}

/// Pushes a new Lua frame for `closure` onto `co`'s frame stack, ready for
/// the main dispatch loop to resume at `pc = 0` (spec §4.8 point 3:
/// "trampoline: push a new `ExecutionFrame`... resume the dispatch loop at
/// PC 0 of that frame").
pub fn push_lua_call(
    co: &mut Coroutine,
    closure: Rc<LuaClosure>,
    args: Vec<Value>,
    result_reg: u8,
    num_results_wanted: i32,
    is_tail: bool,
) {
    let proto = closure.proto.clone();
    let nparams = proto.num_params as usize;
    let stack_needed = proto.max_stack_size as usize;

    let base = {
        let mut regs = co.registers.borrow_mut();
        let base = regs.len();
        regs.resize(base + stack_needed.max(nparams + 1), Value::Nil);
        base
    };

    let varargs = if proto.is_vararg && args.len() > nparams {
        args[nparams..].to_vec()
    } else {
        Vec::new()
    };

    {
        let mut regs = co.registers.borrow_mut();
        for (i, arg) in args.into_iter().take(nparams).enumerate() {
            regs[base + i] = arg;
        }
    }

    let mut frame = CallFrame::new_lua(closure, co.registers.clone(), base, varargs, result_reg, num_results_wanted);
    frame.is_tail_call = is_tail;
    co.frames.push(frame);
}

/// Calls a native function directly (no trampoline needed — it's a plain
/// Rust call). Per spec §4.10 "Native boundary", a `yield` attempted while
/// `native_call_depth > 0` is rejected; the depth counter brackets this
/// call.
pub fn call_native(
    interp: &mut Interpreter,
    co: &Rc<RefCell<Coroutine>>,
    native: &crate::vm::state::NativeFn,
    args: &[Value],
) -> LuaResult<Vec<Value>> {
    co.borrow_mut().native_call_depth += 1;
    let result = (native.func)(interp, args);
    co.borrow_mut().native_call_depth -= 1;
    result.map_err(|e| tag_native_name(e, native.name))
}

fn tag_native_name(err: ControlFlow, _name: &str) -> ControlFlow {
    err
}

/// Invokes the `__close` handler for `value` with `(value, err_arg)`,
/// returning the handler's outcome directly when it's a native function
/// (which can't suspend) or pushing it as a trampolined frame when it's a
/// Lua closure (continuing the flat dispatch loop on resume).
pub enum CloseInvocation {
    /// The close call ran to completion inline (native, or no handler).
    Done(Option<LuaError>),
    /// A Lua-closure `__close` handler was pushed; the main loop must keep
    /// running before this close sequence can continue.
    Pushed,
}

pub fn invoke_close_handler(
    interp: &mut Interpreter,
    co: &Rc<RefCell<Coroutine>>,
    value: &Value,
    err_arg: Value,
) -> LuaResult<CloseInvocation> {
    let handler = match metamethod::lookup(value, MM_CLOSE) {
        Some(h) => h,
        None => return Ok(CloseInvocation::Done(None)),
    };
    let args = vec![value.clone(), err_arg];
    match handler {
        Value::Native(native) => match call_native(interp, co, &native, &args) {
            Ok(_) => Ok(CloseInvocation::Done(None)),
            Err(ControlFlow::Error(e)) => Ok(CloseInvocation::Done(Some(e))),
            Err(yield_signal) => Err(yield_signal),
        },
        Value::Function(closure) => {
            let mut co_mut = co.borrow_mut();
            push_lua_call(&mut co_mut, closure, args, 0, 0, false);
            co_mut.frames.last_mut().unwrap().is_close_handler = true;
            Ok(CloseInvocation::Pushed)
        }
        other => Err(ControlFlow::Error(LuaError::type_error("call", other.type_name(), None))),
    }
}

/// Begins (or resumes) the `__close` sequence for a frame that just hit
/// `RETURN` with pending TBC variables, per spec §4.8 "RETURN" point 2 and
/// §4.9's error-chaining rule (the last non-nil error observed wins).
pub fn start_close_sequence(
    interp: &mut Interpreter,
    co: &Rc<RefCell<Coroutine>>,
    remaining: Vec<crate::vm::frame::ToBeClosed>,
    captured_returns: Vec<Value>,
    result_reg: u8,
    num_results_wanted: i32,
) -> LuaResult<Vec<Value>> {
    let pending = PendingClose {
        owner_frame: co.borrow().frames.len(),
        remaining,
        captured_returns,
        pending_error: None,
        result_reg,
        num_results_wanted,
    };
    drive_close_sequence(interp, co, pending)
}

/// Advances a close sequence whose current step just finished (either it
/// ran to completion synchronously, or its pushed frame just returned).
/// Resumable across a suspend: everything the sequence needs to finish
/// lives in `pending` itself, not in the caller's local variables.
pub fn drive_close_sequence(
    interp: &mut Interpreter,
    co: &Rc<RefCell<Coroutine>>,
    mut pending: PendingClose,
) -> LuaResult<Vec<Value>> {
    loop {
        match pending.remaining.pop() {
            Some(tbc) => {
                let err_arg = pending.pending_error.clone().unwrap_or(Value::Nil);
                match invoke_close_handler(interp, co, &tbc.value, err_arg)? {
                    CloseInvocation::Done(Some(err)) => {
                        pending.pending_error = Some(err.error_value());
                    }
                    CloseInvocation::Done(None) => {}
                    CloseInvocation::Pushed => {
                        co.borrow_mut().pending_closes.push(pending);
                        return Ok(Vec::new());
                    }
                }
            }
            None => {
                if let Some(err_value) = pending.pending_error {
                    let mut err = LuaError::with_value(ErrorKind::LuaValue, format!("{err_value:?}"), err_value);
                    err.stack_frames = interp.capture_traceback(co);
                    return Err(ControlFlow::Error(err));
                }
                return Ok(finalize_results(pending.captured_returns, pending.result_reg, pending.num_results_wanted));
            }
        }
    }
}

/// Outcome of dispatching any call (ordinary `CALL`, or a metamethod
/// invoked mid-instruction for arithmetic/compare/index/concat): either it
/// already completed (native callee), or a frame was pushed and the main
/// loop must keep running before results are available.
pub enum CallOutcome {
    Immediate(Vec<Value>),
    Pushed,
}

/// The single call primitive every call site goes through — ordinary
/// `CALL`/`TAILCALL` *and* every metamethod dispatch (`__add`, `__index`,
/// `__call`, ...). Unifying them means a metamethod written in Lua gets
/// exactly the same non-recursive trampoline treatment as a normal call:
/// the pushed frame's `result_reg`/`num_results_wanted` double as "where do
/// my results go when I finish", so the opcode that triggered the
/// metamethod doesn't need any special-case resume logic.
pub fn perform_call(
    interp: &mut Interpreter,
    co: &Rc<RefCell<Coroutine>>,
    target: Value,
    mut args: Vec<Value>,
    result_reg: u8,
    num_results_wanted: i32,
) -> LuaResult<CallOutcome> {
    match resolve_callee(target, &mut args)? {
        Callee::Native(native) => match call_native(interp, co, &native, &args) {
            Ok(results) => Ok(CallOutcome::Immediate(finalize_results(results, result_reg, num_results_wanted))),
            Err(ControlFlow::Yield(values)) => {
                co.borrow_mut().pending_yield = Some((result_reg, num_results_wanted));
                Err(ControlFlow::Yield(values))
            }
            Err(other) => Err(other),
        },
        Callee::Lua(closure) => {
            let mut co_mut = co.borrow_mut();
            push_lua_call(&mut co_mut, closure, args, result_reg, num_results_wanted, false);
            Ok(CallOutcome::Pushed)
        }
    }
}

/// Truncates/pads results to what the caller asked for (spec §4.8 "store
/// results according to C: fixed count stores and nil-pads; `C=0` sets top
/// to `A + results`"), returning them for the caller's dispatch loop to
/// place into registers (when `num_results_wanted >= 0`) or pass straight
/// through (when `MULTRET`).
pub fn finalize_results(mut results: Vec<Value>, _result_reg: u8, num_results_wanted: i32) -> Vec<Value> {
    if num_results_wanted == MULTRET {
        return results;
    }
    let wanted = num_results_wanted as usize;
    results.resize(wanted, Value::Nil);
    results
}
