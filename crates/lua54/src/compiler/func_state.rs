//! Per-function compiler state: register allocator (C3), scope manager
//! (C4), and upvalue resolver (C5).
//!
//! Grounded on `luars::compiler::Compiler`'s `locals: Vec<Local>` +
//! `next_register` + `loop_stack` + `labels`/`gotos` fields, folded into one
//! struct per nested function the way the teacher keeps one `Compiler` per
//! `emmylua_parser` closure body. The teacher resolves upvalues against an
//! external CST; this one resolves them against a stack of `FuncState`s
//! directly, since there's no separate AST pass to walk afterward.

use std::collections::HashMap;

use crate::value::{Proto, UpvalueDesc, Value};
use crate::vm::error::{ErrorKind, LuaError};
use crate::vm::instruction;
use crate::vm::opcode::OpCode;

/// Hard cap on registers live at once in a single function (spec §3
/// "register index space ... a 256-register hard limit per function").
/// The compiler rejects programs that would need a 257th register rather
/// than relying on the VM's RK-operand reinterpretation for register 256
/// (that reinterpretation is a decode-time fallback for malformed/foreign
/// bytecode, not something this compiler ever intentionally emits).
pub const MAX_REGISTERS: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attrib {
    None,
    Const,
    Close,
}

pub struct LocalVar {
    pub name: String,
    pub register: u8,
    pub attrib: Attrib,
    pub start_pc: u32,
    /// Set once some nested function resolves this local as an upvalue
    /// (spec §4.7: a captured loop variable needs a fresh `Upvalue` identity
    /// each iteration, so its scope's exit must emit `CLOSE`).
    pub is_captured: bool,
}

/// One lexical block: a scope that owns a contiguous suffix of `locals`
/// and knows where `break` jumps should land.
pub struct BlockCtx {
    pub first_local: usize,
    pub first_reg: u8,
    pub is_loop: bool,
    pub break_jumps: Vec<usize>,
    /// Labels and pending gotos declared at this block's nesting depth;
    /// validated against §4.2's rules when the block closes.
    pub labels: Vec<LabelDef>,
    pub gotos: Vec<GotoUse>,
}

#[derive(Clone)]
pub struct LabelDef {
    pub name: String,
    pub pc: u32,
    pub num_active_locals: usize,
}

pub struct GotoUse {
    pub name: String,
    /// Index of the `JMP` instruction to backpatch once the label resolves.
    pub jmp_pc: usize,
    pub num_active_locals: usize,
    pub line: u32,
}

pub struct FuncState {
    pub proto: Proto,
    pub locals: Vec<LocalVar>,
    pub blocks: Vec<BlockCtx>,
    pub free_reg: u8,
    pub next_register_count: u16,
    const_map: HashMap<ConstKey, usize>,
    pub chunk_name: String,
    /// Set while compiling the condition of a `repeat ... until cond` block,
    /// since that condition is the one place a reference can see locals
    /// declared in the block it closes (spec §4.2 rule: "the `until`
    /// condition is evaluated in the scope of the loop body, including any
    /// locals declared in it").
    pub in_repeat_until_condition: bool,
}

#[derive(PartialEq, Eq, Hash)]
enum ConstKey {
    Nil,
    Bool(bool),
    Int(i64),
    /// Bit pattern, so NaN/±0.0 dedup the way `TableKey` does NOT (constants
    /// dedup by literal bit pattern, not numeric equality).
    FloatBits(u64),
    Str(String),
}

impl FuncState {
    pub fn new(source: String, chunk_name: String) -> Self {
        FuncState {
            proto: Proto::new(source),
            locals: Vec::new(),
            blocks: Vec::new(),
            free_reg: 0,
            next_register_count: 0,
            const_map: HashMap::new(),
            chunk_name,
            in_repeat_until_condition: false,
        }
    }

    // ---- register allocator (C3) ----------------------------------------

    pub fn reserve_regs(&mut self, n: u8) -> Result<u8, LuaError> {
        let base = self.free_reg;
        let needed = base as u16 + n as u16;
        if needed > MAX_REGISTERS {
            return Err(LuaError::new(ErrorKind::SyntaxError, "function or expression needs too many registers"));
        }
        self.free_reg = needed as u8;
        if needed > self.next_register_count {
            self.next_register_count = needed;
        }
        Ok(base)
    }

    pub fn reserve_one(&mut self) -> Result<u8, LuaError> {
        self.reserve_regs(1)
    }

    /// LIFO release back down to `mark`; never releases below the highest
    /// active local (temporaries always live above locals on the register
    /// file, spec §3 "register allocator").
    pub fn free_to(&mut self, mark: u8) {
        let floor = self.locals.len() as u8;
        self.free_reg = mark.max(floor);
    }

    pub fn sync_max_stack(&mut self) {
        self.proto.max_stack_size = self.proto.max_stack_size.max(self.next_register_count.min(255) as u8).max(2);
    }

    // ---- constants ---------------------------------------------------

    pub fn add_constant(&mut self, v: Value) -> u8 {
        let key = match &v {
            Value::Nil => ConstKey::Nil,
            Value::Bool(b) => ConstKey::Bool(*b),
            Value::Integer(i) => ConstKey::Int(*i),
            Value::Float(f) => ConstKey::FloatBits(f.to_bits()),
            Value::Str(s) => ConstKey::Str(s.as_str().to_string()),
            _ => {
                self.proto.constants.push(v);
                return (self.proto.constants.len() - 1) as u8;
            }
        };
        if let Some(&idx) = self.const_map.get(&key) {
            return idx as u8;
        }
        self.proto.constants.push(v);
        let idx = self.proto.constants.len() - 1;
        self.const_map.insert(key, idx);
        idx as u8
    }

    pub fn add_string_constant(&mut self, s: &str, strings: &mut crate::value::StringInterner) -> u8 {
        let interned = strings.intern(s);
        self.add_constant(Value::Str(interned))
    }

    // ---- emission ------------------------------------------------------

    pub fn emit(&mut self, instr: u32) -> usize {
        self.proto.instructions.push(instr);
        self.proto.instructions.len() - 1
    }

    pub fn emit_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        self.emit(instruction::pack_abc(op as u8, a, b, c))
    }

    pub fn emit_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        self.emit(instruction::pack_asbx(op as u8, a, sbx))
    }

    pub fn emit_jmp(&mut self) -> usize {
        self.emit_asbx(OpCode::Jmp, 0, 0)
    }

    pub fn here(&self) -> usize {
        self.proto.instructions.len()
    }

    /// Patches a previously-emitted `JMP`/`FORPREP`/`FORLOOP`/`TFORLOOP` at
    /// `pc` to jump to `target` (absolute instruction index).
    pub fn patch_jump_to(&mut self, pc: usize, target: usize) {
        let instr = self.proto.instructions[pc];
        let op = instruction::opcode_of(instr);
        let a = instruction::a_of(instr);
        let sbx = target as i64 - pc as i64 - 1;
        self.proto.instructions[pc] = instruction::pack_asbx(op, a, sbx as i32);
    }

    pub fn patch_jump_here(&mut self, pc: usize) {
        let here = self.here();
        self.patch_jump_to(pc, here);
    }

    /// Rewrites the `C` field of an already-emitted `CALL`/`VARARG` at `pc`
    /// in place, leaving its opcode/A/B untouched. Used to "close" a call
    /// left open for all results once the number actually wanted at the
    /// use site becomes known (a later statement, an enclosing exprlist).
    pub fn patch_c_field(&mut self, pc: usize, c: u32) {
        let instr = self.proto.instructions[pc];
        let op = instruction::opcode_of(instr);
        let a = instruction::a_of(instr);
        let b = instruction::b_of(instr);
        self.proto.instructions[pc] = instruction::pack_abc(op, a, b, c);
    }

    // ---- scope manager (C4) ---------------------------------------------

    pub fn enter_block(&mut self, is_loop: bool) {
        self.blocks.push(BlockCtx {
            first_local: self.locals.len(),
            first_reg: self.free_reg,
            is_loop,
            break_jumps: Vec::new(),
            labels: Vec::new(),
            gotos: Vec::new(),
        });
    }

    /// Leaves the innermost block, returning any `goto`s that didn't
    /// resolve to a label inside it (the caller re-raises them against the
    /// next-enclosing block, or reports an error if none remain).
    pub fn leave_block(&mut self) -> Result<Vec<GotoUse>, LuaError> {
        let block = self.blocks.pop().expect("leave_block without matching enter_block");
        if let Some(reg) = self.min_captured_register_from(block.first_local) {
            self.emit_abc(OpCode::Close, reg as u32, 0, 0);
        }
        let end_pc = self.here() as u32;
        for local in self.locals.drain(block.first_local..) {
            // The debug record was appended to `proto.locals` at declaration
            // time; patch in its closing pc now that the scope ends.
            if let Some(rec) = self
                .proto
                .locals
                .iter_mut()
                .rev()
                .find(|l| l.register == local.register && l.end_pc == u32::MAX)
            {
                rec.end_pc = end_pc;
            }
        }
        self.free_to(block.first_reg);
        Ok(block.gotos)
    }

    pub fn declare_local(&mut self, name: String, attrib: Attrib) -> Result<u8, LuaError> {
        let reg = self.reserve_one()?;
        self.locals.push(LocalVar { name: name.clone(), register: reg, attrib, start_pc: self.here() as u32, is_captured: false });
        self.proto.locals.push(crate::value::proto::LocalVarInfo {
            name,
            register: reg,
            start_pc: self.here() as u32,
            end_pc: u32::MAX,
            is_const: attrib == Attrib::Const,
            is_close: attrib == Attrib::Close,
        });
        Ok(reg)
    }

    pub fn find_local(&self, name: &str) -> Option<(u8, Attrib)> {
        self.locals.iter().rev().find(|l| l.name == name).map(|l| (l.register, l.attrib))
    }

    /// Marks the (most recently declared) local living in `register` as
    /// captured by some nested closure's upvalue.
    pub fn mark_captured(&mut self, register: u8) {
        if let Some(local) = self.locals.iter_mut().rev().find(|l| l.register == register) {
            local.is_captured = true;
        }
    }

    /// Lowest register among the captured locals at index `first_local` or
    /// later, if any — the threshold a `CLOSE mode=0` must use to refresh
    /// their upvalues at a loop back-edge or block exit.
    pub fn min_captured_register_from(&self, first_local: usize) -> Option<u8> {
        self.locals.get(first_local..)?.iter().filter(|l| l.is_captured).map(|l| l.register).min()
    }

    /// Register of the local at position `idx` in declaration order, if one
    /// is still active — used by `goto` to find the threshold for closing
    /// everything declared since a label.
    pub fn register_at_local_index(&self, idx: usize) -> Option<u8> {
        self.locals.get(idx).map(|l| l.register)
    }

    /// Index (into `self.locals`, most-recent-first order collapsed to a
    /// plain count) of how many locals are active right now — used to
    /// validate a `goto` doesn't jump into a local's scope (spec §4.2 rule
    /// 1) and to know how many registers a loop's body starts with.
    pub fn num_active_locals(&self) -> usize {
        self.locals.len()
    }

    pub fn declare_label(&mut self, name: String, line: u32) -> Result<(), LuaError> {
        let pc = self.here() as u32;
        let num_active_locals = self.num_active_locals();
        if let Some(block) = self.blocks.last() {
            if block.labels.iter().any(|l| l.name == name) {
                return Err(LuaError::new(ErrorKind::GotoScope, format!("label '{name}' already defined")));
            }
        }
        if let Some(block) = self.blocks.last_mut() {
            block.labels.push(LabelDef { name, pc, num_active_locals });
        }
        let _ = line;
        Ok(())
    }

    /// Looks up `name` across the block stack, innermost first (a `goto`
    /// may only jump to a label in its own block or an enclosing one, never
    /// into a sibling/nested block — spec §4.2 "Structural validity").
    pub fn find_label(&self, name: &str) -> Option<(LabelDef, usize)> {
        for (depth, block) in self.blocks.iter().enumerate().rev() {
            if let Some(def) = block.labels.iter().find(|l| l.name == name) {
                return Some((def.clone(), depth));
            }
        }
        None
    }

    // ---- upvalue resolver (C5) -------------------------------------------

    pub fn find_upvalue(&self, name: &str) -> Option<u8> {
        self.proto.upvalues.iter().position(|u| u.name == name).map(|i| i as u8)
    }

    pub fn push_upvalue(&mut self, desc: UpvalueDesc) -> u8 {
        self.proto.upvalues.push(desc);
        (self.proto.upvalues.len() - 1) as u8
    }
}

/// Resolves `name` as an upvalue of `funcs[level]`, recursing into
/// enclosing functions and appending a new [`UpvalueDesc`] at every level
/// the chain passes through (append-only: an index, once assigned, never
/// moves — so no remap pass is needed when an inner closure is compiled
/// after an outer one already captured the same name).
pub fn resolve_upvalue(funcs: &mut [FuncState], level: usize, name: &str) -> Option<u8> {
    if level == 0 {
        return None;
    }
    if let Some(idx) = funcs[level].find_upvalue(name) {
        return Some(idx);
    }
    if let Some((reg, _attrib)) = funcs[level - 1].find_local(name) {
        funcs[level - 1].mark_captured(reg);
        let desc = UpvalueDesc { name: name.to_string(), in_stack: true, index: reg };
        return Some(funcs[level].push_upvalue(desc));
    }
    if let Some(parent_idx) = resolve_upvalue(funcs, level - 1, name) {
        let desc = UpvalueDesc { name: name.to_string(), in_stack: false, index: parent_idx };
        return Some(funcs[level].push_upvalue(desc));
    }
    None
}
