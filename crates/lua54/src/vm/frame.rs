//! Call frame (spec §3 "Call frame (runtime)").
//!
//! Grounded on `luars::lua_vm::lua_call_frame::LuaCallFrame`, but expressed
//! over safe indices into the coroutine's shared register `Vec` instead of
//! raw `code_ptr`/`constants_ptr`/`base_ptr` pointers — the teacher's frame
//! is deliberately unsafe for cache-line density; this one trades that for
//! the borrow checker's guarantee that `registers()` can never outlive the
//! stack it slices.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::closure::{LuaClosure, Upvalue};
use crate::value::proto::Proto;
use crate::value::Value;

/// `LUA_MULTRET`-equivalent: "however many results the callee produced".
pub const MULTRET: i32 = -1;

/// One to-be-closed local (spec §3: "an ordered list of `(register,
/// captured_value_at_declaration)`"). Declaration order == Vec order, so
/// LIFO close iterates it in reverse.
pub struct ToBeClosed {
    pub register: u8,
    pub value: Value,
}

/// A single activation record. Lua (non-native) frames share the owning
/// coroutine's `Rc<RefCell<Vec<Value>>>` register stack via `base`/`top`
/// offsets into it; native frames don't use the register stack at all.
pub struct CallFrame {
    pub closure: Option<Rc<LuaClosure>>,
    pub registers: Rc<RefCell<Vec<Value>>>,
    pub base: usize,
    pub top: usize,
    pub pc: u32,
    pub varargs: Vec<Value>,
    /// Open upvalues this frame has handed out, keyed by register offset
    /// *relative to `base`* (spec invariant: "`openUpvalues` is indexed by
    /// the owning register index").
    pub open_upvalues: HashMap<u8, Rc<RefCell<Upvalue>>>,
    pub to_be_closed: Vec<ToBeClosed>,
    pub is_native: bool,
    pub is_tail_call: bool,
    /// Set when this frame is a pushed `__close` handler invocation, so
    /// `RETURN`'s dispatch knows to resume the owning [`crate::vm::coroutine::PendingClose`]
    /// instead of delivering results the ordinary way.
    pub is_close_handler: bool,
    /// Set by `CALL`/`SELF` from the call-site bytecode just before the
    /// call (spec §4.12), read by traceback formatting.
    pub inferred_name: Option<String>,
    /// Where the caller wants results stored, relative to the caller's own
    /// base — `None` once this frame starts executing; filled in by the
    /// caller's dispatch of `CALL`/`TAILCALL` before pushing this frame.
    pub result_reg: u8,
    pub num_results_wanted: i32,
    /// Return values already computed, surfaced to `pcall` even if a later
    /// `__close` throws during the same `RETURN` (spec §4.9).
    pub captured_returns: Option<Vec<Value>>,
    pub last_line: i64,
    /// `FORPREP`/`FORLOOP` control state keyed by the loop's base register
    /// (see `exec::mod::store_for_state` for why this can't live in a
    /// plain `Value` register).
    pub for_states: HashMap<u8, crate::vm::exec::loop_ops::ForState>,
}

impl CallFrame {
    pub fn new_lua(
        closure: Rc<LuaClosure>,
        registers: Rc<RefCell<Vec<Value>>>,
        base: usize,
        varargs: Vec<Value>,
        result_reg: u8,
        num_results_wanted: i32,
    ) -> Self {
        CallFrame {
            closure: Some(closure),
            registers,
            base,
            top: base,
            pc: 0,
            varargs,
            open_upvalues: HashMap::new(),
            to_be_closed: Vec::new(),
            is_native: false,
            is_tail_call: false,
            is_close_handler: false,
            inferred_name: None,
            result_reg,
            num_results_wanted,
            captured_returns: None,
            last_line: -1,
            for_states: HashMap::new(),
        }
    }

    pub fn proto(&self) -> &Rc<Proto> {
        &self.closure.as_ref().expect("native frame has no proto").proto
    }

    #[inline]
    pub fn get_reg(&self, r: u8) -> Value {
        self.registers.borrow()[self.base + r as usize].clone()
    }

    #[inline]
    pub fn set_reg(&self, r: u8, v: Value) {
        self.registers.borrow_mut()[self.base + r as usize] = v;
    }

    /// Returns (creating if needed) the open upvalue for register `r` in
    /// this frame, sharing identity across every closure built from the
    /// same register (spec §3: "closures that share the same register
    /// observe the same upvalue identity").
    pub fn open_upvalue(&mut self, r: u8) -> Rc<RefCell<Upvalue>> {
        if let Some(uv) = self.open_upvalues.get(&r) {
            return uv.clone();
        }
        let uv = Rc::new(RefCell::new(Upvalue::Open {
            stack: self.registers.clone(),
            index: self.base + r as usize,
        }));
        self.open_upvalues.insert(r, uv.clone());
        uv
    }

    /// `CLOSE mode=0`: close every open upvalue with register >= `from`.
    pub fn close_upvalues_from(&mut self, from: u8) {
        let to_close: Vec<u8> = self
            .open_upvalues
            .keys()
            .filter(|&&r| r >= from)
            .copied()
            .collect();
        for r in to_close {
            if let Some(uv) = self.open_upvalues.remove(&r) {
                uv.borrow_mut().close();
            }
        }
    }

    pub fn close_all_upvalues(&mut self) {
        for (_, uv) in self.open_upvalues.drain() {
            uv.borrow_mut().close();
        }
    }
}
