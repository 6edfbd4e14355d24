//! Closures and upvalues (spec §3 "Upvalue", "Closure / Upvalue runtime" C10).

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::proto::Proto;
use crate::value::value::Value;

/// An upvalue cell shared between a closure and the frame it closed over.
/// `Open` aliases a register in a *live* coroutine register stack; `Closed`
/// owns its value outright. Two closures that captured the same local share
/// the same `Rc<RefCell<Upvalue>>` — that shared identity is exactly
/// `debug.upvalueid` (spec §3 "All closures that share the same register
/// observe the same upvalue identity").
pub enum Upvalue {
    Open {
        stack: Rc<RefCell<Vec<Value>>>,
        index: usize,
    },
    Closed(Value),
}

impl Upvalue {
    pub fn get(&self) -> Value {
        match self {
            Upvalue::Open { stack, index } => stack.borrow()[*index].clone(),
            Upvalue::Closed(v) => v.clone(),
        }
    }

    pub fn set(&mut self, value: Value) {
        match self {
            Upvalue::Open { stack, index } => stack.borrow_mut()[*index] = value,
            Upvalue::Closed(v) => *v = value,
        }
    }

    /// Transition `Open -> Closed`, copying the current aliased value
    /// (spec §9: "the executor walks its open-upvalue map and copies the
    /// current register value into the upvalue, transitioning it to the
    /// Closed state").
    pub fn close(&mut self) {
        if let Upvalue::Open { stack, index } = self {
            let v = stack.borrow()[*index].clone();
            *self = Upvalue::Closed(v);
        }
    }

    pub fn register_index(&self) -> Option<usize> {
        match self {
            Upvalue::Open { index, .. } => Some(*index),
            Upvalue::Closed(_) => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }
}

/// A Lua function value: immutable `Proto` plus the concrete upvalues bound
/// at `CLOSURE` creation time.
pub struct LuaClosure {
    pub proto: Rc<Proto>,
    pub upvalues: Vec<Rc<RefCell<Upvalue>>>,
    /// Best-effort name inferred from the call-site bytecode (spec §4.12
    /// "inferredName"), used for tracebacks. Set by the caller, not the
    /// callee, so it's interior-mutable and defaults to none.
    pub name_hint: RefCell<Option<String>>,
}

impl LuaClosure {
    pub fn new(proto: Rc<Proto>, upvalues: Vec<Rc<RefCell<Upvalue>>>) -> Self {
        LuaClosure {
            proto,
            upvalues,
            name_hint: RefCell::new(None),
        }
    }
}
