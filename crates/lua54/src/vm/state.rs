//! The interpreter state (spec §9: "a `LuaState` value threaded explicitly
//! through the executor; the registry and `_ENV` live in that state").
//!
//! Grounded on `luars::lua_vm::{LuaVM, LuaState}`: one long-lived value
//! owning globals, the registry, and the string interner, with libraries
//! registered into it via `lib_registry::LibraryRegistry` the same way.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::{LuaString, LuaTable, Proto, StringInterner, Value};
use crate::vm::coroutine::{Coroutine, CoroutineStatus};
use crate::vm::debug_hook::HookState;
use crate::vm::error::{ControlFlow, LuaError, LuaResult, TraceFrame};
use crate::vm::frame::CallFrame;

/// A host-callable Lua function (spec §6.4 "Native function signature").
/// A plain `fn` pointer, not a boxed closure — mirrors the teacher's
/// `CFunction = fn(&mut LuaState) -> LuaResult<usize>`; state specific to a
/// library (e.g. captured config) goes through the registry table instead
/// of a closure environment.
pub struct NativeFn {
    pub name: &'static str,
    pub func: fn(&mut Interpreter, &[Value]) -> LuaResult<Vec<Value>>,
}

impl NativeFn {
    pub fn new(name: &'static str, func: fn(&mut Interpreter, &[Value]) -> LuaResult<Vec<Value>>) -> Rc<NativeFn> {
        Rc::new(NativeFn { name, func })
    }
}

/// Registry key under which each coroutine's debug-hook configuration is
/// stashed (spec §4.11: "stored in the registry under an internal key").
const HOOK_REGISTRY_PREFIX: &str = "__hook__";

pub struct Interpreter {
    pub globals: Rc<RefCell<LuaTable>>,
    pub registry: Rc<RefCell<LuaTable>>,
    pub strings: StringInterner,
    pub string_metatable: Option<Rc<RefCell<LuaTable>>>,
    pub main_coroutine: Rc<RefCell<Coroutine>>,
    /// Resumer chain: `current_coroutine()` is always the last entry.
    coroutine_stack: Vec<Rc<RefCell<Coroutine>>>,
    /// Keyed by `Rc::as_ptr` address of the owning coroutine (spec says
    /// "under an internal key" in the registry; a side table keyed the
    /// same way is simpler than synthesizing registry key `Value`s for an
    /// implementation detail the registry table itself never needs to
    /// reflect back to Lua code).
    pub hooks: HashMap<usize, HookState>,
    pub debug_sink: Option<Box<dyn FnMut(&str)>>,
}

impl Interpreter {
    pub fn new() -> Self {
        let main = Rc::new(RefCell::new(Coroutine::new(Value::Nil)));
        main.borrow_mut().status = CoroutineStatus::Running;
        Interpreter {
            globals: Rc::new(RefCell::new(LuaTable::new())),
            registry: Rc::new(RefCell::new(LuaTable::new())),
            strings: StringInterner::new(),
            string_metatable: None,
            main_coroutine: main.clone(),
            coroutine_stack: vec![main],
            hooks: HashMap::new(),
            debug_sink: None,
        }
    }

    pub fn intern(&mut self, s: &str) -> Value {
        Value::Str(self.strings.intern(s))
    }

    pub fn new_lua_string(s: &str) -> Rc<LuaString> {
        Rc::new(LuaString::from_owned(s.to_string()))
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let key = self.intern(name);
        self.globals.borrow_mut().set(key, value).expect("global names are valid keys");
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.borrow().get_str(name)
    }

    pub fn current_coroutine(&self) -> Rc<RefCell<Coroutine>> {
        self.coroutine_stack.last().expect("main coroutine always present").clone()
    }

    pub fn push_coroutine(&mut self, co: Rc<RefCell<Coroutine>>) {
        self.coroutine_stack.push(co);
    }

    pub fn pop_coroutine(&mut self) -> Rc<RefCell<Coroutine>> {
        assert!(self.coroutine_stack.len() > 1, "cannot pop the main coroutine");
        self.coroutine_stack.pop().unwrap()
    }

    fn hook_key(co: &Rc<RefCell<Coroutine>>) -> usize {
        Rc::as_ptr(co) as usize
    }

    pub fn hook_state(&self, co: &Rc<RefCell<Coroutine>>) -> Option<&HookState> {
        self.hooks.get(&Self::hook_key(co))
    }

    pub fn hook_state_mut(&mut self, co: &Rc<RefCell<Coroutine>>) -> Option<&mut HookState> {
        self.hooks.get_mut(&Self::hook_key(co))
    }

    pub fn set_hook_state(&mut self, co: &Rc<RefCell<Coroutine>>, state: Option<HookState>) {
        let key = Self::hook_key(co);
        match state {
            Some(s) => {
                self.hooks.insert(key, s);
            }
            None => {
                self.hooks.remove(&key);
            }
        }
    }

    pub fn debug_log(&mut self, message: &str) {
        if let Some(sink) = self.debug_sink.as_mut() {
            sink(message);
        }
    }

    /// Parses and compiles `source` into a top-level `Proto` whose only
    /// upvalue is `_ENV` bound to `self.globals` (spec §4.4 "Global `x`:
    /// resolved via `_ENV`").
    pub fn compile(&mut self, source: &str, chunk_name: &str) -> Result<Rc<Proto>, LuaError> {
        crate::compiler::compile_chunk(source, chunk_name, &mut self.strings)
    }

    /// Builds a traceback from the coroutine's current frame stack, newest
    /// first (spec §4.12). Captured at the moment an error is raised.
    pub fn capture_traceback(&self, co: &Rc<RefCell<Coroutine>>) -> Vec<TraceFrame> {
        let co = co.borrow();
        co.frames
            .iter()
            .rev()
            .map(|f| trace_frame_of(f))
            .collect()
    }

    pub fn raise(&self, kind: crate::vm::error::ErrorKind, message: impl Into<String>) -> ControlFlow {
        let mut err = LuaError::new(kind, message);
        err.stack_frames = self.capture_traceback(&self.current_coroutine());
        ControlFlow::Error(err)
    }
}

fn trace_frame_of(frame: &CallFrame) -> TraceFrame {
    match &frame.closure {
        Some(closure) => TraceFrame {
            source: closure.proto.source.clone(),
            line: line_at(&closure.proto, frame.pc),
            function_name: frame.inferred_name.clone(),
            is_native: false,
        },
        None => TraceFrame {
            source: "[C]".to_string(),
            line: 0,
            function_name: frame.inferred_name.clone(),
            is_native: true,
        },
    }
}

fn line_at(proto: &Proto, pc: u32) -> u32 {
    proto
        .line_events
        .iter()
        .filter(|e| e.pc <= pc)
        .map(|e| e.line)
        .last()
        .unwrap_or(proto.line_defined)
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
