//! `lua54` — a Lua 5.4 bytecode compiler and register-based virtual machine.
//!
//! [`compiler`] lowers source text straight to a [`value::Proto`] (no
//! intermediate AST — lexing, parsing, and code generation are one pass,
//! the way `lparser.c` itself works), and [`vm`] interprets a `Proto` plus
//! bound upvalues. [`stdlib`] registers the standard library tables onto
//! an [`vm::Interpreter`]'s globals.

pub mod compiler;
pub mod stdlib;
pub mod value;
pub mod vm;

#[cfg(test)]
mod test;

pub use value::{LuaString, LuaTable, Proto, Value};
pub use vm::{ControlFlow, ErrorKind, Interpreter, LuaError, LuaResult};

use std::cell::RefCell;
use std::rc::Rc;

use vm::coroutine::CoroutineStatus;

/// Compiles and runs `source` as a top-level chunk against a fresh
/// interpreter with the standard library registered, returning its return
/// values. Convenience wrapper over [`Interpreter::compile`] +
/// [`Interpreter::call_main`] for callers (the CLI, tests) that don't need
/// to reuse an `Interpreter` across multiple chunks.
pub fn run(source: &str, chunk_name: &str) -> LuaResult<Vec<Value>> {
    let mut interp = Interpreter::new();
    stdlib::register_all(&mut interp);
    interp.call_main(source, chunk_name)
}

impl Interpreter {
    /// Compiles `source` and runs it to completion on the main coroutine,
    /// from the top (spec §2 "the executor consumes a `Proto` plus bound
    /// upvalues to produce a list of return values").
    pub fn call_main(&mut self, source: &str, chunk_name: &str) -> LuaResult<Vec<Value>> {
        let proto = self.compile(source, chunk_name).map_err(ControlFlow::Error)?;
        let closure = Rc::new(value::LuaClosure::new(proto, Vec::new()));
        let main = self.main_coroutine.clone();
        self.call_closure_on(&main, closure, Vec::new())
    }

    /// Pushes a call frame for `closure` onto `co` and drives the dispatch
    /// loop until that call returns, surfacing a `Yield` as an error since
    /// the main chunk itself is not resumable (only `coroutine.resume`
    /// enters a non-main coroutine the same way).
    pub fn call_closure_on(
        &mut self,
        co: &Rc<RefCell<vm::coroutine::Coroutine>>,
        closure: Rc<value::LuaClosure>,
        args: Vec<Value>,
    ) -> LuaResult<Vec<Value>> {
        let floor = co.borrow().frames.len();
        vm::exec::call::push_lua_call(&mut co.borrow_mut(), closure, args, 0, vm::frame::MULTRET, false);
        self.run_until(co, floor)
    }

    /// Calls any callable `Value` (Lua closure or native) from host code,
    /// driving the dispatch loop if needed. Used by stdlib functions that
    /// need to call back into Lua (`pcall`, `table.sort`'s comparator,
    /// `for` iterators, …).
    pub fn call_value(
        &mut self,
        co: &Rc<RefCell<vm::coroutine::Coroutine>>,
        target: Value,
        args: Vec<Value>,
    ) -> LuaResult<Vec<Value>> {
        let floor = co.borrow().frames.len();
        match vm::exec::call::perform_call(self, co, target, args, 0, vm::frame::MULTRET)? {
            vm::exec::call::CallOutcome::Immediate(results) => Ok(results),
            vm::exec::call::CallOutcome::Pushed => self.run_until(co, floor),
        }
    }

    /// `coroutine.resume` (spec §4.10 "Status transitions"). Returns the
    /// yielded/returned values, or an error if `co` isn't `Suspended`.
    pub fn resume_coroutine(
        &mut self,
        co: &Rc<RefCell<vm::coroutine::Coroutine>>,
        args: Vec<Value>,
    ) -> LuaResult<Vec<Value>> {
        {
            let status = co.borrow().status;
            if status != CoroutineStatus::Suspended {
                return Err(self.raise(
                    ErrorKind::CoroutineState,
                    "cannot resume non-suspended coroutine",
                ));
            }
        }
        let resumer = self.current_coroutine();
        {
            let mut r = resumer.borrow_mut();
            if let CoroutineStatus::Running = r.status {
                r.status = CoroutineStatus::Normal;
            }
        }
        self.push_coroutine(co.clone());
        co.borrow_mut().status = CoroutineStatus::Running;

        let is_first_resume = co.borrow().frames.is_empty();
        let result = if is_first_resume {
            let entry = co.borrow_mut().entry.take().expect("coroutine entry already consumed");
            match entry {
                Value::Function(closure) => {
                    vm::exec::call::push_lua_call(&mut co.borrow_mut(), closure, args, 0, vm::frame::MULTRET, false);
                    self.run_until(co, 0)
                }
                other => Err(self.raise(ErrorKind::TypeError, format!("cannot resume a {} value", other.type_name()))),
            }
        } else {
            self.resume_with_values(co, args)
        };

        self.pop_coroutine();
        {
            let mut r = resumer.borrow_mut();
            if let CoroutineStatus::Normal = r.status {
                r.status = CoroutineStatus::Running;
            }
        }

        match result {
            Ok(values) => {
                co.borrow_mut().status = CoroutineStatus::Dead;
                Ok(values)
            }
            Err(ControlFlow::Yield(values)) => {
                co.borrow_mut().status = CoroutineStatus::Suspended;
                Ok(values)
            }
            Err(e @ ControlFlow::Error(_)) => {
                co.borrow_mut().status = CoroutineStatus::Dead;
                Err(e)
            }
        }
    }

    /// Resumes a coroutine that previously yielded: `args` become
    /// `coroutine.yield(...)`'s return values, delivered into the
    /// suspended call's result registers before the dispatch loop resumes.
    fn resume_with_values(&mut self, co: &Rc<RefCell<vm::coroutine::Coroutine>>, args: Vec<Value>) -> LuaResult<Vec<Value>> {
        co.borrow_mut().deliver_resume_values(args);
        self.run_until(co, 0)
    }
}
