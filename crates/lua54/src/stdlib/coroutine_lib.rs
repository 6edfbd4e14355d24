//! `coroutine.*`. The Lua-visible surface over the
//! interpreter-loop coroutine model already implemented in
//! [`crate::vm::coroutine`] and [`crate::Interpreter::resume_coroutine`].

use std::cell::RefCell;
use std::rc::Rc;

use crate::stdlib::base::arg;
use crate::value::Value;
use crate::vm::coroutine::{Coroutine, CoroutineStatus};
use crate::vm::error::{ControlFlow, ErrorKind, LuaError, LuaResult};
use crate::vm::state::Interpreter;

pub fn register(interp: &mut Interpreter) {
    super::new_library(
        interp,
        "coroutine",
        &[
            ("create", lua_create),
            ("resume", lua_resume),
            ("yield", lua_yield),
            ("status", lua_status),
            ("wrap", lua_wrap),
            ("isyieldable", lua_isyieldable),
            ("running", lua_running),
            ("close", lua_close),
        ],
    );
}

fn lua_create(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let f = arg(args, 0);
    if !matches!(f, Value::Function(_) | Value::Native(_)) {
        return Err(ControlFlow::Error(LuaError::arg_error(1, "create", "function", f.type_name())));
    }
    let co = Rc::new(RefCell::new(Coroutine::new(f)));
    Ok(vec![Value::Thread(co)])
}

/// `coroutine.resume(co, ...)`. Unlike
/// [`Interpreter::resume_coroutine`], errors raised inside the coroutine are
/// reported as `false, message` here rather than propagated, matching
/// reference Lua's `resume` convention.
fn lua_resume(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let target = arg(args, 0);
    let Value::Thread(co) = target else {
        return Err(ControlFlow::Error(LuaError::arg_error(1, "resume", "coroutine", target.type_name())));
    };
    let call_args = args.get(1..).map(|s| s.to_vec()).unwrap_or_default();
    match interp.resume_coroutine(&co, call_args) {
        Ok(mut values) => {
            let mut out = vec![Value::Bool(true)];
            out.append(&mut values);
            Ok(out)
        }
        Err(ControlFlow::Error(e)) => Ok(vec![Value::Bool(false), e.error_value()]),
        Err(y @ ControlFlow::Yield(_)) => Err(y),
    }
}

/// `coroutine.yield(...)`. A plain native function that
/// returns the yield signal directly — the dispatch loop's trampoline
/// (`vm::exec::call`) carries it back out to whichever `resume` is waiting,
/// arbitrarily far up the Rust call stack.
fn lua_yield(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let co = interp.current_coroutine();
    if !co.borrow().is_yieldable() {
        return Err(interp.raise(ErrorKind::CoroutineState, "attempt to yield from outside a coroutine"));
    }
    Err(ControlFlow::Yield(args.to_vec()))
}

fn lua_status(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let target = arg(args, 0);
    let Value::Thread(co) = target else {
        return Err(ControlFlow::Error(LuaError::arg_error(1, "status", "coroutine", target.type_name())));
    };
    Ok(vec![string_status(co.borrow().status)])
}

fn string_status(status: CoroutineStatus) -> Value {
    Value::Str(Rc::new(crate::value::LuaString::from_owned(status.as_str().to_string())))
}

/// `coroutine.wrap(f)`: a closure-ish native value that resumes
/// a freshly created coroutine and re-raises any error instead of returning
/// `false, message` — built as a native function closing over the thread,
/// which this crate's `NativeFn` (plain `fn` pointers, no boxed closures)
/// can't express directly, so `wrap` returns a table with a `__call`
/// metamethod holding the coroutine instead.
fn lua_wrap(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let f = arg(args, 0);
    if !matches!(f, Value::Function(_) | Value::Native(_)) {
        return Err(ControlFlow::Error(LuaError::arg_error(1, "wrap", "function", f.type_name())));
    }
    let co = Rc::new(RefCell::new(Coroutine::new(f)));
    let wrapper = Value::new_table();
    let table = wrapper.as_table().unwrap();
    {
        let mut tb = table.borrow_mut();
        let thread_key = interp.intern("__wrapped_thread");
        let _ = tb.set(thread_key, Value::Thread(co));
    }
    let metatable = Value::new_table();
    if let Some(mt) = metatable.as_table() {
        let call_fn = Value::Native(crate::vm::state::NativeFn::new("wrap", lua_wrap_call));
        let mut mt_b = mt.borrow_mut();
        let call_key = interp.intern("__call");
        let _ = mt_b.set(call_key, call_fn);
    }
    table.borrow_mut().set_metatable(Some(metatable.as_table().unwrap().clone()));
    Ok(vec![wrapper])
}

fn lua_wrap_call(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let wrapper = arg(args, 0);
    let table = wrapper.as_table().ok_or_else(|| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, "invalid wrapped coroutine")))?;
    let thread = table.borrow().get(&interp.intern("__wrapped_thread"));
    let Value::Thread(co) = thread else {
        return Err(ControlFlow::Error(LuaError::new(ErrorKind::TypeError, "invalid wrapped coroutine")));
    };
    let call_args = args.get(1..).map(|s| s.to_vec()).unwrap_or_default();
    interp.resume_coroutine(&co, call_args)
}

fn lua_isyieldable(interp: &mut Interpreter, _args: &[Value]) -> LuaResult<Vec<Value>> {
    let co = interp.current_coroutine();
    let yieldable = co.borrow().is_yieldable();
    Ok(vec![Value::Bool(yieldable)])
}

fn lua_running(interp: &mut Interpreter, _args: &[Value]) -> LuaResult<Vec<Value>> {
    let co = interp.current_coroutine();
    let is_main = Rc::ptr_eq(&co, &interp.main_coroutine);
    Ok(vec![Value::Thread(co), Value::Bool(is_main)])
}

/// `coroutine.close(co)`: runs any pending `__close` handlers and marks the
/// coroutine dead without resuming it — only well-defined for a coroutine
/// that is `suspended` or already `dead` — a host-library convenience,
/// not part of the core VM contract.
fn lua_close(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let target = arg(args, 0);
    let Value::Thread(co) = target else {
        return Err(ControlFlow::Error(LuaError::arg_error(1, "close", "coroutine", target.type_name())));
    };
    let status = co.borrow().status;
    match status {
        CoroutineStatus::Suspended | CoroutineStatus::Dead => {
            co.borrow_mut().status = CoroutineStatus::Dead;
            Ok(vec![Value::Bool(true)])
        }
        _ => Err(ControlFlow::Error(LuaError::new(ErrorKind::CoroutineState, "cannot close a running coroutine"))),
    }
}
