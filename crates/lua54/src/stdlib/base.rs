//! The `_G` base library.
//!
//! Grounded on `luars::stdlib::basic`: one function per global, registered
//! directly onto `_G` rather than through an intermediate library table
//! (the only library that isn't itself namespaced under a table).

use std::rc::Rc;

use crate::value::{LuaString, Value};
use crate::vm::error::{ControlFlow, ErrorKind, LuaError, LuaResult};
use crate::vm::exec::call::{perform_call, CallOutcome};
use crate::vm::state::{Interpreter, NativeFn};

pub fn register(interp: &mut Interpreter) {
    let fns: &[(&str, super::NativeFnPtr)] = &[
        ("print", lua_print),
        ("type", lua_type),
        ("tostring", lua_tostring),
        ("tonumber", lua_tonumber),
        ("assert", lua_assert),
        ("error", lua_error),
        ("pcall", lua_pcall),
        ("xpcall", lua_xpcall),
        ("select", lua_select),
        ("ipairs", lua_ipairs),
        ("pairs", lua_pairs),
        ("next", lua_next),
        ("setmetatable", lua_setmetatable),
        ("getmetatable", lua_getmetatable),
        ("rawget", lua_rawget),
        ("rawset", lua_rawset),
        ("rawequal", lua_rawequal),
        ("rawlen", lua_rawlen),
        ("collectgarbage", lua_collectgarbage),
    ];
    for (name, f) in fns {
        let key = interp.intern(name);
        interp.globals.borrow_mut().set(key, Value::Native(NativeFn::new(name, *f))).expect("string keys are valid");
    }
    let version = interp.intern("Lua 5.4");
    interp.set_global("_VERSION", version);
    let globals = interp.globals.clone();
    interp.set_global("_G", Value::Table(globals));
}

pub fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Nil)
}

pub fn arg_error(n: usize, fn_name: &str, expected: &str, got: &Value) -> ControlFlow {
    ControlFlow::Error(LuaError::arg_error((n + 1) as u32, fn_name, expected, got.type_name()))
}

fn lua_print(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let mut out = String::new();
    for (i, v) in args.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        out.push_str(&super::tostring_value(interp, v)?);
    }
    println!("{out}");
    Ok(Vec::new())
}

fn lua_type(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    if args.is_empty() {
        return Err(ControlFlow::Error(LuaError::arg_error(1, "type", "value", "no value")));
    }
    Ok(vec![Value::Str(Rc::new(LuaString::from_owned(arg(args, 0).type_name().to_string())))])
}

fn lua_tostring(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let s = super::tostring_value(interp, &arg(args, 0))?;
    Ok(vec![interp.intern(&s)])
}

fn lua_tonumber(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let v = arg(args, 0);
    if let Some(base_v) = args.get(1) {
        let base = base_v.as_integer_exact().unwrap_or(10);
        let s = v.as_str().map(str::trim).unwrap_or("");
        return Ok(vec![i64::from_str_radix(s, base as u32)
            .map(Value::Integer)
            .unwrap_or(Value::Nil)]);
    }
    match v {
        Value::Integer(_) | Value::Float(_) => Ok(vec![v]),
        Value::Str(s) => Ok(vec![crate::compiler::lexer::parse_lua_number(s.as_str().trim()).unwrap_or(Value::Nil)]),
        _ => Ok(vec![Value::Nil]),
    }
}

fn lua_assert(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let cond = arg(args, 0);
    if cond.truthy() {
        return Ok(args.to_vec());
    }
    let msg = args.get(1).cloned().unwrap_or_else(|| Value::Str(Rc::new(LuaString::from_owned("assertion failed!".to_string()))));
    match &msg {
        Value::Str(s) => Err(ControlFlow::Error(LuaError::new(ErrorKind::RuntimeAssert, s.as_str().to_string()))),
        other => Err(ControlFlow::Error(LuaError::with_value(ErrorKind::RuntimeAssert, "assertion failed!", other.clone()))),
    }
}

/// `error(message [, level])`: prefixes `"<source>:<line>: "` to a string
/// message at the requested level; non-string messages pass through
/// unprefixed and unwrapped.
fn lua_error(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let message = arg(args, 0);
    let level = args.get(1).and_then(|v| v.as_integer_exact()).unwrap_or(1);
    let co = interp.current_coroutine();
    match &message {
        Value::Str(s) if level > 0 => {
            let prefix = error_position_prefix(interp, &co, level as usize);
            let full = format!("{prefix}{}", s.as_str());
            let value = interp.intern(&full);
            let mut err = LuaError::with_value(ErrorKind::LuaValue, full, value);
            err.stack_frames = interp.capture_traceback(&co);
            Err(ControlFlow::Error(err))
        }
        other => {
            let mut err = LuaError::with_value(ErrorKind::LuaValue, super::raw_tostring(other), other.clone());
            err.stack_frames = interp.capture_traceback(&co);
            Err(ControlFlow::Error(err))
        }
    }
}

fn error_position_prefix(interp: &Interpreter, co: &std::rc::Rc<std::cell::RefCell<crate::vm::coroutine::Coroutine>>, level: usize) -> String {
    let c = co.borrow();
    let idx = c.frames.len().checked_sub(level);
    match idx.and_then(|i| c.frames.get(i)) {
        Some(frame) if !frame.is_native => {
            let proto = frame.proto();
            let line = proto
                .line_events
                .iter()
                .filter(|e| e.pc <= frame.pc)
                .map(|e| e.line)
                .last()
                .unwrap_or(proto.line_defined);
            format!("{}:{}: ", proto.source, line)
        }
        _ => {
            let _ = interp;
            String::new()
        }
    }
}

fn lua_pcall(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    if args.is_empty() {
        return Err(ControlFlow::Error(LuaError::arg_error(1, "pcall", "value", "no value")));
    }
    let f = args[0].clone();
    let rest = args[1..].to_vec();
    let co = interp.current_coroutine();
    match interp.call_value(&co, f, rest) {
        Ok(mut results) => {
            let mut out = vec![Value::Bool(true)];
            out.append(&mut results);
            Ok(out)
        }
        Err(ControlFlow::Error(e)) => Ok(vec![Value::Bool(false), e.error_value()]),
        Err(y) => Err(y),
    }
}

fn lua_xpcall(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    if args.len() < 2 {
        return Err(ControlFlow::Error(LuaError::arg_error(2, "xpcall", "value", "no value")));
    }
    let f = args[0].clone();
    let handler = args[1].clone();
    let rest = args[2..].to_vec();
    let co = interp.current_coroutine();
    match interp.call_value(&co, f, rest) {
        Ok(mut results) => {
            let mut out = vec![Value::Bool(true)];
            out.append(&mut results);
            Ok(out)
        }
        Err(ControlFlow::Error(e)) => {
            let handled = interp.call_value(&co, handler, vec![e.error_value()]);
            match handled {
                Ok(mut results) => {
                    let mut out = vec![Value::Bool(false)];
                    out.append(&mut results);
                    Ok(out)
                }
                Err(ControlFlow::Error(e2)) => Ok(vec![Value::Bool(false), e2.error_value()]),
                Err(y) => Err(y),
            }
        }
        Err(y) => Err(y),
    }
}

fn lua_select(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let sel = arg(args, 0);
    if let Some("#") = sel.as_str() {
        return Ok(vec![Value::Integer((args.len() - 1) as i64)]);
    }
    let n = sel
        .as_integer_exact()
        .ok_or_else(|| arg_error(0, "select", "number", &sel))?;
    if n < 0 {
        let from = (args.len() as i64 - 1 + n).max(1);
        return Ok(args[from as usize..].to_vec());
    }
    if n == 0 {
        return Err(ControlFlow::Error(LuaError::arg_error(1, "select", "index out of range", "")));
    }
    let from = (n as usize).min(args.len());
    Ok(args[from..].to_vec())
}

fn lua_ipairs(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    Ok(vec![Value::Native(NativeFn::new("ipairs_iter", ipairs_iter)), t, Value::Integer(0)])
}

fn ipairs_iter(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    let i = arg(args, 1).as_integer_exact().unwrap_or(0) + 1;
    let v = match t.as_table() {
        Some(t) => t.borrow().get(&Value::Integer(i)),
        None => Value::Nil,
    };
    if v.is_nil() {
        Ok(vec![Value::Nil])
    } else {
        Ok(vec![Value::Integer(i), v])
    }
}

fn lua_pairs(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    if let Some(handler) = crate::vm::metamethod::lookup(&t, "__pairs") {
        let co = interp.current_coroutine();
        return match perform_call(interp, &co, handler, vec![t], 0, 3)? {
            CallOutcome::Immediate(r) => Ok(r),
            CallOutcome::Pushed => {
                let floor = co.borrow().frames.len().saturating_sub(1);
                interp.run_until(&co, floor)
            }
        };
    }
    Ok(vec![Value::Native(NativeFn::new("next", lua_next)), t, Value::Nil])
}

fn lua_next(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    let key = arg(args, 1);
    let table = t.as_table().ok_or_else(|| arg_error(0, "next", "table", &t))?;
    match table.borrow().next_key(&key) {
        Some((k, v)) => Ok(vec![k, v]),
        None => Ok(vec![Value::Nil]),
    }
}

fn lua_setmetatable(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    let table = t.as_table().ok_or_else(|| arg_error(0, "setmetatable", "table", &t))?;
    if let Some(existing) = table.borrow().metatable() {
        if !existing.borrow().get_str("__metatable").is_nil() {
            return Err(ControlFlow::Error(LuaError::new(ErrorKind::TypeError, "cannot change a protected metatable")));
        }
    }
    let mt = arg(args, 1);
    match mt {
        Value::Nil => {
            table.borrow_mut().set_metatable(None);
        }
        Value::Table(mt) => {
            table.borrow_mut().set_metatable(Some(mt));
        }
        other => return Err(arg_error(1, "setmetatable", "nil or table", &other)),
    }
    Ok(vec![t])
}

fn lua_getmetatable(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let v = arg(args, 0);
    match v.metatable() {
        Some(mt) => {
            let protected = mt.borrow().get_str("__metatable");
            if !protected.is_nil() {
                Ok(vec![protected])
            } else {
                Ok(vec![Value::Table(mt)])
            }
        }
        None => Ok(vec![Value::Nil]),
    }
}

fn lua_rawget(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    let key = arg(args, 1);
    let table = t.as_table().ok_or_else(|| arg_error(0, "rawget", "table", &t))?;
    Ok(vec![table.borrow().get(&key)])
}

fn lua_rawset(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    let key = arg(args, 1);
    let value = arg(args, 2);
    let table = t.as_table().ok_or_else(|| arg_error(0, "rawset", "table", &t))?;
    table
        .borrow_mut()
        .set(key, value)
        .map_err(|msg| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, msg)))?;
    Ok(vec![t])
}

fn lua_rawequal(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    Ok(vec![Value::Bool(arg(args, 0).raw_eq(&arg(args, 1)))])
}

fn lua_rawlen(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let v = arg(args, 0);
    match &v {
        Value::Table(t) => Ok(vec![Value::Integer(t.borrow().length())]),
        Value::Str(s) => Ok(vec![Value::Integer(s.len() as i64)]),
        other => Err(arg_error(0, "rawlen", "table or string", other)),
    }
}

fn lua_collectgarbage(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    // No incremental GC here; this crate reclaims via `Rc`, so
    // `collectgarbage` is a no-op that still honors the calling convention
    // scripts rely on (`collectgarbage("count")` returning a number).
    match arg(args, 0).as_str() {
        Some("count") => Ok(vec![Value::Float(0.0), Value::Float(0.0)]),
        _ => Ok(vec![Value::Integer(0)]),
    }
}
