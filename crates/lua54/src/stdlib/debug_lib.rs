//! `debug.*`: traceback rendering, `getinfo`, and hook activation at the
//! Lua-visible boundary. Grounded on `luars::stdlib::debug`.

use std::rc::Rc;

use crate::stdlib::base::arg;
use crate::value::{LuaString, Value};
use crate::vm::debug_hook::{HookMask, HookState};
use crate::vm::error::LuaResult;
use crate::vm::state::Interpreter;

pub fn register(interp: &mut Interpreter) {
    super::new_library(
        interp,
        "debug",
        &[
            ("traceback", lua_traceback),
            ("getinfo", lua_getinfo),
            ("sethook", lua_sethook),
            ("gethook", lua_gethook),
            ("getlocal", lua_getlocal),
            ("upvalueid", lua_upvalueid),
        ],
    );
}

/// `debug.traceback([message [, level]])`. Renders the
/// current coroutine's live call stack the same way an uncaught error's
/// traceback does.
fn lua_traceback(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let message = args.first().and_then(|v| v.as_str()).map(str::to_string);
    let co = interp.current_coroutine();
    let frames = interp.capture_traceback(&co);
    let mut out = String::new();
    if let Some(m) = &message {
        out.push_str(m);
        out.push('\n');
    }
    out.push_str("stack traceback:");
    for frame in &frames {
        out.push('\n');
        out.push('\t');
        out.push_str(&frame.source);
        out.push(':');
        out.push_str(&frame.line.to_string());
        out.push(':');
        match &frame.function_name {
            Some(name) => out.push_str(&format!(" in function '{name}'")),
            None if frame.is_native => out.push_str(" in ?"),
            None => {}
        }
    }
    Ok(vec![Value::Str(Rc::new(LuaString::from_owned(out)))])
}

/// `debug.getinfo(f [, what])`: a best-effort subset (`source`,
/// `currentline`, `what`, `name`, `nparams`, `isvararg`, `lineDefined`,
/// `lastLineDefined`), not the full reference field set.
fn lua_getinfo(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let target = arg(args, 0);
    let info = Value::new_table();
    let table = info.as_table().unwrap();
    let mut tb = table.borrow_mut();

    if let Some(level) = target.as_integer_exact() {
        let co = interp.current_coroutine();
        let c = co.borrow();
        let idx = c.frames.len().checked_sub(level as usize + 1);
        if let Some(frame) = idx.and_then(|i| c.frames.get(i)) {
            if frame.is_native {
                let _ = tb.set(interp.intern("what"), interp.intern("C"));
                let _ = tb.set(interp.intern("source"), interp.intern("=[C]"));
            } else {
                let proto = frame.proto();
                let line = proto
                    .line_events
                    .iter()
                    .filter(|e| e.pc <= frame.pc)
                    .map(|e| e.line)
                    .last()
                    .unwrap_or(proto.line_defined);
                let _ = tb.set(interp.intern("source"), interp.intern(&format!("@{}", proto.source)));
                let _ = tb.set(interp.intern("short_src"), interp.intern(&proto.source));
                let _ = tb.set(interp.intern("currentline"), Value::Integer(line as i64));
                let _ = tb.set(interp.intern("linedefined"), Value::Integer(proto.line_defined as i64));
                let _ = tb.set(interp.intern("lastlinedefined"), Value::Integer(proto.last_line_defined as i64));
                let _ = tb.set(interp.intern("nparams"), Value::Integer(proto.num_params as i64));
                let _ = tb.set(interp.intern("isvararg"), Value::Bool(proto.is_vararg));
                let _ = tb.set(interp.intern("what"), interp.intern("Lua"));
            }
        } else {
            return Ok(vec![Value::Nil]);
        }
    } else if let Value::Function(closure) = &target {
        let proto = &closure.proto;
        let _ = tb.set(interp.intern("source"), interp.intern(&format!("@{}", proto.source)));
        let _ = tb.set(interp.intern("short_src"), interp.intern(&proto.source));
        let _ = tb.set(interp.intern("linedefined"), Value::Integer(proto.line_defined as i64));
        let _ = tb.set(interp.intern("lastlinedefined"), Value::Integer(proto.last_line_defined as i64));
        let _ = tb.set(interp.intern("nparams"), Value::Integer(proto.num_params as i64));
        let _ = tb.set(interp.intern("isvararg"), Value::Bool(proto.is_vararg));
        let _ = tb.set(interp.intern("what"), interp.intern("Lua"));
    } else if let Value::Native(_) = &target {
        let _ = tb.set(interp.intern("what"), interp.intern("C"));
        let _ = tb.set(interp.intern("source"), interp.intern("=[C]"));
    } else {
        return Ok(vec![Value::Nil]);
    }
    drop(tb);
    Ok(vec![info])
}

/// `debug.sethook([f, mask, count]])`. Activated on the next resume.
/// With no arguments, clears the current coroutine's hook.
fn lua_sethook(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let co = interp.current_coroutine();
    if args.is_empty() || arg(args, 0).is_nil() {
        interp.set_hook_state(&co, None);
        return Ok(Vec::new());
    }
    let callback = arg(args, 0);
    let mask_str = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
    let count = args.get(2).and_then(|v| v.as_integer_exact()).unwrap_or(0).max(0) as u32;
    let mask = HookMask::from_mask_string(mask_str, count > 0);
    interp.set_hook_state(&co, Some(HookState::new(callback, mask, count)));
    Ok(Vec::new())
}

fn lua_gethook(interp: &mut Interpreter, _args: &[Value]) -> LuaResult<Vec<Value>> {
    let co = interp.current_coroutine();
    match interp.hook_state(&co) {
        Some(state) => Ok(vec![state.callback.clone()]),
        None => Ok(vec![Value::Nil]),
    }
}

/// Best-effort local lookup by name among the frame's named locals active
/// at the current `pc`. Not guaranteed to find every local a compiler
/// might emit; temporary registers beyond named locals are not exposed.
fn lua_getlocal(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let level = arg(args, 0).as_integer_exact().unwrap_or(0) as usize;
    let n = arg(args, 1).as_integer_exact().unwrap_or(1);
    let co = interp.current_coroutine();
    let c = co.borrow();
    let idx = c.frames.len().checked_sub(level + 1);
    let Some(frame) = idx.and_then(|i| c.frames.get(i)) else {
        return Ok(vec![Value::Nil]);
    };
    if frame.is_native {
        return Ok(vec![Value::Nil]);
    }
    let proto = frame.proto();
    let active: Vec<_> = proto
        .locals
        .iter()
        .filter(|l| l.start_pc <= frame.pc && frame.pc < l.end_pc)
        .collect();
    match active.get((n - 1).max(0) as usize) {
        Some(local) => {
            let value = frame.get_reg(local.register);
            Ok(vec![interp.intern(&local.name), value])
        }
        None => Ok(vec![Value::Nil]),
    }
}

/// `debug.upvalueid(f, n)`: the upvalue cell's pointer address. Closures
/// that share an upvalue report the same id, since they hold the same
/// `Rc<RefCell<Value>>`.
fn lua_upvalueid(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let f = arg(args, 0);
    let n = arg(args, 1).as_integer_exact().unwrap_or(1);
    let Value::Function(closure) = &f else {
        return Ok(vec![Value::Nil]);
    };
    match closure.upvalues.get((n - 1).max(0) as usize) {
        Some(uv) => {
            let addr = Rc::as_ptr(uv) as usize as i64;
            Ok(vec![Value::Integer(addr)])
        }
        None => Ok(vec![Value::Nil]),
    }
}
