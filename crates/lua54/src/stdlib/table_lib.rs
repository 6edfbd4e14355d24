//! `table.*`: insert/remove/concat/sort/unpack, grounded on
//! `luars::stdlib::table`.

use crate::stdlib::base::{arg, arg_error};
use crate::value::Value;
use crate::vm::error::{ControlFlow, ErrorKind, LuaError, LuaResult};
use crate::vm::exec::call::{perform_call, CallOutcome};
use crate::vm::state::Interpreter;

pub fn register(interp: &mut Interpreter) {
    super::new_library(
        interp,
        "table",
        &[
            ("insert", lua_insert),
            ("remove", lua_remove),
            ("concat", lua_concat),
            ("sort", lua_sort),
            ("unpack", lua_unpack),
            ("pack", lua_pack),
        ],
    );
}

fn lua_insert(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    let table = t.as_table().ok_or_else(|| arg_error(0, "insert", "table", &t))?;
    let len = table.borrow().length();
    match args.len() {
        2 => {
            table
                .borrow_mut()
                .set(Value::Integer(len + 1), args[1].clone())
                .map_err(|m| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, m)))?;
        }
        3 => {
            let pos = args[1]
                .as_integer_exact()
                .ok_or_else(|| arg_error(1, "insert", "number", &args[1]))?;
            if pos < 1 || pos > len + 1 {
                return Err(ControlFlow::Error(LuaError::arg_error(2, "insert", "position out of bounds", "")));
            }
            let mut i = len;
            while i >= pos {
                let v = table.borrow().get(&Value::Integer(i));
                table
                    .borrow_mut()
                    .set(Value::Integer(i + 1), v)
                    .map_err(|m| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, m)))?;
                i -= 1;
            }
            table
                .borrow_mut()
                .set(Value::Integer(pos), args[2].clone())
                .map_err(|m| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, m)))?;
        }
        _ => return Err(ControlFlow::Error(LuaError::new(ErrorKind::ArgError, "wrong number of arguments to 'insert'"))),
    }
    Ok(Vec::new())
}

fn lua_remove(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    let table = t.as_table().ok_or_else(|| arg_error(0, "remove", "table", &t))?;
    let len = table.borrow().length();
    let pos = match args.get(1) {
        Some(v) => v.as_integer_exact().ok_or_else(|| arg_error(1, "remove", "number", v))?,
        None => len,
    };
    if len == 0 {
        return Ok(vec![Value::Nil]);
    }
    if pos != len && (pos < 1 || pos > len + 1) {
        return Err(ControlFlow::Error(LuaError::arg_error(2, "remove", "position out of bounds", "")));
    }
    let removed = table.borrow().get(&Value::Integer(pos));
    let mut i = pos;
    while i < len {
        let v = table.borrow().get(&Value::Integer(i + 1));
        table
            .borrow_mut()
            .set(Value::Integer(i), v)
            .map_err(|m| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, m)))?;
        i += 1;
    }
    table
        .borrow_mut()
        .set(Value::Integer(len), Value::Nil)
        .map_err(|m| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, m)))?;
    Ok(vec![removed])
}

fn lua_concat(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    let table = t.as_table().ok_or_else(|| arg_error(0, "concat", "table", &t))?;
    let sep = args.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let len = table.borrow().length();
    let i = args.get(2).and_then(|v| v.as_integer_exact()).unwrap_or(1);
    let j = args.get(3).and_then(|v| v.as_integer_exact()).unwrap_or(len);
    let mut out = String::new();
    let mut k = i;
    while k <= j {
        let v = table.borrow().get(&Value::Integer(k));
        let piece = match &v {
            Value::Str(s) => s.as_str().to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Float(f) => super::format_float(*f),
            other => {
                return Err(ControlFlow::Error(LuaError::new(
                    ErrorKind::TypeError,
                    format!("invalid value ({}) at index {k} in table for 'concat'", other.type_name()),
                )))
            }
        };
        out.push_str(&piece);
        if k < j {
            out.push_str(&sep);
        }
        k += 1;
    }
    Ok(vec![interp.intern(&out)])
}

fn lua_unpack(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    let table = t.as_table().ok_or_else(|| arg_error(0, "unpack", "table", &t))?;
    let len = table.borrow().length();
    let i = args.get(1).and_then(|v| v.as_integer_exact()).unwrap_or(1);
    let j = args.get(2).and_then(|v| v.as_integer_exact()).unwrap_or(len);
    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        out.push(table.borrow().get(&Value::Integer(k)));
        k += 1;
    }
    Ok(out)
}

fn lua_pack(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = Value::new_table();
    if let Some(table) = t.as_table() {
        table.borrow_mut().append_array(args.iter().cloned());
        let n_key = interp.intern("n");
        table
            .borrow_mut()
            .set(n_key, Value::Integer(args.len() as i64))
            .expect("string key is valid");
    }
    Ok(vec![t])
}

/// `table.sort(t [, comp])`. Uses the host-provided `comp`
/// (or `<`) as the ordering predicate; ties/errors from a misbehaving
/// comparator are the caller's problem, same as reference Lua.
fn lua_sort(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t = arg(args, 0);
    let table = t.as_table().ok_or_else(|| arg_error(0, "sort", "table", &t))?;
    let comparator = args.get(1).cloned();
    let len = table.borrow().length();
    let mut items: Vec<Value> = (1..=len).map(|i| table.borrow().get(&Value::Integer(i))).collect();

    // Simple insertion sort rather than relying on Rust's `sort_by` (which
    // requires a total order the comparator can't panic out of) — a Lua
    // comparator can itself raise, and insertion sort lets that propagate
    // as an ordinary `?` without unwinding through a closure boundary.
    let co = interp.current_coroutine();
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 {
            let less = call_less(interp, &co, &comparator, &items[j], &items[j - 1])?;
            if less {
                items.swap(j, j - 1);
                j -= 1;
            } else {
                break;
            }
        }
    }
    for (i, v) in items.into_iter().enumerate() {
        table
            .borrow_mut()
            .set(Value::Integer((i + 1) as i64), v)
            .map_err(|m| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, m)))?;
    }
    Ok(Vec::new())
}

fn call_less(
    interp: &mut Interpreter,
    co: &std::rc::Rc<std::cell::RefCell<crate::vm::coroutine::Coroutine>>,
    comparator: &Option<Value>,
    a: &Value,
    b: &Value,
) -> LuaResult<bool> {
    match comparator {
        Some(f) => {
            let results = match perform_call(interp, co, f.clone(), vec![a.clone(), b.clone()], 0, 1)? {
                CallOutcome::Immediate(r) => r,
                CallOutcome::Pushed => {
                    let floor = co.borrow().frames.len().saturating_sub(1);
                    interp.run_until(co, floor)?
                }
            };
            Ok(results.first().map(|v| v.truthy()).unwrap_or(false))
        }
        None => crate::vm::exec::compare::raw_lt(a, b)
            .ok_or_else(|| crate::vm::exec::compare::compare_type_error(a, b)),
    }
}
