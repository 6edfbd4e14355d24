//! `os.*` (grounded on `luars::stdlib::os`; wall-clock formatting via
//! `chrono`).

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Local, TimeZone, Timelike};

use crate::stdlib::base::arg;
use crate::value::Value;
use crate::vm::error::LuaResult;
use crate::vm::state::Interpreter;

pub fn register(interp: &mut Interpreter) {
    super::new_library(
        interp,
        "os",
        &[
            ("time", lua_time),
            ("clock", lua_clock),
            ("date", lua_date),
            ("difftime", lua_difftime),
            ("getenv", lua_getenv),
        ],
    );
}

fn lua_time(_interp: &mut Interpreter, _args: &[Value]) -> LuaResult<Vec<Value>> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    Ok(vec![Value::Integer(secs)])
}

fn lua_clock(_interp: &mut Interpreter, _args: &[Value]) -> LuaResult<Vec<Value>> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0);
    Ok(vec![Value::Float(secs)])
}

fn lua_difftime(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let t2 = arg(args, 0).as_number().unwrap_or(0.0);
    let t1 = arg(args, 1).as_number().unwrap_or(0.0);
    Ok(vec![Value::Float(t2 - t1)])
}

fn lua_getenv(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let name = arg(args, 0);
    let name = name.as_str().unwrap_or("");
    match std::env::var(name) {
        Ok(v) => Ok(vec![interp.intern(&v)]),
        Err(_) => Ok(vec![Value::Nil]),
    }
}

/// `os.date([format [, time]])`: only the common `strftime`-style
/// directives `%Y %m %d %H %M %S %c` plus the `*t`/`!*t` table forms.
fn lua_date(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let format = args.first().and_then(|v| v.as_str()).unwrap_or("%c").to_string();
    let time = args.get(1).and_then(|v| v.as_number());
    let (format, _utc) = if let Some(stripped) = format.strip_prefix('!') {
        (stripped.to_string(), true)
    } else {
        (format, false)
    };

    let secs = time.unwrap_or_else(|| SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0));
    let dt = Local.timestamp_opt(secs as i64, 0).single().unwrap_or_else(|| Local.timestamp_opt(0, 0).unwrap());

    if format == "*t" {
        let t = Value::new_table();
        if let Some(table) = t.as_table() {
            let mut tb = table.borrow_mut();
            let _ = tb.set(interp.intern("year"), Value::Integer(dt.year() as i64));
            let _ = tb.set(interp.intern("month"), Value::Integer(dt.month() as i64));
            let _ = tb.set(interp.intern("day"), Value::Integer(dt.day() as i64));
            let _ = tb.set(interp.intern("hour"), Value::Integer(dt.hour() as i64));
            let _ = tb.set(interp.intern("min"), Value::Integer(dt.minute() as i64));
            let _ = tb.set(interp.intern("sec"), Value::Integer(dt.second() as i64));
            let _ = tb.set(interp.intern("wday"), Value::Integer(dt.weekday().num_days_from_sunday() as i64 + 1));
            let _ = tb.set(interp.intern("yday"), Value::Integer(dt.ordinal() as i64));
            let _ = tb.set(interp.intern("isdst"), Value::Bool(false));
        }
        return Ok(vec![t]);
    }

    let rendered = dt.format(&strftime_to_chrono(&format)).to_string();
    Ok(vec![interp.intern(&rendered)])
}

fn strftime_to_chrono(fmt: &str) -> String {
    // `chrono`'s format specifiers are a superset of the common C ones this
    // crate supports, so most directives pass through unchanged; `%c` has
    // no single `chrono` equivalent and is expanded here.
    fmt.replace("%c", "%a %b %e %H:%M:%S %Y")
}
