//! Standard library, implemented to the depth needed to exercise the
//! host-callable boundary. Grounded on `luars::stdlib`'s per-library module layout
//! (`basic`, `table`, `string`, `math`, `os`, `coroutine`, `debug`, `io`),
//! one Rust module per Lua library, each exposing a `register(interp)` that
//! builds its table and installs it as a global.

pub mod base;
pub mod coroutine_lib;
pub mod debug_lib;
pub mod io_lib;
pub mod math_lib;
pub mod os_lib;
pub mod pattern;
pub mod string_lib;
pub mod table_lib;

use crate::value::{LuaTable, Value};
use crate::vm::state::{Interpreter, NativeFn};
use std::cell::RefCell;
use std::rc::Rc;

/// Registers every library this crate implements onto `interp`'s globals.
/// Called by
/// [`crate::run`] and by any host embedding an [`Interpreter`] directly.
pub fn register_all(interp: &mut Interpreter) {
    base::register(interp);
    table_lib::register(interp);
    string_lib::register(interp);
    math_lib::register(interp);
    os_lib::register(interp);
    coroutine_lib::register(interp);
    debug_lib::register(interp);
    io_lib::register(interp);
}

/// Builds a library table from `(name, fn)` pairs and installs it as a
/// global, returning the table so callers can add non-function entries
/// (constants like `math.pi`, `math.maxinteger`) afterward.
pub fn new_library(interp: &mut Interpreter, lib_name: &str, fns: &[(&'static str, NativeFnPtr)]) -> Rc<RefCell<LuaTable>> {
    let table = Rc::new(RefCell::new(LuaTable::with_capacity(0, fns.len())));
    for (name, f) in fns {
        let key = interp.intern(name);
        table.borrow_mut().set(key, Value::Native(NativeFn::new(name, *f))).expect("string keys are valid");
    }
    interp.set_global(lib_name, Value::Table(table.clone()));
    table
}

pub type NativeFnPtr = fn(&mut Interpreter, &[Value]) -> crate::vm::error::LuaResult<Vec<Value>>;

/// `%.14g`-equivalent float formatting. Lua prints floats with 14
/// significant digits and always shows a decimal
/// point or exponent so that `tostring(1.0)` reads `"1.0"`, not `"1"`,
/// keeping floats visually distinct from integers.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf".to_string() } else { "inf".to_string() };
    }
    // %g-equivalent: shortest representation that round-trips at 14
    // significant digits, falling back to exponential notation only when
    // the plain-decimal form would be unreasonably long (mirrors C's `%g`
    // threshold of exponent outside [-4, precision)).
    let mut s = format_g(f, 14);
    if !s.contains('.') && !s.contains('e') && !s.contains("inf") && !s.contains("nan") {
        s.push_str(".0");
    }
    s
}

fn format_g(f: f64, precision: usize) -> String {
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0".to_string() } else { "0.0".to_string() };
    }
    let exponent = f.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= precision as i32 {
        let digits = precision.saturating_sub(1);
        let mantissa = format!("{:.*e}", digits, f);
        // Rust renders `1.5e2`; C renders `1.5e+02`. Normalize the exponent
        // field to at least two digits with an explicit sign.
        if let Some(epos) = mantissa.find('e') {
            let (mant, exp) = mantissa.split_at(epos);
            let exp_val: i32 = exp[1..].parse().unwrap_or(0);
            let mant = trim_trailing_zeros(mant);
            format!("{}e{}{:02}", mant, if exp_val >= 0 { "+" } else { "-" }, exp_val.abs())
        } else {
            mantissa
        }
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        let s = format!("{:.*}", decimals, f);
        trim_trailing_zeros(&s)
    }
}

fn trim_trailing_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0');
    let trimmed = trimmed.trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `tostring(v)`: honors `__tostring` first, then
/// `__name` for tables/userdata without it, falling back to the built-in
/// rendering.
pub fn tostring_value(interp: &mut Interpreter, v: &Value) -> crate::vm::error::LuaResult<String> {
    use crate::vm::exec::call::{perform_call, CallOutcome};
    use crate::vm::metamethod;

    if let Some(handler) = metamethod::lookup(v, metamethod::MM_TOSTRING) {
        let co = interp.current_coroutine();
        let results = match perform_call(interp, &co, handler, vec![v.clone()], 0, 1)? {
            CallOutcome::Immediate(r) => r,
            CallOutcome::Pushed => {
                let floor = co.borrow().frames.len().saturating_sub(1);
                interp.run_until(&co, floor)?
            }
        };
        let s = results.into_iter().next().unwrap_or(Value::Nil);
        return Ok(s.as_str().map(str::to_string).unwrap_or_else(|| format!("{:?}", s)));
    }
    Ok(raw_tostring(v))
}

/// The built-in rendering `tostring` falls back to when no `__tostring`
/// metamethod is present — also what `print`, `..`, and error-message
/// formatting use for non-string/number operands.
pub fn raw_tostring(v: &Value) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Str(s) => s.as_str().to_string(),
        Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
        Value::Function(c) => format!("function: {:p}", Rc::as_ptr(c)),
        Value::Native(n) => format!("function: builtin: {:p}", Rc::as_ptr(n)),
        Value::Userdata(u) => format!("userdata: {:p}", Rc::as_ptr(u)),
        Value::Thread(t) => format!("thread: {:p}", Rc::as_ptr(t)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn format_float_matches_lua_style() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NAN), "nan");
    }
}
