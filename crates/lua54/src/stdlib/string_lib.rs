//! `string.*`. The pure-data functions (`len`, `sub`, `upper`,
//! `lower`, `rep`, `byte`, `char`, `reverse`, `format`) are direct
//! translations of `luars::stdlib::string`; `find`/`match`/`gmatch`/`gsub`
//! are built on the condensed pattern engine in [`super::pattern`].

use std::rc::Rc;

use crate::stdlib::base::{arg, arg_error};
use crate::stdlib::pattern::{self, CaptureValue};
use crate::value::Value;
use crate::vm::error::{ControlFlow, ErrorKind, LuaError, LuaResult};
use crate::vm::exec::call::{perform_call, CallOutcome};
use crate::vm::state::Interpreter;

pub fn register(interp: &mut Interpreter) {
    super::new_library(
        interp,
        "string",
        &[
            ("len", lua_len),
            ("sub", lua_sub),
            ("upper", lua_upper),
            ("lower", lua_lower),
            ("rep", lua_rep),
            ("byte", lua_byte),
            ("char", lua_char),
            ("reverse", lua_reverse),
            ("format", lua_format),
            ("find", lua_find),
            ("match", lua_match),
            ("gmatch", lua_gmatch),
            ("gsub", lua_gsub),
        ],
    );
}

fn as_bytes_arg(args: &[Value], i: usize, fn_name: &str) -> Result<String, ControlFlow> {
    let v = arg(args, i);
    match &v {
        Value::Str(s) => Ok(s.as_str().to_string()),
        Value::Integer(n) => Ok(n.to_string()),
        Value::Float(f) => Ok(super::format_float(*f)),
        _ => Err(arg_error(i, fn_name, "string", &v)),
    }
}

/// Normalizes a 1-based, possibly negative Lua string index against a
/// length, clamping as `string.sub`/`string.byte` do.
fn norm_index(i: i64, len: usize) -> i64 {
    if i >= 0 {
        i
    } else {
        (len as i64 + i + 1).max(0)
    }
}

fn lua_len(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let s = as_bytes_arg(args, 0, "len")?;
    Ok(vec![Value::Integer(s.len() as i64)])
}

fn lua_sub(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let s = as_bytes_arg(args, 0, "sub")?;
    let len = s.len();
    let i = norm_index(args.get(1).and_then(|v| v.as_integer_exact()).unwrap_or(1), len).max(1);
    let j = {
        let raw = args.get(2).and_then(|v| v.as_integer_exact()).unwrap_or(-1);
        norm_index(raw, len).min(len as i64)
    };
    if i > j {
        return Ok(vec![interp.intern("")]);
    }
    let bytes = s.as_bytes();
    let slice = &bytes[(i as usize - 1)..(j as usize)];
    let out = String::from_utf8_lossy(slice).to_string();
    Ok(vec![interp.intern(&out)])
}

fn lua_upper(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let s = as_bytes_arg(args, 0, "upper")?;
    Ok(vec![interp.intern(&s.to_uppercase())])
}

fn lua_lower(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let s = as_bytes_arg(args, 0, "lower")?;
    Ok(vec![interp.intern(&s.to_lowercase())])
}

fn lua_rep(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let s = as_bytes_arg(args, 0, "rep")?;
    let n = args.get(1).and_then(|v| v.as_integer_exact()).unwrap_or(0).max(0) as usize;
    let sep = args.get(2).and_then(|v| v.as_str()).unwrap_or("");
    if n == 0 {
        return Ok(vec![interp.intern("")]);
    }
    let mut out = String::with_capacity(s.len() * n);
    for i in 0..n {
        if i > 0 {
            out.push_str(sep);
        }
        out.push_str(&s);
    }
    Ok(vec![interp.intern(&out)])
}

fn lua_byte(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let s = as_bytes_arg(args, 0, "byte")?;
    let len = s.len();
    let i = norm_index(args.get(1).and_then(|v| v.as_integer_exact()).unwrap_or(1), len).max(1);
    let j = norm_index(args.get(2).and_then(|v| v.as_integer_exact()).unwrap_or(i), len).min(len as i64);
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        if let Some(&b) = bytes.get(k as usize - 1) {
            out.push(Value::Integer(b as i64));
        }
        k += 1;
    }
    Ok(out)
}

fn lua_char(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let mut bytes = Vec::with_capacity(args.len());
    for (i, v) in args.iter().enumerate() {
        let n = v.as_integer_exact().ok_or_else(|| arg_error(i, "char", "number", v))?;
        bytes.push(n as u8);
    }
    let s = String::from_utf8_lossy(&bytes).to_string();
    Ok(vec![interp.intern(&s)])
}

fn lua_reverse(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let s = as_bytes_arg(args, 0, "reverse")?;
    let mut bytes = s.into_bytes();
    bytes.reverse();
    let out = String::from_utf8_lossy(&bytes).to_string();
    Ok(vec![interp.intern(&out)])
}

/// `string.format(fmt, ...)`: the common directive set — `%d %i %u %s %q
/// %f %g %x %X %o %c %%` with width/precision/flags.
fn lua_format(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let fmt = as_bytes_arg(args, 0, "format")?;
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    let mut arg_idx = 1;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = String::from("%");
        while let Some(&next) = chars.peek() {
            if "-+ #0".contains(next) {
                spec.push(next);
                chars.next();
            } else {
                break;
            }
        }
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() {
                spec.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if chars.peek() == Some(&'.') {
            spec.push('.');
            chars.next();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() {
                    spec.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
        }
        let Some(conv) = chars.next() else {
            return Err(ControlFlow::Error(LuaError::new(ErrorKind::ArgError, "invalid conversion to 'format'")));
        };
        if conv == '%' {
            out.push('%');
            continue;
        }
        let value = arg(args, arg_idx);
        arg_idx += 1;
        let rendered = format_one(&spec, conv, &value)?;
        out.push_str(&rendered);
    }
    Ok(vec![interp.intern(&out)])
}

fn parse_width_precision(spec: &str) -> (bool, bool, usize, Option<usize>) {
    let left = spec.contains('-');
    let zero = spec.contains('0') && !left;
    let digits: String = spec.chars().skip(1).take_while(|c| c.is_ascii_digit() || "-+ #".contains(*c)).collect();
    let core = digits.trim_start_matches(['-', '+', ' ', '#']);
    let parts: Vec<&str> = core.splitn(2, '.').collect();
    let width = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
    let precision = if spec.contains('.') {
        spec.split('.').nth(1).and_then(|s| s.parse().ok()).or(Some(0))
    } else {
        None
    };
    let _ = parts;
    (left, zero, width, precision)
}

fn pad(s: String, left: bool, zero: bool, width: usize) -> String {
    if s.len() >= width {
        return s;
    }
    let fill = if zero { '0' } else { ' ' };
    let padding: String = std::iter::repeat(fill).take(width - s.len()).collect();
    if left {
        format!("{s}{padding}")
    } else if zero && (s.starts_with('-') || s.starts_with('+')) {
        format!("{}{}{}", &s[..1], padding, &s[1..])
    } else {
        format!("{padding}{s}")
    }
}

fn format_one(spec: &str, conv: char, value: &Value) -> LuaResult<String> {
    let (left, zero, width, precision) = parse_width_precision(spec);
    let rendered = match conv {
        'd' | 'i' => {
            let n = value.as_integer_exact().ok_or_else(|| {
                ControlFlow::Error(LuaError::new(ErrorKind::ArgError, "bad argument to 'format' (number expected)"))
            })?;
            n.to_string()
        }
        'u' => {
            let n = value.as_integer_exact().unwrap_or(0);
            (n as u64).to_string()
        }
        'x' => format!("{:x}", value.as_integer_exact().unwrap_or(0)),
        'X' => format!("{:X}", value.as_integer_exact().unwrap_or(0)),
        'o' => format!("{:o}", value.as_integer_exact().unwrap_or(0)),
        'c' => {
            let n = value.as_integer_exact().unwrap_or(0) as u8;
            (n as char).to_string()
        }
        'f' | 'F' => {
            let n = value.as_number().unwrap_or(0.0);
            format!("{:.*}", precision.unwrap_or(6), n)
        }
        'g' | 'G' => {
            let n = value.as_number().unwrap_or(0.0);
            super::format_float(n).trim_end_matches(".0").to_string()
        }
        'e' | 'E' => {
            let n = value.as_number().unwrap_or(0.0);
            format!("{:.*e}", precision.unwrap_or(6), n)
        }
        's' => {
            let mut s = match value {
                Value::Str(lv) => lv.as_str().to_string(),
                other => super::raw_tostring(other),
            };
            if let Some(p) = precision {
                s.truncate(p);
            }
            s
        }
        'q' => quote_string(value),
        other => {
            return Err(ControlFlow::Error(LuaError::new(
                ErrorKind::ArgError,
                format!("invalid conversion '%{other}' to 'format'"),
            )))
        }
    };
    Ok(pad(rendered, left, zero, width))
}

fn quote_string(value: &Value) -> String {
    let s = match value {
        Value::Str(lv) => lv.as_str().to_string(),
        other => super::raw_tostring(other),
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn resolve_init(arg_val: Option<&Value>, len: usize) -> usize {
    let raw = arg_val.and_then(|v| v.as_integer_exact()).unwrap_or(1);
    let idx = if raw > 0 { raw - 1 } else if raw == 0 { 0 } else { (len as i64 + raw).max(0) };
    idx.max(0) as usize
}

fn capture_values(interp: &mut Interpreter, src: &str, caps: &[CaptureValue]) -> Vec<Value> {
    caps.iter()
        .map(|c| match c {
            CaptureValue::Span(s, e) => interp.intern(&src[*s..*e]),
            CaptureValue::Position(p) => Value::Integer(*p as i64 + 1),
        })
        .collect()
}

fn pattern_error(e: &'static str) -> ControlFlow {
    ControlFlow::Error(LuaError::new(ErrorKind::ArgError, e))
}

fn lua_find(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let src = as_bytes_arg(args, 0, "find")?;
    let pat = as_bytes_arg(args, 1, "find")?;
    let init = resolve_init(args.get(2), src.len());
    let plain = args.get(3).map(|v| v.truthy()).unwrap_or(false);
    match pattern::find(src.as_bytes(), pat.as_bytes(), init, plain).map_err(pattern_error)? {
        Some(m) => {
            let mut out = vec![Value::Integer(m.start as i64 + 1), Value::Integer(m.end as i64)];
            if !pat.is_empty() && pat.contains('(') {
                out.extend(capture_values(interp, &src, &m.captures));
            }
            Ok(out)
        }
        None => Ok(vec![Value::Nil]),
    }
}

fn lua_match(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let src = as_bytes_arg(args, 0, "match")?;
    let pat = as_bytes_arg(args, 1, "match")?;
    let init = resolve_init(args.get(2), src.len());
    match pattern::match_from(src.as_bytes(), pat.as_bytes(), init).map_err(pattern_error)? {
        Some(m) => Ok(capture_values(interp, &src, &m.captures)),
        None => Ok(vec![Value::Nil]),
    }
}

/// `string.gmatch(s, pat)`: returns an iterator closure — since
/// this crate's native functions are plain `fn` pointers (no captured
/// state), the iterator's position is carried in a one-entry table closed
/// over via `__call`, the same trick [`super::coroutine_lib::lua_wrap`]
/// uses for `coroutine.wrap`.
fn lua_gmatch(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let src = as_bytes_arg(args, 0, "gmatch")?;
    let pat = as_bytes_arg(args, 1, "gmatch")?;
    let state = Value::new_table();
    let table = state.as_table().unwrap();
    {
        let mut tb = table.borrow_mut();
        let src_key = interp.intern("__src");
        let pat_key = interp.intern("__pat");
        let pos_key = interp.intern("__pos");
        let _ = tb.set(src_key, interp.intern(&src));
        let _ = tb.set(pat_key, interp.intern(&pat));
        let _ = tb.set(pos_key, Value::Integer(0));
    }
    let metatable = Value::new_table();
    if let Some(mt) = metatable.as_table() {
        let call_fn = Value::Native(crate::vm::state::NativeFn::new("gmatch", lua_gmatch_call));
        let call_key = interp.intern("__call");
        let _ = mt.borrow_mut().set(call_key, call_fn);
    }
    table.borrow_mut().set_metatable(Some(metatable.as_table().unwrap().clone()));
    Ok(vec![state])
}

fn lua_gmatch_call(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let state = arg(args, 0);
    let table = state
        .as_table()
        .ok_or_else(|| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, "invalid gmatch iterator state")))?;
    let (src, pat, pos) = {
        let tb = table.borrow();
        let src = tb.get_str("__src").as_str().unwrap_or("").to_string();
        let pat = tb.get_str("__pat").as_str().unwrap_or("").to_string();
        let pos = tb.get_str("__pos").as_integer_exact().unwrap_or(0) as usize;
        (src, pat, pos)
    };
    if pos > src.len() {
        return Ok(vec![Value::Nil]);
    }
    match pattern::match_from(src.as_bytes(), pat.as_bytes(), pos).map_err(pattern_error)? {
        Some(m) => {
            let next_pos = if m.end > pos { m.end } else { pos + 1 };
            let pos_key = interp.intern("__pos");
            let _ = table.borrow_mut().set(pos_key, Value::Integer(next_pos as i64));
            Ok(capture_values(interp, &src, &m.captures))
        }
        None => {
            let pos_key = interp.intern("__pos");
            let _ = table.borrow_mut().set(pos_key, Value::Integer(src.len() as i64 + 1));
            Ok(vec![Value::Nil])
        }
    }
}

/// `string.gsub(s, pat, repl [, n])`. `repl` may be a string
/// (with `%1`.. backreferences and `%%`), a table (indexed by the first
/// capture, or the whole match if there are none), or a function (called
/// with the captures, or the whole match).
fn lua_gsub(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let src = as_bytes_arg(args, 0, "gsub")?;
    let pat = as_bytes_arg(args, 1, "gsub")?;
    let repl = arg(args, 2);
    let max_n = args.get(3).and_then(|v| v.as_integer_exact());

    let mut out = String::new();
    let mut pos = 0usize;
    let mut count = 0i64;
    let co = interp.current_coroutine();

    while pos <= src.len() {
        if let Some(limit) = max_n {
            if count >= limit {
                break;
            }
        }
        match pattern::match_from(src.as_bytes(), pat.as_bytes(), pos).map_err(pattern_error)? {
            Some(m) => {
                if m.start > pos {
                    // an unanchored pattern can match later than `pos`; copy
                    // the skipped prefix through verbatim.
                    out.push_str(&src[pos..m.start]);
                }
                let whole = &src[m.start..m.end];
                let caps = capture_values(interp, &src, &m.captures);
                let replacement = apply_replacement(interp, &co, &repl, whole, &caps)?;
                out.push_str(&replacement);
                count += 1;
                pos = if m.end > m.start {
                    m.end
                } else {
                    if m.end < src.len() {
                        out.push_str(&src[m.end..m.end + 1]);
                    }
                    m.end + 1
                };
            }
            None => break,
        }
    }
    if pos <= src.len() {
        out.push_str(&src[pos..]);
    }
    Ok(vec![interp.intern(&out), Value::Integer(count)])
}

fn apply_replacement(
    interp: &mut Interpreter,
    co: &Rc<std::cell::RefCell<crate::vm::coroutine::Coroutine>>,
    repl: &Value,
    whole: &str,
    caps: &[Value],
) -> LuaResult<String> {
    let first_cap = caps.first().cloned().unwrap_or_else(|| interp.intern(whole));
    match repl {
        Value::Str(s) => Ok(expand_backrefs(s.as_str(), whole, caps)),
        Value::Table(t) => {
            let v = t.borrow().get(&first_cap);
            Ok(replacement_value_to_string(v, whole))
        }
        Value::Function(_) | Value::Native(_) => {
            let call_args = if caps.is_empty() { vec![interp.intern(whole)] } else { caps.to_vec() };
            let results = match perform_call(interp, co, repl.clone(), call_args, 0, 1)? {
                CallOutcome::Immediate(r) => r,
                CallOutcome::Pushed => {
                    let floor = co.borrow().frames.len().saturating_sub(1);
                    interp.run_until(co, floor)?
                }
            };
            Ok(replacement_value_to_string(results.into_iter().next().unwrap_or(Value::Nil), whole))
        }
        other => Err(ControlFlow::Error(LuaError::new(
            ErrorKind::TypeError,
            format!("bad argument #3 to 'gsub' (string/function/table expected, got {})", other.type_name()),
        ))),
    }
}

fn replacement_value_to_string(v: Value, whole: &str) -> String {
    match v {
        Value::Nil | Value::Bool(false) => whole.to_string(),
        Value::Str(s) => s.as_str().to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Float(f) => super::format_float(f),
        _ => whole.to_string(),
    }
}

fn expand_backrefs(template: &str, whole: &str, caps: &[Value]) -> String {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('0') => out.push_str(whole),
            Some(d) if d.is_ascii_digit() => {
                let idx = d.to_digit(10).unwrap() as usize;
                if idx == 0 {
                    out.push_str(whole);
                } else if let Some(v) = caps.get(idx - 1) {
                    out.push_str(&super::raw_tostring(v));
                } else if idx == 1 && caps.is_empty() {
                    out.push_str(whole);
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
