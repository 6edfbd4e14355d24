//! `math.*` (grounded on `luars::stdlib::math`, trimmed to the integer/
//! float numeric-tower operations plus the common transcendental set).

use std::cell::Cell;

use crate::stdlib::base::arg;
use crate::value::Value;
use crate::vm::error::LuaResult;
use crate::vm::state::Interpreter;

thread_local! {
    // A simple xorshift PRNG is enough for `math.random`; no reproducibility
    // requirement on it and no need to pull in `rand` for this.
    static RNG_STATE: Cell<u64> = Cell::new(0x2545F4914F6CDD1D);
}

fn next_random_u64() -> u64 {
    RNG_STATE.with(|cell| {
        let mut x = cell.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        cell.set(x);
        x
    })
}

pub fn register(interp: &mut Interpreter) {
    let table = super::new_library(
        interp,
        "math",
        &[
            ("abs", lua_abs),
            ("ceil", lua_ceil),
            ("floor", lua_floor),
            ("sqrt", lua_sqrt),
            ("sin", lua_sin),
            ("cos", lua_cos),
            ("tan", lua_tan),
            ("exp", lua_exp),
            ("log", lua_log),
            ("pow", lua_pow),
            ("max", lua_max),
            ("min", lua_min),
            ("fmod", lua_fmod),
            ("modf", lua_modf),
            ("tointeger", lua_tointeger),
            ("type", lua_type),
            ("random", lua_random),
            ("randomseed", lua_randomseed),
            ("ult", lua_ult),
        ],
    );
    let mut t = table.borrow_mut();
    let _ = t.set(interp.intern("pi"), Value::Float(std::f64::consts::PI));
    let _ = t.set(interp.intern("huge"), Value::Float(f64::INFINITY));
    let _ = t.set(interp.intern("maxinteger"), Value::Integer(i64::MAX));
    let _ = t.set(interp.intern("mininteger"), Value::Integer(i64::MIN));
}

fn num(v: &Value) -> Option<f64> {
    v.coerce_to_number().and_then(|n| n.as_number())
}

fn lua_abs(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    Ok(vec![match arg(args, 0) {
        Value::Integer(i) => Value::Integer(i.wrapping_abs()),
        other => Value::Float(num(&other).unwrap_or(f64::NAN).abs()),
    }])
}

fn lua_ceil(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let v = arg(args, 0);
    if let Value::Integer(i) = v {
        return Ok(vec![Value::Integer(i)]);
    }
    Ok(vec![Value::Integer(num(&v).unwrap_or(f64::NAN).ceil() as i64)])
}

fn lua_floor(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let v = arg(args, 0);
    if let Value::Integer(i) = v {
        return Ok(vec![Value::Integer(i)]);
    }
    Ok(vec![Value::Integer(num(&v).unwrap_or(f64::NAN).floor() as i64)])
}

fn lua_sqrt(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    Ok(vec![Value::Float(num(&arg(args, 0)).unwrap_or(f64::NAN).sqrt())])
}

fn lua_sin(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    Ok(vec![Value::Float(num(&arg(args, 0)).unwrap_or(f64::NAN).sin())])
}

fn lua_cos(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    Ok(vec![Value::Float(num(&arg(args, 0)).unwrap_or(f64::NAN).cos())])
}

fn lua_tan(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    Ok(vec![Value::Float(num(&arg(args, 0)).unwrap_or(f64::NAN).tan())])
}

fn lua_exp(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    Ok(vec![Value::Float(num(&arg(args, 0)).unwrap_or(f64::NAN).exp())])
}

fn lua_log(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let x = num(&arg(args, 0)).unwrap_or(f64::NAN);
    let result = match args.get(1).and_then(num) {
        Some(base) => x.log(base),
        None => x.ln(),
    };
    Ok(vec![Value::Float(result)])
}

fn lua_pow(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let x = num(&arg(args, 0)).unwrap_or(f64::NAN);
    let y = num(&arg(args, 1)).unwrap_or(f64::NAN);
    Ok(vec![Value::Float(x.powf(y))])
}

fn lua_max(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let mut best = arg(args, 0);
    for v in &args[1..] {
        let is_greater = match (v, &best) {
            (Value::Integer(a), Value::Integer(b)) => a > b,
            _ => num(v).unwrap_or(f64::NAN) > num(&best).unwrap_or(f64::NAN),
        };
        if is_greater {
            best = v.clone();
        }
    }
    Ok(vec![best])
}

fn lua_min(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let mut best = arg(args, 0);
    for v in &args[1..] {
        let is_less = match (v, &best) {
            (Value::Integer(a), Value::Integer(b)) => a < b,
            _ => num(v).unwrap_or(f64::NAN) < num(&best).unwrap_or(f64::NAN),
        };
        if is_less {
            best = v.clone();
        }
    }
    Ok(vec![best])
}

fn lua_fmod(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    if let (Value::Integer(a), Value::Integer(b)) = (arg(args, 0), arg(args, 1)) {
        if b == 0 {
            return Err(crate::vm::error::ControlFlow::Error(crate::vm::error::LuaError::new(
                crate::vm::error::ErrorKind::DivByZero,
                "bad argument #2 to 'fmod' (zero)",
            )));
        }
        return Ok(vec![Value::Integer(a.wrapping_rem(b))]);
    }
    let x = num(&arg(args, 0)).unwrap_or(f64::NAN);
    let y = num(&arg(args, 1)).unwrap_or(f64::NAN);
    Ok(vec![Value::Float(x % y)])
}

fn lua_modf(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let x = num(&arg(args, 0)).unwrap_or(f64::NAN);
    let int_part = x.trunc();
    Ok(vec![Value::Float(int_part), Value::Float(x - int_part)])
}

fn lua_tointeger(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    Ok(vec![arg(args, 0).as_integer_exact().map(Value::Integer).unwrap_or(Value::Nil)])
}

fn lua_type(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    Ok(vec![match arg(args, 0).math_type() {
        Some(name) => Value::Str(std::rc::Rc::new(crate::value::LuaString::from_owned(name.to_string()))),
        None => Value::Nil,
    }])
}

fn lua_random(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let r = next_random_u64();
    match args.len() {
        0 => Ok(vec![Value::Float((r >> 11) as f64 / (1u64 << 53) as f64)]),
        1 => {
            let m = arg(args, 0).as_integer_exact().unwrap_or(1);
            Ok(vec![Value::Integer(1 + (r % m.max(1) as u64) as i64)])
        }
        _ => {
            let lo = arg(args, 0).as_integer_exact().unwrap_or(1);
            let hi = arg(args, 1).as_integer_exact().unwrap_or(lo);
            let span = (hi - lo + 1).max(1) as u64;
            Ok(vec![Value::Integer(lo + (r % span) as i64)])
        }
    }
}

fn lua_randomseed(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let seed = arg(args, 0).as_integer_exact().unwrap_or(0) as u64;
    RNG_STATE.with(|cell| cell.set(seed.wrapping_mul(2685821657736338717).max(1)));
    Ok(Vec::new())
}

fn lua_ult(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let a = arg(args, 0).as_integer_exact().unwrap_or(0) as u64;
    let b = arg(args, 1).as_integer_exact().unwrap_or(0) as u64;
    Ok(vec![Value::Bool(a < b)])
}
