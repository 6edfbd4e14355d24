//! Numeric and generic `for` loops (spec §4.7, §4.8 "Loops").

use crate::value::Value;
use crate::vm::error::{ControlFlow, ErrorKind, LuaError, LuaResult};

/// The three control values of a numeric `for`, normalized to a single
/// representation (spec §4.7: "If all three control values are integers the
/// loop runs in integer arithmetic ... otherwise in floats").
pub enum ForState {
    Int { index: i64, limit: i64, step: i64 },
    Float { index: f64, limit: f64, step: f64 },
}

/// `FORPREP`: validates `step ≠ 0` and decides integer-vs-float mode, then
/// produces the first loop value (or `None` if the loop body never runs,
/// e.g. `for i=1,0 do`).
pub fn for_prep(init: &Value, limit: &Value, step: &Value) -> LuaResult<Option<ForState>> {
    let step_is_zero = match step.as_number() {
        Some(n) => n == 0.0,
        None => return Err(type_err()),
    };
    if step_is_zero {
        return Err(ControlFlow::Error(LuaError::new(ErrorKind::DivByZero, "'for' step is zero")));
    }

    if let (Value::Integer(i), Value::Integer(s)) = (init, step) {
        let limit_i = match limit {
            Value::Integer(l) => *l,
            Value::Float(l) => clamp_float_limit(*l, *s),
            _ => return Err(type_err()),
        };
        let state = ForState::Int { index: *i, limit: limit_i, step: *s };
        return Ok(if loop_continues_int(*i, limit_i, *s) { Some(state) } else { None });
    }

    let (Some(i), Some(l), Some(s)) = (init.as_number(), limit.as_number(), step.as_number()) else {
        return Err(type_err());
    };
    let state = ForState::Float { index: i, limit: l, step: s };
    Ok(if loop_continues_float(i, l, s) { Some(state) } else { None })
}

fn clamp_float_limit(limit: f64, step: i64) -> i64 {
    if step > 0 {
        limit.floor() as i64
    } else {
        limit.ceil() as i64
    }
}

fn type_err() -> ControlFlow {
    ControlFlow::Error(LuaError::new(ErrorKind::TypeError, "'for' initial value must be a number"))
}

fn loop_continues_int(index: i64, limit: i64, step: i64) -> bool {
    if step > 0 { index <= limit } else { index >= limit }
}

fn loop_continues_float(index: f64, limit: f64, step: f64) -> bool {
    if step > 0.0 { index <= limit } else { index >= limit }
}

/// `FORLOOP`: advances the control variable, returns `Some(next_index)`
/// while the loop continues, `None` on exit. Integer mode wraps per spec
/// (spec §8: "`Long.MIN_VALUE + Long.MIN_VALUE`... wraps").
pub fn for_loop(state: &ForState) -> (Value, Option<ForState>) {
    match state {
        ForState::Int { index, limit, step } => {
            let next = index.wrapping_add(*step);
            let current = Value::Integer(*index);
            if loop_continues_int(next, *limit, *step) {
                (current, Some(ForState::Int { index: next, limit: *limit, step: *step }))
            } else {
                (current, None)
            }
        }
        ForState::Float { index, limit, step } => {
            let next = index + step;
            let current = Value::Float(*index);
            if loop_continues_float(next, *limit, *step) {
                (current, Some(ForState::Float { index: next, limit: *limit, step: *step }))
            } else {
                (current, None)
            }
        }
    }
}

impl ForState {
    pub fn current_value(&self) -> Value {
        match self {
            ForState::Int { index, .. } => Value::Integer(*index),
            ForState::Float { index, .. } => Value::Float(*index),
        }
    }
}
