//! Comparison opcodes (spec §4.9 "Comparisons: `__eq` only fires when both
//! operands are tables with the *same* `__eq`; `__lt` is tried on either
//! operand; `__le` falls back to `not (b < a)` when absent").

use crate::value::Value;
use crate::vm::error::{ControlFlow, LuaError};
use crate::vm::metamethod;

/// Raw `==`. Returns the final answer for every case that doesn't need a
/// `__eq` call (numbers, strings, booleans, nil, and reference identity for
/// heap types); the dispatcher only reaches for `metamethod::eq_metamethod`
/// when this returns `false` for two tables/userdata.
pub fn raw_eq(lhs: &Value, rhs: &Value) -> bool {
    lhs.raw_eq(rhs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumOrd {
    Less,
    Equal,
    Greater,
}

fn numeric_cmp(lhs: &Value, rhs: &Value) -> Option<NumOrd> {
    let a = lhs.as_number()?;
    let b = rhs.as_number()?;
    if a < b {
        Some(NumOrd::Less)
    } else if a > b {
        Some(NumOrd::Greater)
    } else {
        Some(NumOrd::Equal)
    }
}

/// Raw `<` for numbers/strings; `Ok(None)` signals the dispatcher should
/// try `__lt`.
pub fn raw_lt(lhs: &Value, rhs: &Value) -> Option<bool> {
    if let Some(ord) = numeric_cmp(lhs, rhs) {
        return Some(ord == NumOrd::Less);
    }
    if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
        return Some(a.as_str() < b.as_str());
    }
    None
}

pub fn raw_le(lhs: &Value, rhs: &Value) -> Option<bool> {
    if let Some(ord) = numeric_cmp(lhs, rhs) {
        return Some(ord != NumOrd::Greater);
    }
    if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
        return Some(a.as_str() <= b.as_str());
    }
    None
}

pub fn compare_type_error(lhs: &Value, rhs: &Value) -> ControlFlow {
    let message = if lhs.type_name() == rhs.type_name() {
        format!("attempt to compare two {} values", lhs.type_name())
    } else {
        format!("attempt to compare {} with {}", lhs.type_name(), rhs.type_name())
    };
    ControlFlow::Error(LuaError::new(crate::vm::error::ErrorKind::TypeError, message))
}

pub const MM_LT: &str = metamethod::MM_LT;
pub const MM_LE: &str = metamethod::MM_LE;
