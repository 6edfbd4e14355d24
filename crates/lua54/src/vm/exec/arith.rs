//! Arithmetic, bitwise, unary, length, and concat opcodes (spec §4.8
//! "Arithmetic/Bitwise/Compare"). Grounded on the shape of the teacher's
//! `execute/arithmetic_instructions.rs` (coerce-then-dispatch-then-fall-
//! back-to-metamethod), simplified to match this crate's safe `Value` enum
//! instead of the teacher's tagged union.

use crate::value::Value;
use crate::vm::error::{ControlFlow, ErrorKind, LuaError, LuaResult};
use crate::vm::metamethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    IDiv,
    Band,
    Bor,
    Bxor,
    Shl,
    Shr,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
            ArithOp::Pow => "^",
            ArithOp::IDiv => "//",
            ArithOp::Band => "&",
            ArithOp::Bor => "|",
            ArithOp::Bxor => "~",
            ArithOp::Shl => "<<",
            ArithOp::Shr => ">>",
        }
    }

    fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::Band | ArithOp::Bor | ArithOp::Bxor | ArithOp::Shl | ArithOp::Shr
        )
    }

    /// `/` and `^` always operate (and yield) in float; everything else
    /// stays integer when both operands are integers (spec §4.8).
    fn always_float(self) -> bool {
        matches!(self, ArithOp::Div | ArithOp::Pow)
    }
}

/// Raw numeric binary op; returns `Ok(None)` when neither operand is a
/// coercible number (caller falls back to metamethod lookup).
pub fn try_numeric(op: ArithOp, lhs: &Value, rhs: &Value) -> LuaResult<Option<Value>> {
    let (Some(a), Some(b)) = (lhs.coerce_to_number(), rhs.coerce_to_number()) else {
        return Ok(None);
    };

    if op.is_bitwise() {
        let (Some(ai), Some(bi)) = (a.as_integer_exact(), b.as_integer_exact()) else {
            return Err(ControlFlow::Error(LuaError::type_error(
                "perform bitwise operation on",
                "number with no integer representation",
                None,
            )));
        };
        let result = match op {
            ArithOp::Band => ai & bi,
            ArithOp::Bor => ai | bi,
            ArithOp::Bxor => ai ^ bi,
            ArithOp::Shl => shift_left(ai, bi),
            ArithOp::Shr => shift_left(ai, -bi),
            _ => unreachable!(),
        };
        return Ok(Some(Value::Integer(result)));
    }

    if !op.always_float() {
        if let (Value::Integer(ai), Value::Integer(bi)) = (&a, &b) {
            return Ok(Some(integer_arith(op, *ai, *bi)?));
        }
    }

    let af = a.as_number().unwrap();
    let bf = b.as_number().unwrap();
    Ok(Some(Value::Float(float_arith(op, af, bf))))
}

/// `<<`/`>>` with out-of-range shift counts yield 0, matching Lua 5.4's
/// `luaV_shiftl`.
fn shift_left(value: i64, shift: i64) -> i64 {
    if shift <= -64 || shift >= 64 {
        0
    } else if shift >= 0 {
        ((value as u64) << shift) as i64
    } else {
        ((value as u64) >> (-shift)) as i64
    }
}

fn integer_arith(op: ArithOp, a: i64, b: i64) -> LuaResult<Value> {
    let result = match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Mod => {
            if b == 0 {
                return Err(ControlFlow::Error(LuaError::new(
                    ErrorKind::DivByZero,
                    "attempt to perform 'n%0'",
                )));
            }
            let r = a.wrapping_rem(b);
            if r != 0 && (r ^ b) < 0 { r + b } else { r }
        }
        ArithOp::IDiv => {
            if b == 0 {
                return Err(ControlFlow::Error(LuaError::new(
                    ErrorKind::DivByZero,
                    "attempt to perform 'n//0'",
                )));
            }
            let q = a.wrapping_div(b);
            if (a % b != 0) && ((a ^ b) < 0) { q - 1 } else { q }
        }
        _ => unreachable!("float-only or bitwise op reached integer_arith"),
    };
    Ok(Value::Integer(result))
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Pow => a.powf(b),
        ArithOp::Mod => {
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        }
        ArithOp::IDiv => (a / b).floor(),
        _ => unreachable!("bitwise op reached float_arith"),
    }
}

/// Raises the "attempt to perform arithmetic on a `<type>` value" error once
/// the dispatcher has confirmed no metamethod handles this operation (spec
/// §4.8: "Any non-numeric operand triggers `__add`/`__sub`/... metamethod
/// lookup on either operand; if none, ...").
pub fn arith_type_error(lhs: &Value, rhs: &Value) -> ControlFlow {
    let offender = if lhs.coerce_to_number().is_none() { lhs } else { rhs };
    ControlFlow::Error(LuaError::type_error("perform arithmetic on", offender.type_name(), None))
}

pub fn arith_metamethod_name(op: ArithOp) -> &'static str {
    metamethod::arith_metamethod(op.symbol())
}

pub fn unary_minus(v: &Value) -> LuaResult<Option<Value>> {
    match v.coerce_to_number() {
        Some(Value::Integer(i)) => Ok(Some(Value::Integer(i.wrapping_neg()))),
        Some(Value::Float(f)) => Ok(Some(Value::Float(-f))),
        _ => Ok(None),
    }
}

pub fn bitwise_not(v: &Value) -> LuaResult<Option<Value>> {
    match v.coerce_to_number().and_then(|n| n.as_integer_exact()) {
        Some(i) => Ok(Some(Value::Integer(!i))),
        None => Ok(None),
    }
}

/// `#v` for non-table, non-string operands must go through `__len`; this
/// covers the raw string/table case (spec §4.8 "LEN").
pub fn raw_length(v: &Value) -> Option<i64> {
    match v {
        Value::Str(s) => Some(s.len() as i64),
        Value::Table(t) => Some(t.borrow().length()),
        _ => None,
    }
}

/// `CONCAT dst, from, to`: `RK[from..to]` joined with Lua's `tostring`
/// coercion rules (numbers stringify, nothing else implicitly does).
pub fn concat_coerce(v: &Value) -> Option<String> {
    match v {
        Value::Str(s) => Some(s.as_str().to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(crate::stdlib::format_float(*f)),
        _ => None,
    }
}
