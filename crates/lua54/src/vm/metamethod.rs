//! Metamethod dispatch (spec §4.9 "Metamethods (C9) & Error Chaining").

use crate::value::Value;

/// `rawget(metatable(v), "__name")` — the one primitive every metamethod
/// lookup bottoms out to (spec §4.9).
pub fn lookup(v: &Value, name: &str) -> Option<Value> {
    let mt = v.metatable()?;
    let mt = mt.borrow();
    let found = mt.get_str(name);
    if found.is_nil() {
        None
    } else {
        Some(found)
    }
}

/// Binary-operator metamethod resolution order: left operand first, then
/// right (spec §4.9 "Binary operators try the left operand first, then the
/// right").
pub fn lookup_binary(lhs: &Value, rhs: &Value, name: &str) -> Option<Value> {
    lookup(lhs, name).or_else(|| lookup(rhs, name))
}

pub const MM_INDEX: &str = "__index";
pub const MM_NEWINDEX: &str = "__newindex";
pub const MM_CALL: &str = "__call";
pub const MM_ADD: &str = "__add";
pub const MM_SUB: &str = "__sub";
pub const MM_MUL: &str = "__mul";
pub const MM_DIV: &str = "__div";
pub const MM_MOD: &str = "__mod";
pub const MM_POW: &str = "__pow";
pub const MM_IDIV: &str = "__idiv";
pub const MM_BAND: &str = "__band";
pub const MM_BOR: &str = "__bor";
pub const MM_BXOR: &str = "__bxor";
pub const MM_BNOT: &str = "__bnot";
pub const MM_SHL: &str = "__shl";
pub const MM_SHR: &str = "__shr";
pub const MM_UNM: &str = "__unm";
pub const MM_LEN: &str = "__len";
pub const MM_CONCAT: &str = "__concat";
pub const MM_EQ: &str = "__eq";
pub const MM_LT: &str = "__lt";
pub const MM_LE: &str = "__le";
pub const MM_CLOSE: &str = "__close";
pub const MM_TOSTRING: &str = "__tostring";

pub fn arith_metamethod(op: &str) -> &'static str {
    match op {
        "+" => MM_ADD,
        "-" => MM_SUB,
        "*" => MM_MUL,
        "/" => MM_DIV,
        "%" => MM_MOD,
        "^" => MM_POW,
        "//" => MM_IDIV,
        "&" => MM_BAND,
        "|" => MM_BOR,
        "~" => MM_BXOR,
        "<<" => MM_SHL,
        ">>" => MM_SHR,
        _ => unreachable!("not an arithmetic operator: {op}"),
    }
}

/// Whether `__eq` is even attempted: spec §4.9 "`__eq` only fires when both
/// operands are tables with the *same* `__eq`".
pub fn eq_metamethod(lhs: &Value, rhs: &Value) -> Option<Value> {
    if !lhs.is_table() || !rhs.is_table() {
        return None;
    }
    let a = lookup(lhs, MM_EQ)?;
    let b = lookup(rhs, MM_EQ)?;
    if a.raw_eq(&b) {
        Some(a)
    } else {
        None
    }
}
