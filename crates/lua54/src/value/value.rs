//! The Lua value taxonomy (spec §3 "Value taxonomy").
//!
//! `Value = Nil | Bool | Integer(i64) | Float(f64) | String | Table | Function
//! | Userdata | Thread`. Heap-allocated variants are `Rc`-backed rather than
//! tracked by a tracing collector: the Non-goals explicitly waive incremental
//! GC in favor of "the host language's reclamation", and `Rc` is that
//! reclamation mechanism for this host language.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::closure::LuaClosure;
use crate::value::lua_string::LuaString;
use crate::value::table::LuaTable;
use crate::vm::coroutine::Coroutine;
use crate::vm::state::NativeFn;

/// A Lua value. `Clone` is a shallow `Rc` clone for heap variants, matching
/// Lua's by-reference semantics for tables/functions/strings/threads.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Str(Rc<LuaString>),
    Table(Rc<RefCell<LuaTable>>),
    Function(Rc<LuaClosure>),
    Native(Rc<NativeFn>),
    Userdata(Rc<RefCell<UserData>>),
    Thread(Rc<RefCell<Coroutine>>),
}

/// Opaque host userdata: an arbitrary payload plus an optional metatable.
pub struct UserData {
    pub payload: Box<dyn std::any::Any>,
    pub metatable: Option<Rc<RefCell<LuaTable>>>,
    pub type_name: &'static str,
}

impl Value {
    pub fn nil() -> Self {
        Value::Nil
    }

    pub fn boolean(b: bool) -> Self {
        Value::Bool(b)
    }

    pub fn integer(i: i64) -> Self {
        Value::Integer(i)
    }

    pub fn float(n: f64) -> Self {
        Value::Float(n)
    }

    pub fn table(t: Rc<RefCell<LuaTable>>) -> Self {
        Value::Table(t)
    }

    pub fn new_table() -> Self {
        Value::Table(Rc::new(RefCell::new(LuaTable::new())))
    }

    /// Lua truthiness: everything is truthy except `nil` and `false`.
    #[inline]
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Integer(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Value::Table(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, Value::Thread(_))
    }

    pub fn as_table(&self) -> Option<&Rc<RefCell<LuaTable>>> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// `math.type(v) == "integer" | "float" | nil`
    pub fn math_type(&self) -> Option<&'static str> {
        match self {
            Value::Integer(_) => Some("integer"),
            Value::Float(_) => Some("float"),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) | Value::Native(_) => "function",
            Value::Userdata(_) => "userdata",
            Value::Thread(_) => "thread",
        }
    }

    /// Numeric value as `f64`, coercing `Integer`. Does not coerce strings —
    /// that coercion only happens in arithmetic/comparison contexts (spec §3).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_integer_exact(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 => {
                Some(*f as i64)
            }
            _ => None,
        }
    }

    /// Attempt string-to-number coercion, used only by arithmetic/comparison
    /// opcodes (spec §3: "String-to-number coercion is attempted only in
    /// arithmetic and comparison contexts").
    pub fn coerce_to_number(&self) -> Option<Value> {
        match self {
            Value::Integer(_) | Value::Float(_) => Some(self.clone()),
            Value::Str(s) => crate::compiler::lexer::parse_lua_number(s.as_str().trim()),
            _ => None,
        }
    }

    /// Raw (metamethod-free) equality, used by table keys and `rawequal`.
    pub fn raw_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Integer(a), Float(b)) | (Float(b), Integer(a)) => (*a as f64) == *b,
            (Str(a), Str(b)) => a.as_str() == b.as_str(),
            (Table(a), Table(b)) => Rc::ptr_eq(a, b),
            (Function(a), Function(b)) => Rc::ptr_eq(a, b),
            (Native(a), Native(b)) => Rc::ptr_eq(a, b),
            (Userdata(a), Userdata(b)) => Rc::ptr_eq(a, b),
            (Thread(a), Thread(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn metatable(&self) -> Option<Rc<RefCell<LuaTable>>> {
        match self {
            Value::Table(t) => t.borrow().metatable(),
            Value::Userdata(u) => u.borrow().metatable.clone(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{:?}", s.as_str()),
            Value::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Value::Function(c) => write!(f, "function: {:p}", Rc::as_ptr(c)),
            Value::Native(n) => write!(f, "function: builtin: {:p}", Rc::as_ptr(n)),
            Value::Userdata(u) => write!(f, "userdata: {:p}", Rc::as_ptr(u)),
            Value::Thread(t) => write!(f, "thread: {:p}", Rc::as_ptr(t)),
        }
    }
}

/// Hashable/comparable wrapper used as table keys (spec §3 "Table"): integer
/// keys and float keys with integer value compare equal, `NaN` is rejected
/// before it ever reaches here (callers must check `is_valid_key`).
#[derive(Clone)]
pub struct TableKey(pub Value);

impl TableKey {
    /// Normalizes float keys with an integer value to `Integer`, so `t[1]`
    /// and `t[1.0]` address the same slot (spec §3).
    pub fn normalize(v: Value) -> Option<TableKey> {
        match v {
            Value::Nil => None,
            Value::Float(f) if f.is_nan() => None,
            Value::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Some(TableKey(Value::Integer(f as i64)))
            }
            other => Some(TableKey(other)),
        }
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.raw_eq(&other.0)
    }
}
impl Eq for TableKey {}

impl std::hash::Hash for TableKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Nil => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Integer(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                // unreachable after normalize() for integer-valued floats;
                // non-integer floats hash on their bit pattern.
                2u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::Str(s) => {
                3u8.hash(state);
                s.as_str().hash(state);
            }
            Value::Table(t) => {
                4u8.hash(state);
                (Rc::as_ptr(t) as usize).hash(state);
            }
            Value::Function(c) => {
                5u8.hash(state);
                (Rc::as_ptr(c) as usize).hash(state);
            }
            Value::Native(n) => {
                6u8.hash(state);
                (Rc::as_ptr(n) as usize).hash(state);
            }
            Value::Userdata(u) => {
                7u8.hash(state);
                (Rc::as_ptr(u) as usize).hash(state);
            }
            Value::Thread(t) => {
                8u8.hash(state);
                (Rc::as_ptr(t) as usize).hash(state);
            }
        }
    }
}
