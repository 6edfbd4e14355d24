//! `GETTABLE`/`SETTABLE`/`SELF` with `__index`/`__newindex` chains (spec
//! §4.8, §6.3).

use crate::value::Value;
use crate::vm::error::{ControlFlow, ErrorKind, LuaError};
use crate::vm::metamethod::{self, MM_INDEX, MM_NEWINDEX};

/// Outcome of one step of index resolution: either the final value, or one
/// more metamethod hop to follow (either a plain value to re-index, or a
/// function/callable the dispatcher must invoke with `(table, key)`).
pub enum IndexStep {
    Value(Value),
    CallHandler(Value),
    Chain(Value),
}

const MAX_METATABLE_CHAIN: u32 = 100;

/// One step of `t[k]` resolution (spec §4.8 "GETTABLE ... with __index").
/// Callers loop this (bounded by `MAX_METATABLE_CHAIN`) until `Value` or
/// `CallHandler` comes back.
pub fn index_step(target: &Value, key: &Value) -> Result<IndexStep, ControlFlow> {
    if let Value::Table(t) = target {
        let raw = t.borrow().get(key);
        if !raw.is_nil() {
            return Ok(IndexStep::Value(raw));
        }
        match metamethod::lookup(target, MM_INDEX) {
            Some(Value::Table(_)) => {
                let handler = metamethod::lookup(target, MM_INDEX).unwrap();
                Ok(IndexStep::Chain(handler))
            }
            Some(handler) if handler.is_callable() => Ok(IndexStep::CallHandler(handler)),
            Some(other) => Ok(IndexStep::Chain(other)),
            None => Ok(IndexStep::Value(Value::Nil)),
        }
    } else {
        match metamethod::lookup(target, MM_INDEX) {
            Some(handler) if handler.is_callable() => Ok(IndexStep::CallHandler(handler)),
            Some(other) => Ok(IndexStep::Chain(other)),
            None => Err(ControlFlow::Error(LuaError::type_error("index", target.type_name(), None))),
        }
    }
}

pub fn index_full(mut target: Value, key: &Value) -> Result<IndexResolution, ControlFlow> {
    for _ in 0..MAX_METATABLE_CHAIN {
        match index_step(&target, key)? {
            IndexStep::Value(v) => return Ok(IndexResolution::Value(v)),
            IndexStep::CallHandler(f) => return Ok(IndexResolution::Call(f)),
            IndexStep::Chain(next) => target = next,
        }
    }
    Err(ControlFlow::Error(LuaError::internal("'__index' chain too long; possible loop")))
}

pub enum IndexResolution {
    Value(Value),
    /// The dispatcher must call `f(target, key)` and use its first result.
    Call(Value),
}

pub enum NewIndexStep {
    Done,
    CallHandler(Value),
    Chain(Value),
}

/// One step of `t[k] = v` resolution (spec §4.8 "SETTABLE ... with
/// __newindex").
pub fn newindex_step(target: &Value, key: &Value, value: Value) -> Result<NewIndexStep, ControlFlow> {
    if let Value::Table(t) = target {
        let has_raw = !t.borrow().get(key).is_nil();
        if has_raw {
            t.borrow_mut()
                .set(key.clone(), value)
                .map_err(|msg| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, msg)))?;
            return Ok(NewIndexStep::Done);
        }
        match metamethod::lookup(target, MM_NEWINDEX) {
            Some(Value::Table(_)) => Ok(NewIndexStep::Chain(metamethod::lookup(target, MM_NEWINDEX).unwrap())),
            Some(handler) if handler.is_callable() => Ok(NewIndexStep::CallHandler(handler)),
            Some(other) => Ok(NewIndexStep::Chain(other)),
            None => {
                t.borrow_mut()
                    .set(key.clone(), value)
                    .map_err(|msg| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, msg)))?;
                Ok(NewIndexStep::Done)
            }
        }
    } else {
        match metamethod::lookup(target, MM_NEWINDEX) {
            Some(handler) if handler.is_callable() => Ok(NewIndexStep::CallHandler(handler)),
            Some(other) => Ok(NewIndexStep::Chain(other)),
            None => Err(ControlFlow::Error(LuaError::type_error("index", target.type_name(), None))),
        }
    }
}
