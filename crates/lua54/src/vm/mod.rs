//! The runtime: instruction encoding, opcodes, call frames, coroutines,
//! metamethod dispatch, debug hooks, and the executor itself (spec §4.8-4.12,
//! §5).

pub mod coroutine;
pub mod debug_hook;
pub mod error;
pub mod exec;
pub mod frame;
pub mod instruction;
pub mod metamethod;
pub mod opcode;
pub mod state;

pub use error::{ControlFlow, ErrorKind, LuaError, LuaResult};
pub use opcode::OpCode;
pub use state::{Interpreter, NativeFn};
