//! The data model (spec §3): values, strings, tables, compiled functions,
//! closures/upvalues, and the binary chunk format.

pub mod chunk_io;
pub mod closure;
pub mod lua_string;
pub mod proto;
pub mod table;
pub mod value;

pub use closure::{LuaClosure, Upvalue};
pub use lua_string::{LuaString, StringInterner};
pub use proto::{LineEvent, LineEventKind, LocalVarInfo, Proto, UpvalueDesc};
pub use table::LuaTable;
pub use value::{TableKey, UserData, Value};
