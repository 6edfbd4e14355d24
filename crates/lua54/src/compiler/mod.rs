//! The compiler front end (C1-C6): lexing, parsing, and code generation in
//! one pass, producing a [`crate::value::Proto`] directly with no
//! intermediate syntax tree — the same shape real Lua's own `lparser.c`
//! takes, and the one `luars::compiler` departs from by building an
//! `emmylua_parser` CST first.

pub mod func_state;
pub mod lexer;
pub mod parser;

use std::rc::Rc;

use crate::value::{Proto, StringInterner};
use crate::vm::error::LuaError;

/// Compiles a top-level chunk. The main chunk is itself a vararg function
/// of zero parameters with no upvalues — `return`ing from it ends the
/// program the same way `return`ing from any other function does.
pub fn compile_chunk(source: &str, chunk_name: &str, strings: &mut StringInterner) -> Result<Rc<Proto>, LuaError> {
    parser::compile_chunk(source, chunk_name, strings)
}
