//! `io.*`: the filesystem capability is a `FileSystem` trait with an
//! in-memory test double and a real-OS default. Grounded on
//! `luars::stdlib::io`'s table-of-file-handles shape, re-expressed over
//! that trait so tests never touch the real filesystem.
//!
//! Only the common subset is implemented: `io.write`/`io.read` against
//! stdout/stdin, and `io.open` producing a file-handle table with
//! `read`/`write`/`close`/`lines` methods backed by an open [`FileHandle`].
//! Binary-mode/seek operations are out of scope.

use std::cell::RefCell;
use std::io::{BufRead, Read, Write};
use std::rc::Rc;

use crate::stdlib::base::arg;
use crate::value::{LuaTable, Value};
use crate::vm::error::{ControlFlow, ErrorKind, LuaError, LuaResult};
use crate::vm::state::{Interpreter, NativeFn};

/// Abstraction over the filesystem `io.open` ultimately calls through,
/// so test code can swap in [`InMemoryFileSystem`] instead of touching
/// real files.
pub trait FileSystem {
    fn read_to_string(&self, path: &str) -> std::io::Result<String>;
    fn write_all(&mut self, path: &str, append: bool, data: &str) -> std::io::Result<()>;
}

/// The default, process-lifetime filesystem: ordinary `std::fs` calls.
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write_all(&mut self, path: &str, append: bool, data: &str) -> std::io::Result<()> {
        use std::fs::OpenOptions;
        let mut file = OpenOptions::new().write(true).create(true).append(append).truncate(!append).open(path)?;
        file.write_all(data.as_bytes())
    }
}

/// An in-memory filesystem double for tests — no real I/O, fully
/// deterministic, matching this crate's `#[cfg(test)]` convention of
/// avoiding host side effects.
#[derive(Default)]
pub struct InMemoryFileSystem {
    pub files: std::collections::HashMap<String, String>,
}

impl FileSystem for InMemoryFileSystem {
    fn read_to_string(&self, path: &str) -> std::io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
    }

    fn write_all(&mut self, path: &str, append: bool, data: &str) -> std::io::Result<()> {
        let entry = self.files.entry(path.to_string()).or_default();
        if !append {
            entry.clear();
        }
        entry.push_str(data);
        Ok(())
    }
}

pub fn register(interp: &mut Interpreter) {
    super::new_library(
        interp,
        "io",
        &[("write", lua_write), ("read", lua_read), ("open", lua_open), ("close", lua_close), ("lines", lua_lines)],
    );
}

fn lua_write(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    for v in args {
        let piece = match v {
            Value::Str(s) => s.as_str().to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Float(f) => super::format_float(*f),
            other => {
                return Err(ControlFlow::Error(LuaError::new(
                    ErrorKind::TypeError,
                    format!("invalid argument to 'write' (string expected, got {})", other.type_name()),
                )))
            }
        };
        let _ = handle.write_all(piece.as_bytes());
    }
    Ok(Vec::new())
}

fn lua_read(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let fmt = args.first().and_then(|v| v.as_str()).unwrap_or("l");
    let fmt = fmt.trim_start_matches('*');
    let stdin = std::io::stdin();
    match fmt {
        "l" | "L" => {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => Ok(vec![Value::Nil]),
                Ok(_) => {
                    if fmt == "l" && line.ends_with('\n') {
                        line.pop();
                        if line.ends_with('\r') {
                            line.pop();
                        }
                    }
                    Ok(vec![interp.intern(&line)])
                }
                Err(_) => Ok(vec![Value::Nil]),
            }
        }
        "n" => {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => Ok(vec![Value::Nil]),
                Ok(_) => Ok(vec![crate::compiler::lexer::parse_lua_number(line.trim()).unwrap_or(Value::Nil)]),
                Err(_) => Ok(vec![Value::Nil]),
            }
        }
        "a" => {
            let mut all = String::new();
            let _ = stdin.lock().read_to_string(&mut all);
            Ok(vec![interp.intern(&all)])
        }
        _ => Ok(vec![Value::Nil]),
    }
}

/// Builds the file-handle table `io.open` returns: a plain Lua table whose
/// `read`/`write`/`close`/`lines` fields are natives closing over the
/// contents via an interior `Rc<RefCell<FileHandle>>` stashed at a
/// non-Lua-reachable key, the same closure-substitute used by
/// `coroutine.wrap` and `string.gmatch`.
struct FileHandle {
    contents: String,
    pos: usize,
    path: String,
    append: bool,
}

fn lua_open(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let path = arg(args, 0);
    let path = path.as_str().unwrap_or("").to_string();
    let mode = args.get(1).and_then(|v| v.as_str()).unwrap_or("r").to_string();

    let fs = RealFileSystem;
    let contents = if mode.starts_with('r') {
        match fs.read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return Ok(vec![Value::Nil, interp.intern(&e.to_string())]),
        }
    } else {
        String::new()
    };

    let handle = Rc::new(RefCell::new(FileHandle {
        contents,
        pos: 0,
        path,
        append: mode.starts_with('a'),
    }));

    let table = Rc::new(RefCell::new(LuaTable::with_capacity(0, 4)));
    register_handle_methods(interp, &table, handle);
    Ok(vec![Value::Table(table)])
}

thread_local! {
    static HANDLES: RefCell<Vec<Rc<RefCell<FileHandle>>>> = RefCell::new(Vec::new());
}

fn register_handle_methods(interp: &mut Interpreter, table: &Rc<RefCell<LuaTable>>, handle: Rc<RefCell<FileHandle>>) {
    let slot = HANDLES.with(|h| {
        let mut v = h.borrow_mut();
        v.push(handle);
        v.len() - 1
    });
    let mut tb = table.borrow_mut();
    let slot_key = interp.intern("__handle_slot");
    let _ = tb.set(slot_key, Value::Integer(slot as i64));
    let read_key = interp.intern("read");
    let _ = tb.set(read_key, Value::Native(NativeFn::new("read", handle_read)));
    let write_key = interp.intern("write");
    let _ = tb.set(write_key, Value::Native(NativeFn::new("write", handle_write)));
    let close_key = interp.intern("close");
    let _ = tb.set(close_key, Value::Native(NativeFn::new("close", handle_close)));
    let lines_key = interp.intern("lines");
    let _ = tb.set(lines_key, Value::Native(NativeFn::new("lines", handle_lines)));
}

fn handle_slot(args: &[Value]) -> LuaResult<usize> {
    let file = arg(args, 0);
    let table = file
        .as_table()
        .ok_or_else(|| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, "invalid file handle")))?;
    let slot_value = table.borrow().get_str("__handle_slot");
    slot_value
        .as_integer_exact()
        .map(|n| n as usize)
        .ok_or_else(|| ControlFlow::Error(LuaError::new(ErrorKind::TypeError, "invalid file handle")))
}

fn handle_read(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let slot = handle_slot(args)?;
    let fmt = args.get(1).and_then(|v| v.as_str()).unwrap_or("l").trim_start_matches('*').to_string();
    HANDLES.with(|h| {
        let handles = h.borrow();
        let mut handle = handles[slot].borrow_mut();
        match fmt.as_str() {
            "a" => {
                let rest = handle.contents[handle.pos..].to_string();
                handle.pos = handle.contents.len();
                Ok(vec![interp.intern(&rest)])
            }
            "l" | "L" => match read_line(&mut handle) {
                Some(mut line) => {
                    if fmt == "l" {
                        if line.ends_with('\n') {
                            line.pop();
                        }
                        if line.ends_with('\r') {
                            line.pop();
                        }
                    }
                    Ok(vec![interp.intern(&line)])
                }
                None => Ok(vec![Value::Nil]),
            },
            _ => Ok(vec![Value::Nil]),
        }
    })
}

fn read_line(handle: &mut FileHandle) -> Option<String> {
    if handle.pos >= handle.contents.len() {
        return None;
    }
    let rest = &handle.contents[handle.pos..];
    match rest.find('\n') {
        Some(idx) => {
            let line = rest[..=idx].to_string();
            handle.pos += idx + 1;
            Some(line)
        }
        None => {
            let line = rest.to_string();
            handle.pos = handle.contents.len();
            Some(line)
        }
    }
}

fn handle_write(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let slot = handle_slot(args)?;
    let pieces: Vec<String> = args[1..]
        .iter()
        .map(|v| match v {
            Value::Str(s) => s.as_str().to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Float(f) => super::format_float(*f),
            other => other.type_name().to_string(),
        })
        .collect();
    let joined = pieces.concat();
    HANDLES.with(|h| {
        let handles = h.borrow();
        let mut handle = handles[slot].borrow_mut();
        handle.contents.push_str(&joined);
        let mut fs = RealFileSystem;
        let _ = fs.write_all(&handle.path.clone(), handle.append, &joined);
    });
    Ok(vec![arg(args, 0)])
}

fn handle_close(_interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let _ = handle_slot(args)?;
    Ok(vec![Value::Bool(true)])
}

/// `file:lines()`: returns an iterator closure over remaining lines, using
/// the same state-table-plus-`__call` trick as `string.gmatch`.
fn handle_lines(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let slot = handle_slot(args)?;
    let state = Value::new_table();
    let table = state.as_table().unwrap();
    {
        let slot_key = interp.intern("__handle_slot");
        let _ = table.borrow_mut().set(slot_key, Value::Integer(slot as i64));
    }
    let metatable = Value::new_table();
    if let Some(mt) = metatable.as_table() {
        let call_fn = Value::Native(NativeFn::new("lines_iter", lines_iter_call));
        let call_key = interp.intern("__call");
        let _ = mt.borrow_mut().set(call_key, call_fn);
    }
    table.borrow_mut().set_metatable(Some(metatable.as_table().unwrap().clone()));
    Ok(vec![state])
}

fn lines_iter_call(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    let slot = handle_slot(args)?;
    HANDLES.with(|h| {
        let handles = h.borrow();
        let mut handle = handles[slot].borrow_mut();
        match read_line(&mut handle) {
            Some(mut line) => {
                if line.ends_with('\n') {
                    line.pop();
                }
                if line.ends_with('\r') {
                    line.pop();
                }
                Ok(vec![interp.intern(&line)])
            }
            None => Ok(vec![Value::Nil]),
        }
    })
}

fn lua_close(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    handle_close(interp, args)
}

/// `io.lines([filename])` (top-level convenience form): opens `filename`
/// (or reads stdin if omitted) and returns a line iterator directly.
fn lua_lines(interp: &mut Interpreter, args: &[Value]) -> LuaResult<Vec<Value>> {
    match args.first() {
        Some(path) if path.as_str().is_some() => {
            let mode = interp.intern("r");
            let opened = lua_open(interp, &[path.clone(), mode])?;
            let file = opened.into_iter().next().unwrap_or(Value::Nil);
            if file.is_nil() {
                return Err(ControlFlow::Error(LuaError::new(ErrorKind::ArgError, "cannot open file for 'lines'")));
            }
            handle_lines(interp, &[file])
        }
        _ => {
            let stdin = std::io::stdin();
            let mut all = String::new();
            let _ = stdin.lock().read_to_string(&mut all);
            let handle = Rc::new(RefCell::new(FileHandle { contents: all, pos: 0, path: String::new(), append: false }));
            let table = Rc::new(RefCell::new(LuaTable::with_capacity(0, 4)));
            register_handle_methods(interp, &table, handle);
            handle_lines(interp, &[Value::Table(table)])
        }
    }
}
