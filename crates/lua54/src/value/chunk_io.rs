//! Binary chunk format (spec §6.2). Grounded on
//! `luars::lua_value::chunk_serializer`, simplified to the fixed-width
//! encoding this crate actually needs (no byte-order/width autodetection —
//! every chunk this process writes, it can also read).

use std::rc::Rc;

use crate::value::proto::{LineEvent, LineEventKind, LocalVarInfo, Proto, UpvalueDesc};
use crate::value::value::Value;
use crate::vm::error::LuaError;

pub const SIGNATURE: [u8; 4] = [0x1B, b'L', b'u', b'a'];
pub const VERSION: u8 = 0x54;
pub const FORMAT: u8 = 0x00;
const LUAC_TAIL: [u8; 6] = [0x19, 0x93, 0x0D, 0x0A, 0x1A, 0x0A];
const TEST_INT: i64 = 0x5678;
const TEST_NUM: f64 = 370.5;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { buf: Vec::new() }
    }
    fn byte(&mut self, b: u8) {
        self.buf.push(b);
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn string(&mut self, s: &str) {
        if s.is_empty() {
            self.byte(0);
            return;
        }
        self.u32((s.len() + 1) as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }
    fn byte(&mut self) -> Result<u8, LuaError> {
        let b = *self.buf.get(self.pos).ok_or_else(truncated)?;
        self.pos += 1;
        Ok(b)
    }
    fn bytes(&mut self, n: usize) -> Result<&'a [u8], LuaError> {
        let s = self.buf.get(self.pos..self.pos + n).ok_or_else(truncated)?;
        self.pos += n;
        Ok(s)
    }
    fn u32(&mut self) -> Result<u32, LuaError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }
    fn i64(&mut self) -> Result<i64, LuaError> {
        let b = self.bytes(8)?;
        Ok(i64::from_le_bytes(b.try_into().unwrap()))
    }
    fn f64(&mut self) -> Result<f64, LuaError> {
        let b = self.bytes(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }
    fn string(&mut self) -> Result<String, LuaError> {
        let first = self.byte()?;
        if first == 0 {
            return Ok(String::new());
        }
        // Re-read as part of a u32 length (this crate always stores
        // len+1 in a 4-byte field regardless of how short the string is;
        // unread the byte we already consumed).
        self.pos -= 1;
        let len_plus1 = self.u32()?;
        let len = (len_plus1 - 1) as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| LuaError::internal("invalid string in chunk"))
    }
}

fn truncated() -> LuaError {
    LuaError::internal("truncated binary chunk")
}

const TAG_NIL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STR: u8 = 5;

/// Serialize a top-level `Proto` to the binary chunk format.
pub fn dump(proto: &Proto) -> Vec<u8> {
    let mut w = Writer::new();
    w.buf.extend_from_slice(&SIGNATURE);
    w.byte(VERSION);
    w.byte(FORMAT);
    w.buf.extend_from_slice(&LUAC_TAIL);
    w.byte(4); // sizeof(int)
    w.byte(8); // sizeof(size_t)
    w.byte(4); // sizeof(Instruction)
    w.byte(8); // sizeof(lua_Integer)
    w.byte(8); // sizeof(lua_Number)
    w.i64(TEST_INT);
    w.f64(TEST_NUM);
    dump_proto(&mut w, proto);
    w.buf
}

fn dump_proto(w: &mut Writer, proto: &Proto) {
    w.string(&proto.source);
    w.u32(proto.line_defined);
    w.u32(proto.last_line_defined);
    w.byte(proto.num_params);
    w.byte(proto.is_vararg as u8);
    w.byte(proto.max_stack_size);

    w.u32(proto.instructions.len() as u32);
    for &i in &proto.instructions {
        w.u32(i);
    }

    w.u32(proto.constants.len() as u32);
    for c in &proto.constants {
        match c {
            Value::Nil => w.byte(TAG_NIL),
            Value::Bool(false) => w.byte(TAG_FALSE),
            Value::Bool(true) => w.byte(TAG_TRUE),
            Value::Integer(i) => {
                w.byte(TAG_INT);
                w.i64(*i);
            }
            Value::Float(f) => {
                w.byte(TAG_FLOAT);
                w.f64(*f);
            }
            Value::Str(s) => {
                w.byte(TAG_STR);
                w.string(s.as_str());
            }
            _ => unreachable!("constants are Nil|Bool|Integer|Float|String|Proto only"),
        }
    }

    w.u32(proto.upvalues.len() as u32);
    for uv in &proto.upvalues {
        w.byte(uv.in_stack as u8);
        w.byte(uv.index);
        w.string(&uv.name);
    }

    w.u32(proto.nested.len() as u32);
    for p in &proto.nested {
        dump_proto(w, p);
    }

    w.u32(proto.line_events.len() as u32);
    for e in &proto.line_events {
        w.u32(e.pc);
        w.u32(e.line);
        w.byte(match e.kind {
            LineEventKind::Execution => 0,
            LineEventKind::ControlFlow => 1,
            LineEventKind::Marker => 2,
            LineEventKind::Iteration => 3,
        });
    }

    w.u32(proto.locals.len() as u32);
    for l in &proto.locals {
        w.string(&l.name);
        w.byte(l.register);
        w.u32(l.start_pc);
        w.u32(l.end_pc);
        w.byte(l.is_const as u8);
        w.byte(l.is_close as u8);
    }
}

/// Load a chunk previously produced by [`dump`]. Returns an `Err` when a
/// stripped chunk's `line_events`/`locals` are empty (caller should then
/// report the current line as `-1` per spec §6.2).
pub fn undump(bytes: &[u8]) -> Result<Rc<Proto>, LuaError> {
    let mut r = Reader::new(bytes);
    let sig = r.bytes(4)?;
    if sig != SIGNATURE {
        return Err(LuaError::internal("not a precompiled chunk"));
    }
    let version = r.byte()?;
    if version != VERSION {
        return Err(LuaError::internal("version mismatch"));
    }
    let _format = r.byte()?;
    let _tail = r.bytes(6)?;
    let _int_size = r.byte()?;
    let _size_t = r.byte()?;
    let _instr_size = r.byte()?;
    let _int_num_size = r.byte()?;
    let _float_size = r.byte()?;
    let test_int = r.i64()?;
    let test_num = r.f64()?;
    if test_int != TEST_INT || (test_num - TEST_NUM).abs() > f64::EPSILON {
        return Err(LuaError::internal("byte order/size mismatch in chunk"));
    }
    Ok(Rc::new(undump_proto(&mut r)?))
}

fn undump_proto(r: &mut Reader) -> Result<Proto, LuaError> {
    let source = r.string()?;
    let line_defined = r.u32()?;
    let last_line_defined = r.u32()?;
    let num_params = r.byte()?;
    let is_vararg = r.byte()? != 0;
    let max_stack_size = r.byte()?;

    let ninstr = r.u32()? as usize;
    let mut instructions = Vec::with_capacity(ninstr);
    for _ in 0..ninstr {
        instructions.push(r.u32()?);
    }

    let nconst = r.u32()? as usize;
    let mut constants = Vec::with_capacity(nconst);
    for _ in 0..nconst {
        let tag = r.byte()?;
        let v = match tag {
            TAG_NIL => Value::Nil,
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_INT => Value::Integer(r.i64()?),
            TAG_FLOAT => Value::Float(r.f64()?),
            TAG_STR => {
                let s = r.string()?;
                Value::Str(Rc::new(crate::value::lua_string::LuaString::from_owned(s)))
            }
            _ => return Err(LuaError::internal("bad constant tag")),
        };
        constants.push(v);
    }

    let nup = r.u32()? as usize;
    let mut upvalues = Vec::with_capacity(nup);
    for _ in 0..nup {
        let in_stack = r.byte()? != 0;
        let index = r.byte()?;
        let name = r.string()?;
        upvalues.push(UpvalueDesc { name, in_stack, index });
    }

    let nnested = r.u32()? as usize;
    let mut nested = Vec::with_capacity(nnested);
    for _ in 0..nnested {
        nested.push(Rc::new(undump_proto(r)?));
    }

    let nevents = r.u32()? as usize;
    let mut line_events = Vec::with_capacity(nevents);
    for _ in 0..nevents {
        let pc = r.u32()?;
        let line = r.u32()?;
        let kind = match r.byte()? {
            0 => LineEventKind::Execution,
            1 => LineEventKind::ControlFlow,
            2 => LineEventKind::Marker,
            _ => LineEventKind::Iteration,
        };
        line_events.push(LineEvent { pc, line, kind });
    }

    let nlocals = r.u32()? as usize;
    let mut locals = Vec::with_capacity(nlocals);
    for _ in 0..nlocals {
        let name = r.string()?;
        let register = r.byte()?;
        let start_pc = r.u32()?;
        let end_pc = r.u32()?;
        let is_const = r.byte()? != 0;
        let is_close = r.byte()? != 0;
        locals.push(LocalVarInfo {
            name,
            register,
            start_pc,
            end_pc,
            is_const,
            is_close,
        });
    }

    Ok(Proto {
        instructions,
        constants,
        upvalues,
        nested,
        num_params,
        is_vararg,
        max_stack_size,
        locals,
        line_events,
        source,
        line_defined,
        last_line_defined,
    })
}
