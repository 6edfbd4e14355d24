//! `Proto` — the immutable compiled function record (spec §3 "Proto").

use crate::value::value::Value;

/// One compiled function. Immutable once the compiler finishes it; shared
/// via `Rc` by every closure created from it (spec §3: "Proto (compiled
/// function)").
pub struct Proto {
    pub instructions: Vec<u32>,
    pub constants: Vec<Value>,
    pub upvalues: Vec<UpvalueDesc>,
    pub nested: Vec<std::rc::Rc<Proto>>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub locals: Vec<LocalVarInfo>,
    pub line_events: Vec<LineEvent>,
    pub source: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
}

/// `(name, inStack, index)` — spec §3 "upvalueInfo". `in_stack = true` means
/// `index` is a register in the *parent's* frame; `false` means `index` is
/// the parent's own upvalue slot.
#[derive(Clone, Debug)]
pub struct UpvalueDesc {
    pub name: String,
    pub in_stack: bool,
    pub index: u8,
}

/// Debug info for one local variable's lifetime (spec §3 "localVars").
#[derive(Clone, Debug)]
pub struct LocalVarInfo {
    pub name: String,
    pub register: u8,
    pub start_pc: u32,
    pub end_pc: u32,
    pub is_const: bool,
    pub is_close: bool,
}

/// Classification of a `(pc, line)` pair controlling line-hook firing
/// (spec §4.11).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEventKind {
    Execution,
    ControlFlow,
    Marker,
    Iteration,
}

#[derive(Clone, Copy, Debug)]
pub struct LineEvent {
    pub pc: u32,
    pub line: u32,
    pub kind: LineEventKind,
}

impl Proto {
    pub fn new(source: String) -> Self {
        Proto {
            instructions: Vec::new(),
            constants: Vec::new(),
            upvalues: Vec::new(),
            nested: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2,
            locals: Vec::new(),
            line_events: Vec::new(),
            source,
            line_defined: 0,
            last_line_defined: 0,
        }
    }

    /// Line events sharing a `pc`, in emission order (spec §4.11: "Multiple
    /// events may share a `pc`; all are delivered in order").
    pub fn events_at(&self, pc: u32) -> impl Iterator<Item = &LineEvent> {
        self.line_events.iter().filter(move |e| e.pc == pc)
    }
}
