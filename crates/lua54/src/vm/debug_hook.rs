//! Debug hooks (spec §4.11 "Debug hooks (C12)").

use crate::value::proto::LineEventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Call,
    Return,
    Line,
    Count,
}

/// Which hook kinds are active, set via `debug.sethook`'s mask string
/// (`"crl"` for call/return/line, plus an optional instruction count). Just
/// four bits, so a plain newtype rather than pulling in `bitflags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HookMask(pub u8);

impl HookMask {
    pub const CALL: HookMask = HookMask(0b0001);
    pub const RETURN: HookMask = HookMask(0b0010);
    pub const LINE: HookMask = HookMask(0b0100);
    pub const COUNT: HookMask = HookMask(0b1000);

    pub const fn empty() -> Self {
        HookMask(0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn from_mask_string(s: &str, has_count: bool) -> Self {
        let mut mask = HookMask::empty();
        if s.contains('c') {
            mask.insert(HookMask::CALL);
        }
        if s.contains('r') {
            mask.insert(HookMask::RETURN);
        }
        if s.contains('l') {
            mask.insert(HookMask::LINE);
        }
        if has_count {
            mask.insert(HookMask::COUNT);
        }
        mask
    }
}

impl std::ops::BitOr for HookMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        HookMask(self.0 | rhs.0)
    }
}

/// Per-coroutine hook configuration (spec §4.11: "Per-coroutine hook state
/// is stored in the registry under an internal key and activated on
/// resume"). The callback itself is a `Value` (a Lua function or native
/// function), invoked by the executor through the normal call mechanism.
pub struct HookState {
    pub callback: crate::value::Value,
    pub mask: HookMask,
    pub count: u32,
    pub instructions_since_last: u32,
    /// Re-entrancy guard: hooks must not themselves trigger hooks (matches
    /// reference Lua's `lua_Debug` behavior).
    pub active: bool,
}

impl HookState {
    pub fn new(callback: crate::value::Value, mask: HookMask, count: u32) -> Self {
        HookState {
            callback,
            mask,
            count,
            instructions_since_last: 0,
            active: false,
        }
    }
}

/// Decides whether the `Line` hook must fire before executing `pc`, given
/// the frame's `lastLine` and the set of line events attached to `pc`
/// (spec §4.11, rules a-d).
pub fn should_fire_line_hook(
    events: impl Iterator<Item = (u32, LineEventKind)>,
    last_line: i64,
) -> Option<u32> {
    let mut fire_line = None;
    for (line, kind) in events {
        let fires = match kind {
            LineEventKind::Execution | LineEventKind::ControlFlow => line as i64 != last_line,
            LineEventKind::Marker | LineEventKind::Iteration => true,
        };
        if fires {
            fire_line = Some(line);
        }
    }
    fire_line
}
