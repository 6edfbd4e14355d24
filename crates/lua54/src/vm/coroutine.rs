//! Coroutines (spec §3 "Coroutine", §4.10 "Coroutines (C11)").
//!
//! This crate implements the **interpreter-loop model** the spec allows as
//! an alternative to native stackful coroutines (§4.10): there is no second
//! OS/green thread per Lua coroutine. Instead each `Coroutine` owns its own
//! register stack and frame stack, and `resume` simply re-enters the
//! dispatch loop (`vm::state::Interpreter::run`) over that coroutine's
//! frames until it yields or returns. This sidesteps needing `unsafe`
//! stack-switching of the kind the teacher's `async_thread.rs` builds for
//! bridging to `tokio` (out of scope here — no async runtime is involved).

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::Value;
use crate::vm::frame::{CallFrame, ToBeClosed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    Suspended,
    Running,
    /// Resumed another coroutine and is waiting for it to yield or finish.
    Normal,
    Dead,
}

impl CoroutineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
        }
    }
}

/// One frame's worth of unfinished `RETURN` business: the return values
/// already computed, the TBC entries still pending `__close`, and the
/// error chain accumulated so far (spec §4.9 "the *final* raised exception
/// is the last non-nil error observed").
///
/// Pushed whenever `RETURN`/`CLOSE mode=2` needs to invoke a `__close`
/// metamethod: rather than calling it as a nested native Rust call (which
/// couldn't survive a yield), the executor pushes the `__close` closure as
/// an ordinary `CallFrame` and records the owner's remaining work here.
/// When that frame eventually completes — even after suspending through
/// zero or more `yield`/`resume` round-trips — the executor pops this
/// entry and continues closing the owner's remaining TBC vars.
pub struct PendingClose {
    /// Index into the coroutine's frame stack of the frame this close
    /// sequence belongs to.
    pub owner_frame: usize,
    pub remaining: Vec<ToBeClosed>,
    pub captured_returns: Vec<Value>,
    pub pending_error: Option<Value>,
    /// Where the *owner* frame's caller wants the eventual results —
    /// carried here (rather than as a separate call argument) because a
    /// suspended close sequence must still have them on hand whenever it's
    /// picked back up, arbitrarily later, by `RETURN`'s dispatch.
    pub result_reg: u8,
    pub num_results_wanted: i32,
}

pub struct Coroutine {
    pub status: CoroutineStatus,
    pub registers: Rc<RefCell<Vec<Value>>>,
    pub frames: Vec<CallFrame>,
    /// Stack of in-flight `__close` sequences (spec §4.10 "a stack of
    /// owner segments supports closes that themselves yield inside nested
    /// `__close` bodies").
    pub pending_closes: Vec<PendingClose>,
    /// Incremented on every native (host) call boundary crossed while this
    /// coroutine runs; `yield` while this is nonzero is rejected (spec
    /// §4.10 "Native boundary").
    pub native_call_depth: u32,
    pub entry: Option<Value>,
    /// Where `resume`'s arguments must land once a suspended `yield` call
    /// resumes: `(result_reg, num_results_wanted)` of the `CALL` (or
    /// metamethod dispatch) that invoked `coroutine.yield` and is still on
    /// top of the frame stack, suspended (spec §4.10 "resume continues
    /// exactly where suspension occurred").
    pub pending_yield: Option<(u8, i32)>,
}

impl Coroutine {
    pub fn new(entry: Value) -> Self {
        Coroutine {
            status: CoroutineStatus::Suspended,
            registers: Rc::new(RefCell::new(Vec::new())),
            frames: Vec::new(),
            pending_closes: Vec::new(),
            native_call_depth: 0,
            entry: Some(entry),
            pending_yield: None,
        }
    }

    pub fn is_yieldable(&self) -> bool {
        self.native_call_depth <= 1
    }

    /// Stores `resume`'s arguments into the suspended `yield` call's result
    /// registers, then clears the pending marker. The frame whose `pc` is
    /// already positioned just past the `CALL` (set before the call was
    /// dispatched) resumes from there.
    pub fn deliver_resume_values(&mut self, values: Vec<Value>) {
        let Some((reg, num_results_wanted)) = self.pending_yield.take() else {
            return;
        };
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        if num_results_wanted == crate::vm::frame::MULTRET {
            for (i, v) in values.into_iter().enumerate() {
                frame.set_reg(reg + i as u8, v);
            }
        } else {
            for i in 0..num_results_wanted as usize {
                frame.set_reg(reg + i as u8, values.get(i).cloned().unwrap_or(Value::Nil));
            }
        }
    }
}
