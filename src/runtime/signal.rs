use std::sync::Arc;

use crate::runtime::{closure::Closure, error::invariant_violation, value::Value};

/// Non-local control transfers threaded through `Result<Value, Signal>`.
///
/// None of these are errors: they are never logged and never reach the
/// event sink.
#[derive(Debug)]
pub enum Signal {
    /// The computation stopped without a result. CPS dispatch releases the
    /// transferred token itself; after a failed direct call the CPS code
    /// owning the current token releases it (see
    /// [`Frame::call_or_halt`](crate::runtime::frame::Frame::call_or_halt)).
    Halt,
    /// A terminator checkpoint observed a kill. The token governed by that
    /// terminator has already been released.
    Killed,
    /// A tail call to a different entry point, caught by the nearest
    /// enclosing [`TailCallLoop`](crate::runtime::trampoline::TailCallLoop).
    TailCall(Box<TailCall>),
    /// A tail call to the running entry point. The frame's arguments were
    /// overwritten in place and the body should be re-entered.
    SelfTailCall,
}

#[derive(Debug)]
pub struct TailCall {
    pub closure: Arc<Closure>,
    pub args: Vec<Value>,
}

impl Signal {
    pub fn tail_call(closure: Arc<Closure>, args: Vec<Value>) -> Self {
        Signal::TailCall(Box::new(TailCall { closure, args }))
    }

    pub fn is_tail_call(&self) -> bool {
        matches!(self, Signal::TailCall(_) | Signal::SelfTailCall)
    }
}

/// Absorbs the outcome of a root invocation (a task, an inlined spawn or
/// continuation). Tail calls must have been caught below this point.
pub(crate) fn settle(result: Result<Value, Signal>) {
    match result {
        Ok(_) | Err(Signal::Halt) | Err(Signal::Killed) => {}
        Err(signal) => invariant_violation(format!(
            "tail call signal escaped its trampoline: {:?}",
            signal
        )),
    }
}
