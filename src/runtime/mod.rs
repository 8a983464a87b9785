//! Runtime core: closures, termination tracking, cancellation, futures,
//! call dispatch and the tail-call trampoline.
//!
//! # Ownership Invariant
//! Runtime values are shared across worker threads through `Arc`, so the
//! value graph must stay acyclic:
//! - Closures capture values, but captured values never reference the
//!   capturing closure.
//! - A nested counter holds its parent; parents never hold children.
//! - A nested terminator holds its children; children reach their parent
//!   through a weak reference only.
//! - A target owns its call sites; inline caches and trampoline chains in
//!   those sites reach targets through weak references only.
//!
//! Control flow that is not a value (halting, cancellation, tail calls) is
//! threaded through `Result<Value, Signal>` rather than unwinding.
use crate::runtime::{frame::Frame, signal::Signal, value::Value};

pub mod builtins;
pub mod call_target;
pub mod closure;
pub mod config;
pub mod counter;
pub mod dispatch;
pub mod error;
pub mod execution;
pub mod frame;
pub mod future;
pub mod scheduler;
pub mod signal;
pub mod site;
pub mod spawn;
pub mod telemetry;
pub mod terminator;
pub mod trampoline;
pub mod value;

/// Body of a compiled entry point. Arguments and captured values are read
/// through the [`Frame`]; calls go through the frame's call sites.
pub type EntryFn = dyn Fn(&mut Frame<'_>) -> Result<Value, Signal> + Send + Sync;

/// Native function backing a direct builtin site.
pub type BuiltinFn = fn(&[Value]) -> Result<Value, String>;

#[cfg(test)]
mod terminator_test;
#[cfg(test)]
mod trampoline_test;
#[cfg(test)]
mod spawn_test;
