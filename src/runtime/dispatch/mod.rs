//! Call sites and dispatch.
//!
//! Every call in a compiled body goes through a [`CallSite`] owned by the
//! body's [`CallTarget`](crate::runtime::call_target::CallTarget). The site
//! picks one of three strategies for the target:
//! - internal: the target is a [`Closure`]
//! - external: the target is resolved to an invoker
//! - intercepted: the execution's interceptor claims the call
//!
//! and caches the resolution per target identity.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;

use crate::runtime::{
    closure::Closure,
    counter::Counter,
    error::invariant_violation,
    execution::Execution,
    frame::Frame,
    signal::Signal,
    telemetry::RuntimeEvent,
    terminator::Terminator,
    trampoline::TailCallLoop,
    value::Value,
};

use self::cache::{CacheEntry, InlineCache, Insert};

pub mod cache;
mod external;
mod intercepted;
mod internal;

pub(crate) use internal::{invoke_closure, invoke_target};

static NEXT_CALL_SITE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CallSiteId(u64);

impl CallSiteId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Calling convention of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallKind {
    /// Arguments are `[P, C, T, args...]`; the caller's token moves to the
    /// callee.
    Cps,
    /// Arguments alone; the result is returned.
    Direct,
    /// Resumes a continuation closure with published values.
    Continuation,
    /// Spawns a computation; see [`CallSite::spawn`].
    Spawn { must_spawn: bool },
}

pub struct CallSite {
    id: CallSiteId,
    kind: CallKind,
    tail: bool,
    cache: InlineCache,
    trampoline: TailCallLoop,
}

impl CallSite {
    pub fn new(kind: CallKind, tail: bool) -> Self {
        Self {
            id: CallSiteId(NEXT_CALL_SITE_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            tail,
            cache: InlineCache::new(),
            trampoline: TailCallLoop::new(),
        }
    }

    pub fn cps() -> Self {
        Self::new(CallKind::Cps, false)
    }

    pub fn cps_tail() -> Self {
        Self::new(CallKind::Cps, true)
    }

    pub fn direct() -> Self {
        Self::new(CallKind::Direct, false)
    }

    pub fn direct_tail() -> Self {
        Self::new(CallKind::Direct, true)
    }

    pub fn continuation() -> Self {
        Self::new(CallKind::Continuation, false)
    }

    pub fn continuation_tail() -> Self {
        Self::new(CallKind::Continuation, true)
    }

    pub fn spawn_site(must_spawn: bool) -> Self {
        Self::new(CallKind::Spawn { must_spawn }, false)
    }

    pub fn id(&self) -> CallSiteId {
        self.id
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn is_tail(&self) -> bool {
        self.tail
    }

    pub fn cache(&self) -> &InlineCache {
        &self.cache
    }

    pub fn trampoline(&self) -> &TailCallLoop {
        &self.trampoline
    }

    /// Calls `target` with `args` from the activation in `frame`.
    ///
    /// CPS calls first check the terminator passed in `args`: under a killed
    /// terminator the transferred token is released and `Killed` is
    /// returned without calling anything.
    pub fn dispatch(
        &self,
        frame: &mut Frame<'_>,
        target: Value,
        args: Vec<Value>,
    ) -> Result<Value, Signal> {
        let site_args_from = match self.kind {
            CallKind::Cps => {
                let (counter, terminator) = cps_handles(&args);
                if terminator.is_killed() {
                    counter.halt_token();
                    return Err(Signal::Killed);
                }
                3
            }
            CallKind::Direct => 0,
            CallKind::Continuation => {
                return match target {
                    Value::Closure(closure) => self.call_closure(frame, closure, args),
                    other => invariant_violation(format!(
                        "call site {} resumed a non-closure continuation ({})",
                        self.id,
                        other.type_name()
                    )),
                };
            }
            CallKind::Spawn { .. } => invariant_violation(format!(
                "spawn site {} used for a call",
                self.id
            )),
        };

        if frame
            .execution()
            .should_intercept(&target, &args[site_args_from..])
        {
            return self.dispatch_intercepted(frame, target, args);
        }

        match target {
            Value::Closure(closure) => {
                self.check_convention(&closure);
                self.call_closure(frame, closure, args)
            }
            other => self.dispatch_external(frame, other, args),
        }
    }

    fn check_convention(&self, closure: &Closure) {
        let expects_direct = match self.kind {
            CallKind::Cps => false,
            CallKind::Direct => true,
            _ => return,
        };
        if closure.direct_return != expects_direct {
            invariant_violation(format!(
                "call site {} ({:?}) called {} with the other calling convention",
                self.id,
                self.kind,
                closure.entry.name()
            ));
        }
    }

    fn report_failure(&self, execution: &Execution, target: &Value, message: String) {
        execution.stats().record_caught_failure();
        execution.notify(RuntimeEvent::Caught {
            call_site: self.id.get(),
            target: target.target_label(),
            message,
        });
    }

    fn record_insert(&self, execution: &Execution, insert: &Insert<'_>) {
        match insert {
            Insert::Added(entry) => {
                execution.stats().record_cache_specialization();
                tracing::debug!(
                    target: "tessel::dispatch",
                    call_site = self.id.get(),
                    entry = ?entry_label(entry),
                    state = ?self.cache.state(),
                    "call site specialized"
                );
            }
            Insert::Universal { transitioned: true } => {
                execution.stats().record_cache_universal_transition();
                tracing::debug!(
                    target: "tessel::dispatch",
                    call_site = self.id.get(),
                    "call site turned universal"
                );
            }
            Insert::Existing(_) | Insert::Universal { transitioned: false } => {}
        }
    }
}

fn entry_label(entry: &CacheEntry) -> String {
    match entry {
        CacheEntry::Internal(target) => match target.upgrade() {
            Some(target) => format!("{} {}", target.name(), target.id()),
            None => "dropped target".to_string(),
        },
        CacheEntry::External(invoker) => format!("{:?}", invoker),
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("tail", &self.tail)
            .field("cache", &self.cache.state())
            .finish()
    }
}

/// `P`, `C` and `T` of a CPS call.
pub(crate) struct CpsArgs {
    pub p: Arc<Closure>,
    pub counter: Counter,
    pub terminator: Terminator,
}

#[cold]
#[inline(never)]
fn malformed_cps_call(args: &[Value]) -> ! {
    invariant_violation(format!(
        "continuation-passing call needs [P, C, T, ...], got ({})",
        crate::runtime::value::argument_shape(args)
    ))
}

fn cps_handles(args: &[Value]) -> (&Counter, &Terminator) {
    match args {
        [_, Value::Counter(counter), Value::Terminator(terminator), ..] => (counter, terminator),
        _ => malformed_cps_call(args),
    }
}

/// Splits `[P, C, T, args...]` into its CPS prefix and the site arguments.
pub(crate) fn split_cps(mut args: Vec<Value>) -> (CpsArgs, Vec<Value>) {
    if args.len() < 3 {
        malformed_cps_call(&args);
    }
    let rest = args.split_off(3);
    match <[Value; 3]>::try_from(args) {
        Ok([Value::Closure(p), Value::Counter(counter), Value::Terminator(terminator)]) => (
            CpsArgs {
                p,
                counter,
                terminator,
            },
            rest,
        ),
        Ok(prefix) => malformed_cps_call(&prefix),
        Err(prefix) => malformed_cps_call(&prefix),
    }
}
