//! Spawn/scheduler boundary.
//!
//! Each worker tracks how many computations it is running inline on top of
//! each other. A spawn (or a continuation resumed from another thread's
//! event) runs inline while that depth is below `max_stack_depth`, and is
//! handed to the scheduler otherwise.
use std::{
    cell::Cell,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::runtime::{
    closure::Closure,
    config::RuntimeConfig,
    counter::Counter,
    dispatch::{CallKind, CallSite},
    error::invariant_violation,
    execution::Execution,
    scheduler::Task,
    signal::{Signal, settle},
    terminator::Terminator,
    value::Value,
};

thread_local! {
    static STACK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

pub fn current_stack_depth() -> usize {
    STACK_DEPTH.with(Cell::get)
}

/// One level of inline execution on this worker, released on drop.
pub struct DepthGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl DepthGuard {
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        STACK_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Enters one inline level when the current depth is below `max_depth`.
pub fn increment_and_check_stack_depth(max_depth: usize) -> Option<DepthGuard> {
    STACK_DEPTH.with(|depth| {
        let current = depth.get();
        if current >= max_depth {
            return None;
        }
        depth.set(current + 1);
        Some(DepthGuard {
            depth: current + 1,
            _not_send: PhantomData,
        })
    })
}

/// Time spent in scheduled executions of one target.
#[derive(Debug, Default)]
pub struct SpawnProfile {
    total_time_ns: AtomicU64,
    total_calls: AtomicU64,
}

impl SpawnProfile {
    pub fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_time_ns.fetch_add(nanos, Ordering::Relaxed);
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Average nanoseconds per call, once at least `min_calls` were seen.
    pub fn time_per_call(&self, min_calls: u64) -> Option<u64> {
        let calls = self.calls();
        if calls < min_calls {
            return None;
        }
        if calls == 0 {
            return Some(0);
        }
        Some(self.total_time_ns.load(Ordering::Relaxed) / calls)
    }
}

/// Whether a spawn of `computation` may run inline, before the depth check.
pub fn should_inline_spawn(
    config: &RuntimeConfig,
    computation: &Closure,
    must_spawn: bool,
) -> bool {
    config.allow_spawn_inlining
        && (!must_spawn || config.allow_all_spawn_inlining)
        && computation
            .entry
            .profile()
            .time_per_call(config.min_calls_for_time_per_call)
            .is_some_and(|t| t < config.inline_average_time_limit_ns)
}

impl CallSite {
    /// Spawns `computation` with no arguments. The computation owns a token
    /// on `counter` created by the caller; under a killed terminator that
    /// token is released and nothing runs.
    pub fn spawn(
        &self,
        execution: &Execution,
        counter: &Counter,
        terminator: &Terminator,
        computation: Arc<Closure>,
    ) -> Result<(), Signal> {
        let CallKind::Spawn { must_spawn } = self.kind() else {
            invariant_violation(format!("call site {} used for a spawn", self.id()));
        };
        if terminator.is_killed() {
            execution.stats().record_spawn_killed();
            counter.halt_token();
            return Ok(());
        }
        if should_inline_spawn(execution.config(), &computation, must_spawn) {
            if let Some(guard) = increment_and_check_stack_depth(execution.config().max_stack_depth)
            {
                execution.stats().record_spawn_inlined();
                execution.stats().record_inline_depth(guard.depth());
                tracing::trace!(
                    target: "tessel::spawn",
                    entry = computation.entry.name(),
                    depth = guard.depth(),
                    "spawn inlined"
                );
                let _task = execution.enter_task("inline", computation.entry.name());
                settle(self.invoke(execution, computation, Vec::new()));
                return Ok(());
            }
        }
        execution.stats().record_spawn_scheduled();
        tracing::trace!(
            target: "tessel::spawn",
            entry = computation.entry.name(),
            depth = current_stack_depth(),
            "spawn scheduled"
        );
        execution.schedule(Task::new(execution, computation, Vec::new()));
        Ok(())
    }
}

impl Execution {
    /// Resumes a continuation outside its caller's activation (a
    /// publication, a halt continuation, a join completion): inline while
    /// the stack depth allows, scheduled otherwise. `then_halt` receives one
    /// `halt_token` after the continuation has run.
    pub(crate) fn run_continuation(
        &self,
        closure: Arc<Closure>,
        args: Vec<Value>,
        then_halt: Option<Counter>,
    ) {
        match increment_and_check_stack_depth(self.config().max_stack_depth) {
            Some(guard) => {
                self.stats().record_continuation_inlined();
                self.stats().record_inline_depth(guard.depth());
                let task = self.enter_task("continuation", closure.entry.name());
                settle(self.invoke(closure, args));
                if let Some(counter) = then_halt {
                    counter.halt_token();
                }
                drop(task);
                drop(guard);
            }
            None => {
                self.stats().record_continuation_scheduled();
                let task = Task::new(self, closure, args);
                self.schedule(match then_halt {
                    Some(counter) => task.then_halt(counter),
                    None => task,
                });
            }
        }
    }
}
