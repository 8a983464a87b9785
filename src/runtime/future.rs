//! Single-assignment futures and the force/resolve protocol.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use crate::runtime::{
    closure::Closure,
    config::DoubleResolution,
    counter::{Counter, FlushPolarity, flush_all_counters},
    error::RuntimeError,
    execution::Execution,
    terminator::{Terminatable, Terminator},
    value::Value,
};

static NEXT_FUTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Parked on a future until it resolves. Exactly one of the two methods is
/// called, exactly once.
pub trait FutureReader: Send + Sync {
    fn resolve(&self, value: Value);
    fn stop(&self);
}

enum FutureState {
    Unresolved(Vec<Arc<dyn FutureReader>>),
    Bound(Value),
    Stopped,
}

/// Point-in-time view of a future.
#[derive(Debug, Clone, PartialEq)]
pub enum FutureValue {
    Unresolved,
    Bound(Value),
    Stopped,
}

#[derive(Clone)]
pub struct Future(Arc<FutureInner>);

struct FutureInner {
    id: u64,
    policy: DoubleResolution,
    state: Mutex<FutureState>,
}

impl Future {
    pub fn new() -> Self {
        Self::with_policy(DoubleResolution::Ignore)
    }

    pub fn with_policy(policy: DoubleResolution) -> Self {
        Future(Arc::new(FutureInner {
            id: NEXT_FUTURE_ID.fetch_add(1, Ordering::Relaxed),
            policy,
            state: Mutex::new(FutureState::Unresolved(Vec::new())),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn policy(&self) -> DoubleResolution {
        self.0.policy
    }

    /// Binds the future and wakes every parked reader. A second resolution
    /// keeps the first one; whether that is an error depends on the policy.
    pub fn bind(&self, value: Value) -> Result<(), RuntimeError> {
        if self.try_bind(value) {
            Ok(())
        } else {
            self.already_resolved()
        }
    }

    pub fn stop(&self) -> Result<(), RuntimeError> {
        if self.try_stop() {
            Ok(())
        } else {
            self.already_resolved()
        }
    }

    /// Returns whether this call resolved the future.
    pub(crate) fn try_bind(&self, value: Value) -> bool {
        let readers = {
            let mut state = self.0.state.lock();
            match &mut *state {
                FutureState::Unresolved(readers) => {
                    let readers = std::mem::take(readers);
                    *state = FutureState::Bound(value.clone());
                    readers
                }
                _ => return false,
            }
        };
        for reader in readers {
            reader.resolve(value.clone());
        }
        true
    }

    pub(crate) fn try_stop(&self) -> bool {
        let readers = {
            let mut state = self.0.state.lock();
            match &mut *state {
                FutureState::Unresolved(readers) => {
                    let readers = std::mem::take(readers);
                    *state = FutureState::Stopped;
                    readers
                }
                _ => return false,
            }
        };
        for reader in readers {
            reader.stop();
        }
        true
    }

    fn already_resolved(&self) -> Result<(), RuntimeError> {
        match self.0.policy {
            DoubleResolution::Ignore => Ok(()),
            DoubleResolution::Report => Err(RuntimeError::AlreadyResolved(self.0.id)),
        }
    }

    pub fn get(&self) -> FutureValue {
        match &*self.0.state.lock() {
            FutureState::Unresolved(_) => FutureValue::Unresolved,
            FutureState::Bound(value) => FutureValue::Bound(value.clone()),
            FutureState::Stopped => FutureValue::Stopped,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(&*self.0.state.lock(), FutureState::Unresolved(_))
    }

    /// Parks `reader` until resolution, or notifies it right away when the
    /// future is already resolved.
    pub fn read(&self, reader: Arc<dyn FutureReader>) {
        let resolved = {
            let mut state = self.0.state.lock();
            match &mut *state {
                FutureState::Unresolved(readers) => {
                    readers.push(reader);
                    return;
                }
                FutureState::Bound(value) => Some(value.clone()),
                FutureState::Stopped => None,
            }
        };
        match resolved {
            Some(value) => reader.resolve(value),
            None => reader.stop(),
        }
    }

    pub fn reader_count(&self) -> usize {
        match &*self.0.state.lock() {
            FutureState::Unresolved(readers) => readers.len(),
            _ => 0,
        }
    }

    pub fn ptr_eq(&self, other: &Future) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Future {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Future {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("id", &self.0.id)
            .field("value", &self.get())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Resume with the bound values; any stopped future halts the reader.
    Force,
    /// Resume with no values once everything is resolved, stopped or not.
    Resolve,
}

#[derive(Debug, PartialEq)]
pub enum JoinOutcome {
    /// Every value was available: the caller resumes the continuation itself.
    Resolved(Vec<Value>),
    /// The token was released (a stopped future, or a kill).
    Halted,
    /// Parked; the last resolution resumes the continuation.
    Blocked,
}

/// A continuation waiting on a group of values, some of which are futures.
pub struct Join;

impl Join {
    pub fn start(
        execution: &Execution,
        mode: JoinMode,
        p: Arc<Closure>,
        counter: Counter,
        terminator: Terminator,
        values: Vec<Value>,
    ) -> JoinOutcome {
        if let [single] = values.as_slice() {
            if let Some(outcome) = Self::single(mode, single, &counter) {
                return outcome;
            }
        }

        let join = JoinInner::new(execution, mode, p, counter, terminator, values.len());
        let mut flushed = false;
        for (index, value) in values.into_iter().enumerate() {
            match value {
                Value::Future(future) => match future.get() {
                    FutureValue::Bound(value) => join.arrive(index, value),
                    FutureValue::Stopped => join.stopped(),
                    FutureValue::Unresolved => {
                        if !flushed {
                            flush_all_counters(FlushPolarity::Positive);
                            flushed = true;
                        }
                        future.read(Arc::new(JoinReader {
                            join: join.clone(),
                            index,
                        }));
                    }
                },
                other => join.arrive(index, other),
            }
        }
        join.finish()
    }

    /// Single value already settled: no join state is allocated.
    fn single(mode: JoinMode, value: &Value, counter: &Counter) -> Option<JoinOutcome> {
        let bound = match value {
            Value::Future(future) => match future.get() {
                FutureValue::Bound(value) => value,
                FutureValue::Stopped => {
                    return Some(match mode {
                        JoinMode::Force => {
                            counter.halt_token();
                            JoinOutcome::Halted
                        }
                        JoinMode::Resolve => JoinOutcome::Resolved(Vec::new()),
                    });
                }
                FutureValue::Unresolved => return None,
            },
            other => other.clone(),
        };
        Some(JoinOutcome::Resolved(match mode {
            JoinMode::Force => vec![bound],
            JoinMode::Resolve => Vec::new(),
        }))
    }
}

struct JoinInner {
    execution: Execution,
    mode: JoinMode,
    p: Arc<Closure>,
    counter: Counter,
    terminator: Terminator,
    values: Mutex<Vec<Value>>,
    /// Unresolved inputs plus one unit held by `finish`.
    pending: AtomicUsize,
    /// Set once the token has been handed on or released.
    done: AtomicBool,
}

impl JoinInner {
    fn new(
        execution: &Execution,
        mode: JoinMode,
        p: Arc<Closure>,
        counter: Counter,
        terminator: Terminator,
        n: usize,
    ) -> Arc<Self> {
        Arc::new(JoinInner {
            execution: execution.clone(),
            mode,
            p,
            counter,
            terminator,
            values: Mutex::new(vec![Value::Signal; n]),
            pending: AtomicUsize::new(n + 1),
            done: AtomicBool::new(false),
        })
    }

    fn arrive(self: &Arc<Self>, index: usize, value: Value) {
        self.values.lock()[index] = value;
        self.arrived();
    }

    fn stopped(self: &Arc<Self>) {
        if self.mode == JoinMode::Force && !self.done.swap(true, Ordering::AcqRel) {
            self.terminator.remove_child_ptr(self);
            self.counter.halt_token();
        }
        self.arrived();
    }

    fn arrived(self: &Arc<Self>) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.complete();
        }
    }

    fn resumption_values(&self) -> Vec<Value> {
        match self.mode {
            JoinMode::Force => std::mem::take(&mut *self.values.lock()),
            JoinMode::Resolve => Vec::new(),
        }
    }

    fn finish(self: &Arc<Self>) -> JoinOutcome {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            if self.done.swap(true, Ordering::AcqRel) {
                return JoinOutcome::Halted;
            }
            return JoinOutcome::Resolved(self.resumption_values());
        }
        self.park()
    }

    /// Attaches the join to its terminator while inputs are outstanding. The
    /// last input can land between `finish`'s decrement and the attach, in
    /// which case the join is detached again.
    fn park(self: &Arc<Self>) -> JoinOutcome {
        if !self.terminator.add_child(self.clone()) {
            return JoinOutcome::Halted;
        }
        if self.done.load(Ordering::Acquire) {
            self.terminator.remove_child_ptr(self);
            return JoinOutcome::Halted;
        }
        JoinOutcome::Blocked
    }

    /// The last future resolved after `finish` parked the join.
    fn complete(self: &Arc<Self>) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.terminator.remove_child_ptr(self);
        if self.terminator.is_killed() {
            self.counter.set_discorporate();
            self.counter.halt_token();
            return;
        }
        let values = self.resumption_values();
        self.execution.run_continuation(self.p.clone(), values, None);
    }
}

impl Terminatable for JoinInner {
    fn kill(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.counter.set_discorporate();
            self.counter.halt_token();
        }
    }
}

struct JoinReader {
    join: Arc<JoinInner>,
    index: usize,
}

impl FutureReader for JoinReader {
    fn resolve(&self, value: Value) {
        self.join.arrive(self.index, value);
    }

    fn stop(&self) {
        self.join.stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::config::RuntimeConfig;

    fn parked_join(
        execution: &Execution,
        counter: &Counter,
        terminator: &Terminator,
    ) -> Arc<JoinInner> {
        counter.new_token();
        JoinInner::new(
            execution,
            JoinMode::Force,
            execution.publisher(counter),
            counter.clone(),
            terminator.clone(),
            1,
        )
    }

    #[test]
    fn join_completed_before_attach_leaves_no_child() {
        let execution = Execution::deterministic(RuntimeConfig::default()).unwrap();
        let counter = Counter::root(|_| {});
        let terminator = Terminator::root();
        let join = parked_join(&execution, &counter, &terminator);

        // `finish` has given up its unit; the only input lands before it attaches.
        join.pending.fetch_sub(1, Ordering::AcqRel);
        join.arrive(0, Value::Integer(7));
        assert_eq!(join.park(), JoinOutcome::Halted);

        assert_eq!(terminator.child_count(), 0);
        assert_eq!(execution.publications(), vec![Value::Integer(7)]);
        assert!(counter.is_halted());
    }

    #[test]
    fn join_still_waiting_stays_attached() {
        let execution = Execution::deterministic(RuntimeConfig::default()).unwrap();
        let counter = Counter::root(|_| {});
        let terminator = Terminator::root();
        let join = parked_join(&execution, &counter, &terminator);

        assert_eq!(join.finish(), JoinOutcome::Blocked);
        assert_eq!(terminator.child_count(), 1);

        join.arrive(0, Value::Integer(7));
        assert_eq!(terminator.child_count(), 0);
        assert_eq!(execution.publications(), vec![Value::Integer(7)]);
    }
}
