//! Hand-off to the external scheduler.
//!
//! The runtime only submits [`Task`]s and waits on a [`Latch`]; queueing and
//! work stealing belong to the [`Scheduler`] implementation.
use std::{
    cell::Cell,
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::runtime::{
    closure::Closure,
    counter::{Counter, FlushPolarity, flush_all_counters},
    execution::Execution,
    signal::settle,
    value::Value,
};

/// A closure submitted for independent execution.
pub struct Task {
    execution: Execution,
    computation: Arc<Closure>,
    args: Vec<Value>,
    then_halt: Option<Counter>,
}

impl Task {
    pub(crate) fn new(execution: &Execution, computation: Arc<Closure>, args: Vec<Value>) -> Self {
        Self {
            execution: execution.clone(),
            computation,
            args,
            then_halt: None,
        }
    }

    /// Releases one token on `counter` after the computation has run.
    pub(crate) fn then_halt(mut self, counter: Counter) -> Self {
        self.then_halt = Some(counter);
        self
    }

    pub fn entry_name(&self) -> &str {
        self.computation.entry.name()
    }

    /// Runs the computation to completion on the current worker and records
    /// its time in the target's spawn profile.
    pub fn run(self) {
        let Task {
            execution,
            computation,
            args,
            then_halt,
        } = self;
        let entry = computation.entry.clone();
        let started = Instant::now();
        {
            let _task = execution.enter_task("scheduled", entry.name());
            execution.stats().record_task_run();
            settle(execution.invoke(computation, args));
        }
        entry.profile().record(started.elapsed());
        if let Some(counter) = then_halt {
            counter.halt_token();
        }
    }
}

pub trait Scheduler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submits `task`; the scheduler eventually runs it on some worker.
    fn submit(&self, task: Task);

    /// Blocks until `latch` is set, or until no work is left. Returns whether
    /// the latch was set.
    fn wait(&self, latch: &Latch) -> bool;
}

/// One-shot completion flag.
#[derive(Default)]
pub struct Latch {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.done.lock()
    }

    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    /// Returns whether the latch was set within `timeout`.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.cond.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

/// Deterministic FIFO scheduler that runs tasks on the thread calling
/// [`wait`](Scheduler::wait).
#[derive(Default)]
pub struct QueueScheduler {
    queue: Mutex<VecDeque<Task>>,
}

impl QueueScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Runs the oldest queued task. Returns false when the queue was empty.
    pub fn run_next(&self) -> bool {
        let task = self.queue.lock().pop_front();
        match task {
            Some(task) => {
                task.run();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for QueueScheduler {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn submit(&self, task: Task) {
        self.queue.lock().push_back(task);
    }

    fn wait(&self, latch: &Latch) -> bool {
        loop {
            if latch.is_set() {
                return true;
            }
            if self.run_next() {
                continue;
            }
            if flush_all_counters(FlushPolarity::All) == 0 && self.is_empty() {
                return latch.is_set();
            }
        }
    }
}

/// Runs tasks on a rayon thread pool.
///
/// Submitted tasks are counted until they finish, so [`wait`](Scheduler::wait)
/// can tell a latch that is still coming from one that never will.
#[cfg(feature = "rayon-scheduler")]
pub struct RayonScheduler {
    pool: rayon::ThreadPool,
    in_flight: Arc<InFlight>,
}

/// Interval at which a waiter rechecks its latch. Latches set outside any
/// task (an external kill) do not signal `idle`.
#[cfg(feature = "rayon-scheduler")]
const LATCH_POLL: Duration = Duration::from_millis(10);

#[cfg(feature = "rayon-scheduler")]
#[derive(Default)]
struct InFlight {
    tasks: Mutex<usize>,
    idle: Condvar,
}

#[cfg(feature = "rayon-scheduler")]
impl InFlight {
    fn start(&self) {
        *self.tasks.lock() += 1;
    }

    fn finish(&self) {
        let mut tasks = self.tasks.lock();
        *tasks -= 1;
        self.idle.notify_all();
    }
}

#[cfg(feature = "rayon-scheduler")]
impl RayonScheduler {
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tessel-worker-{}", i))
            .build()?;
        Ok(Self {
            pool,
            in_flight: Arc::new(InFlight::default()),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Submitted tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.tasks.lock()
    }
}

#[cfg(feature = "rayon-scheduler")]
impl Scheduler for RayonScheduler {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn submit(&self, task: Task) {
        self.in_flight.start();
        let in_flight = self.in_flight.clone();
        self.pool.spawn(move || {
            task.run();
            in_flight.finish();
        });
    }

    fn wait(&self, latch: &Latch) -> bool {
        loop {
            if latch.is_set() {
                return true;
            }
            let mut tasks = self.in_flight.tasks.lock();
            if *tasks == 0 {
                drop(tasks);
                return latch.is_set();
            }
            self.in_flight.idle.wait_for(&mut tasks, LATCH_POLL);
        }
    }
}

thread_local! {
    static CURRENT_TASK: Cell<u64> = const { Cell::new(0) };
}

/// A task (scheduled or inlined) running on this worker. Traces enter and
/// exit when `trace_tasks` is on. Leaving the outermost task reconciles every
/// counter offset the worker batched meanwhile.
pub(crate) struct TaskScope<'a> {
    execution: &'a Execution,
    id: u64,
    parent: u64,
}

impl Execution {
    pub(crate) fn enter_task(&self, kind: &'static str, entry: &str) -> TaskScope<'_> {
        let id = self.next_task_id();
        let parent = CURRENT_TASK.with(|current| current.replace(id));
        if self.config().trace_tasks {
            tracing::trace!(target: "tessel::tasks", task = id, parent, kind, entry, "task enter");
        }
        TaskScope {
            execution: self,
            id,
            parent,
        }
    }
}

impl Drop for TaskScope<'_> {
    fn drop(&mut self) {
        CURRENT_TASK.with(|current| current.set(self.parent));
        if self.execution.config().trace_tasks {
            tracing::trace!(target: "tessel::tasks", task = self.id, "task exit");
        }
        if self.parent == 0 {
            let applied = flush_all_counters(FlushPolarity::All);
            self.execution.stats().record_counter_flushes(applied);
        }
    }
}
