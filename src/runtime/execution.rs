//! The execution handle shared by every closure of one program run.
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::Mutex;
use serde::Serialize;

use crate::runtime::{
    call_target::CallTarget,
    closure::Closure,
    config::{ConfigError, DoubleResolution, RuntimeConfig},
    counter::{Counter, FlushPolarity, flush_all_counters, flush_orphaned_workers},
    dispatch::CallSite,
    error::RuntimeError,
    future::Future,
    scheduler::{Latch, QueueScheduler, Scheduler, Task},
    signal::Signal,
    site::{Interceptor, Invoker, InvokerResolver, SiteResolver},
    telemetry::{EventSink, ExecutionStats, RuntimeEvent, StatsSnapshot, TracingSink},
    terminator::Terminator,
    value::Value,
};

#[derive(Clone)]
pub struct Execution(Arc<ExecutionInner>);

struct ExecutionInner {
    config: RuntimeConfig,
    scheduler: Arc<dyn Scheduler>,
    resolver: Arc<dyn InvokerResolver>,
    interceptor: Option<Arc<dyn Interceptor>>,
    sink: Arc<dyn EventSink>,
    stats: ExecutionStats,
    publications: Mutex<Vec<Value>>,
    root_terminator: Terminator,
    /// Non-tail site used for root invocations.
    root_site: CallSite,
    next_task_id: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub publications: Vec<Value>,
    /// Whether the root counter reached zero.
    pub completed: bool,
    pub discorporated: bool,
    pub stats: StatsSnapshot,
}

#[derive(Default)]
pub struct ExecutionBuilder {
    config: Option<RuntimeConfig>,
    scheduler: Option<Arc<dyn Scheduler>>,
    resolver: Option<Arc<dyn InvokerResolver>>,
    interceptor: Option<Arc<dyn Interceptor>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl ExecutionBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn InvokerResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Execution, ConfigError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => default_scheduler(&config)?,
        };
        Ok(Execution(Arc::new(ExecutionInner {
            config,
            scheduler,
            resolver: self.resolver.unwrap_or_else(|| Arc::new(SiteResolver)),
            interceptor: self.interceptor,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            stats: ExecutionStats::default(),
            publications: Mutex::new(Vec::new()),
            root_terminator: Terminator::root(),
            root_site: CallSite::continuation(),
            next_task_id: AtomicU64::new(1),
        })))
    }
}

#[cfg(feature = "rayon-scheduler")]
fn default_scheduler(config: &RuntimeConfig) -> Result<Arc<dyn Scheduler>, ConfigError> {
    let scheduler = crate::runtime::scheduler::RayonScheduler::new(config.worker_threads)
        .map_err(|err| ConfigError::Invalid(format!("failed to start worker pool: {}", err)))?;
    Ok(Arc::new(scheduler))
}

#[cfg(not(feature = "rayon-scheduler"))]
fn default_scheduler(_config: &RuntimeConfig) -> Result<Arc<dyn Scheduler>, ConfigError> {
    Ok(Arc::new(QueueScheduler::new()))
}

impl Execution {
    pub fn builder() -> ExecutionBuilder {
        ExecutionBuilder::default()
    }

    /// An execution running every task on the calling thread, in order.
    pub fn deterministic(config: RuntimeConfig) -> Result<Execution, ConfigError> {
        Execution::builder()
            .config(config)
            .scheduler(Arc::new(QueueScheduler::new()))
            .build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.0.config
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.0.stats
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.0.scheduler
    }

    pub fn root_terminator(&self) -> &Terminator {
        &self.0.root_terminator
    }

    pub fn root_site(&self) -> &CallSite {
        &self.0.root_site
    }

    pub fn notify(&self, event: RuntimeEvent) {
        self.0.sink.notify(event);
    }

    pub fn get_invoker(&self, target: &Value, args: &[Value]) -> Result<Invoker, RuntimeError> {
        self.0.resolver.get_invoker(target, args)
    }

    pub fn interceptor(&self) -> Option<&Arc<dyn Interceptor>> {
        self.0.interceptor.as_ref()
    }

    #[inline]
    pub fn should_intercept(&self, target: &Value, args: &[Value]) -> bool {
        self.0
            .interceptor
            .as_ref()
            .is_some_and(|interceptor| interceptor.should_intercept(target, args))
    }

    pub(crate) fn next_task_id(&self) -> u64 {
        self.0.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Hands `task` to the scheduler. Tokens this worker batched so far are
    /// published first so the task never observes a count missing them.
    pub fn schedule(&self, task: Task) {
        let applied = flush_all_counters(FlushPolarity::Positive);
        self.stats().record_counter_flushes(applied);
        self.0.scheduler.submit(task);
    }

    /// Runs `closure` on the current thread through the root call site,
    /// catching its tail calls.
    pub fn invoke(&self, closure: Arc<Closure>, args: Vec<Value>) -> Result<Value, Signal> {
        self.0.root_site.invoke(self, closure, args)
    }

    pub fn new_future(&self) -> Future {
        Future::with_policy(self.0.config.double_resolution)
    }

    /// Binds `future`, counting the resolution and reporting a second one
    /// under [`DoubleResolution::Report`].
    pub fn bind(&self, future: &Future, value: Value) {
        if future.try_bind(value) {
            self.stats().record_future_bound();
        } else {
            self.double_resolution(future);
        }
    }

    pub fn stop(&self, future: &Future) {
        if future.try_stop() {
            self.stats().record_future_stopped();
        } else {
            self.double_resolution(future);
        }
    }

    fn double_resolution(&self, future: &Future) {
        if future.policy() == DoubleResolution::Report {
            self.notify(RuntimeEvent::DoubleResolution {
                future: future.id(),
            });
        }
    }

    pub fn record_publication(&self, value: Value) {
        self.0.publications.lock().push(value);
    }

    pub fn publications(&self) -> Vec<Value> {
        self.0.publications.lock().clone()
    }

    /// A continuation that records its argument as a program publication and
    /// releases one token on `counter`.
    pub fn publisher(&self, counter: &Counter) -> Arc<Closure> {
        let target = CallTarget::new("publish", 1, |frame| {
            frame.execution().record_publication(frame.arg(0).clone());
            frame.captured_counter(0).halt_token();
            Ok(Value::Signal)
        })
        .with_captured(1);
        Arc::new(Closure::new(
            Arc::new(target),
            vec![Value::Counter(counter.clone())],
        ))
    }

    /// Kills the root terminator. Returns whether this call performed the kill.
    pub fn kill(&self) -> bool {
        self.0.root_terminator.kill()
    }

    /// Runs a CPS `program` as `program(P, C, T, args...)` under a fresh root
    /// counter and the root terminator, and waits until the root counter
    /// quiesces.
    pub fn run(&self, program: Arc<Closure>, args: Vec<Value>) -> RunReport {
        let latch = Arc::new(Latch::new());
        let discorporated = Arc::new(AtomicBool::new(false));
        let root = {
            let latch = latch.clone();
            let discorporated = discorporated.clone();
            Counter::root(move |discorporate| {
                discorporated.store(discorporate, Ordering::Release);
                latch.set();
            })
        };
        root.new_token();

        let mut call_args = vec![
            Value::Closure(self.publisher(&root)),
            Value::Counter(root.clone()),
            Value::Terminator(self.0.root_terminator.clone()),
        ];
        call_args.extend(args);
        tracing::debug!(
            target: "tessel::execution",
            program = program.entry.name(),
            scheduler = self.0.scheduler.name(),
            "run started"
        );
        self.schedule(Task::new(self, program, call_args));

        let completed = self.0.scheduler.wait(&latch);
        let applied = flush_all_counters(FlushPolarity::All)
            + flush_orphaned_workers(FlushPolarity::All);
        self.stats().record_counter_flushes(applied);
        let completed = completed || latch.is_set();

        let publications = std::mem::take(&mut *self.0.publications.lock());
        tracing::debug!(
            target: "tessel::execution",
            publications = publications.len(),
            completed,
            "run finished"
        );
        RunReport {
            publications,
            completed,
            discorporated: discorporated.load(Ordering::Acquire),
            stats: self.stats().snapshot(),
        }
    }
}
