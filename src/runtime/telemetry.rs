//! Error notification channel and execution counters.
use std::{
    fmt,
    io::Write,
    sync::atomic::{AtomicU64, Ordering},
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;

/// Events reported by the runtime without interrupting the computation that
/// produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// An external call failed; the caller's token was released.
    Caught {
        call_site: u64,
        target: String,
        message: String,
    },
    /// An internal call supplied the wrong number of arguments.
    ArityMismatch {
        target: String,
        expected: usize,
        actual: usize,
    },
    /// A second `bind`/`stop` reached an already-resolved future.
    DoubleResolution { future: u64 },
    /// A site published through a call context that had already halted.
    PublishAfterHalt { call_site: u64 },
}

impl fmt::Display for RuntimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeEvent::Caught {
                call_site,
                target,
                message,
            } => write!(f, "call site #{} calling {} failed: {}", call_site, target, message),
            RuntimeEvent::ArityMismatch {
                target,
                expected,
                actual,
            } => write!(
                f,
                "wrong number of arguments to {}: want={}, got={}",
                target, expected, actual
            ),
            RuntimeEvent::DoubleResolution { future } => {
                write!(f, "future #{} resolved more than once", future)
            }
            RuntimeEvent::PublishAfterHalt { call_site } => {
                write!(f, "call site #{} published after halting", call_site)
            }
        }
    }
}

pub trait EventSink: Send + Sync {
    fn notify(&self, event: RuntimeEvent);
}

/// Default sink: one `warn!` per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, event: RuntimeEvent) {
        tracing::warn!(target: "tessel::events", %event, "runtime event");
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for CollectingSink {
    fn notify(&self, event: RuntimeEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards events to a crossbeam channel. Events are dropped once the
/// receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<RuntimeEvent>,
}

impl ChannelSink {
    pub fn unbounded() -> (Self, Receiver<RuntimeEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn notify(&self, event: RuntimeEvent) {
        let _ = self.sender.send(event);
    }
}

/// Writes each event as one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn notify(&self, event: RuntimeEvent) {
        let mut writer = self.writer.lock();
        if serde_json::to_writer(&mut *writer, &event).is_ok() {
            let _ = writer.write_all(b"\n");
        }
    }
}

/// Relaxed counters describing how an execution was carried out.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    spawns_inlined: AtomicU64,
    spawns_scheduled: AtomicU64,
    spawns_killed: AtomicU64,
    continuations_inlined: AtomicU64,
    continuations_scheduled: AtomicU64,
    tasks_run: AtomicU64,
    self_tail_calls: AtomicU64,
    tail_call_signals: AtomicU64,
    local_tail_loops: AtomicU64,
    trampoline_nodes: AtomicU64,
    cache_specializations: AtomicU64,
    cache_universal_transitions: AtomicU64,
    counter_flushes: AtomicU64,
    halt_continuations: AtomicU64,
    futures_bound: AtomicU64,
    futures_stopped: AtomicU64,
    caught_failures: AtomicU64,
    max_inline_depth: AtomicU64,
}

#[inline(always)]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ExecutionStats {
    pub fn record_spawn_inlined(&self) {
        bump(&self.spawns_inlined);
    }

    pub fn record_spawn_scheduled(&self) {
        bump(&self.spawns_scheduled);
    }

    pub fn record_spawn_killed(&self) {
        bump(&self.spawns_killed);
    }

    pub fn record_continuation_inlined(&self) {
        bump(&self.continuations_inlined);
    }

    pub fn record_continuation_scheduled(&self) {
        bump(&self.continuations_scheduled);
    }

    pub fn record_task_run(&self) {
        bump(&self.tasks_run);
    }

    pub fn record_self_tail_call(&self) {
        bump(&self.self_tail_calls);
    }

    pub fn record_tail_call_signal(&self) {
        bump(&self.tail_call_signals);
    }

    pub fn record_local_tail_loop(&self) {
        bump(&self.local_tail_loops);
    }

    pub fn record_trampoline_node(&self) {
        bump(&self.trampoline_nodes);
    }

    pub fn record_cache_specialization(&self) {
        bump(&self.cache_specializations);
    }

    pub fn record_cache_universal_transition(&self) {
        bump(&self.cache_universal_transitions);
    }

    pub fn record_counter_flushes(&self, applied: usize) {
        if applied > 0 {
            self.counter_flushes
                .fetch_add(applied as u64, Ordering::Relaxed);
        }
    }

    pub fn record_halt_continuation(&self) {
        bump(&self.halt_continuations);
    }

    pub fn record_future_bound(&self) {
        bump(&self.futures_bound);
    }

    pub fn record_future_stopped(&self) {
        bump(&self.futures_stopped);
    }

    pub fn record_caught_failure(&self) {
        bump(&self.caught_failures);
    }

    pub fn record_inline_depth(&self, depth: usize) {
        self.max_inline_depth
            .fetch_max(depth as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            spawns_inlined: load(&self.spawns_inlined),
            spawns_scheduled: load(&self.spawns_scheduled),
            spawns_killed: load(&self.spawns_killed),
            continuations_inlined: load(&self.continuations_inlined),
            continuations_scheduled: load(&self.continuations_scheduled),
            tasks_run: load(&self.tasks_run),
            self_tail_calls: load(&self.self_tail_calls),
            tail_call_signals: load(&self.tail_call_signals),
            local_tail_loops: load(&self.local_tail_loops),
            trampoline_nodes: load(&self.trampoline_nodes),
            cache_specializations: load(&self.cache_specializations),
            cache_universal_transitions: load(&self.cache_universal_transitions),
            counter_flushes: load(&self.counter_flushes),
            halt_continuations: load(&self.halt_continuations),
            futures_bound: load(&self.futures_bound),
            futures_stopped: load(&self.futures_stopped),
            caught_failures: load(&self.caught_failures),
            max_inline_depth: load(&self.max_inline_depth),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub spawns_inlined: u64,
    pub spawns_scheduled: u64,
    pub spawns_killed: u64,
    pub continuations_inlined: u64,
    pub continuations_scheduled: u64,
    pub tasks_run: u64,
    pub self_tail_calls: u64,
    pub tail_call_signals: u64,
    pub local_tail_loops: u64,
    pub trampoline_nodes: u64,
    pub cache_specializations: u64,
    pub cache_universal_transitions: u64,
    pub counter_flushes: u64,
    pub halt_continuations: u64,
    pub futures_bound: u64,
    pub futures_stopped: u64,
    pub caught_failures: u64,
    pub max_inline_depth: u64,
}

impl StatsSnapshot {
    pub fn fields(&self) -> [(&'static str, u64); 18] {
        [
            ("spawns_inlined", self.spawns_inlined),
            ("spawns_scheduled", self.spawns_scheduled),
            ("spawns_killed", self.spawns_killed),
            ("continuations_inlined", self.continuations_inlined),
            ("continuations_scheduled", self.continuations_scheduled),
            ("tasks_run", self.tasks_run),
            ("self_tail_calls", self.self_tail_calls),
            ("tail_call_signals", self.tail_call_signals),
            ("local_tail_loops", self.local_tail_loops),
            ("trampoline_nodes", self.trampoline_nodes),
            ("cache_specializations", self.cache_specializations),
            ("cache_universal_transitions", self.cache_universal_transitions),
            ("counter_flushes", self.counter_flushes),
            ("halt_continuations", self.halt_continuations),
            ("futures_bound", self.futures_bound),
            ("futures_stopped", self.futures_stopped),
            ("caught_failures", self.caught_failures),
            ("max_inline_depth", self.max_inline_depth),
        ]
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.fields() {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}
