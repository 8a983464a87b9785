//! Termination tracking.
//!
//! A [`Counter`] counts live tokens of a concurrent scope. The shared count
//! is an atomic; workers may also batch token changes in their own offset
//! list ([`Counter::new_token_optimized`], [`Counter::halt_token_optimized`])
//! and reconcile them with [`flush_all_counters`].
//!
//! The reconciled count (shared count plus every outstanding offset) never
//! goes negative and reaches zero exactly once.
use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::runtime::{
    closure::Closure, error::invariant_violation, execution::Execution,
};

static NEXT_COUNTER_ID: AtomicU64 = AtomicU64::new(1);

type ZeroCallback = Box<dyn FnOnce(bool) + Send>;

enum OnZero {
    /// Halt continuation, run per the spawn boundary rules.
    Continuation {
        execution: Execution,
        closure: Arc<Closure>,
    },
    /// Host callback receiving whether the counter discorporated.
    Callback(ZeroCallback),
}

#[derive(Clone)]
pub struct Counter(Arc<CounterInner>);

struct CounterInner {
    id: u64,
    parent: Option<Counter>,
    live: AtomicI64,
    halted: AtomicBool,
    discorporate: AtomicBool,
    on_zero: Mutex<Option<OnZero>>,
}

impl Counter {
    fn from_parts(parent: Option<Counter>, on_zero: Option<OnZero>) -> Self {
        if let Some(parent) = &parent {
            parent.new_token();
        }
        Counter(Arc::new(CounterInner {
            id: NEXT_COUNTER_ID.fetch_add(1, Ordering::Relaxed),
            parent,
            live: AtomicI64::new(0),
            halted: AtomicBool::new(false),
            discorporate: AtomicBool::new(false),
            on_zero: Mutex::new(on_zero),
        }))
    }

    /// A standalone counter with no parent and no action at zero.
    pub fn new() -> Self {
        Self::from_parts(None, None)
    }

    /// A top-level counter that calls `on_zero(discorporated)` when it
    /// quiesces.
    pub fn root(on_zero: impl FnOnce(bool) + Send + 'static) -> Self {
        Self::from_parts(None, Some(OnZero::Callback(Box::new(on_zero))))
    }

    /// A counter nested under `parent`. Takes one token on the parent, which
    /// is released after this counter reaches zero.
    pub fn nested(parent: &Counter) -> Self {
        Self::from_parts(Some(parent.clone()), None)
    }

    /// Like [`nested`](Self::nested), running `halt` (with no arguments) when
    /// this counter reaches zero. The parent token is released after `halt`
    /// returns.
    pub fn nested_with_halt(parent: &Counter, execution: &Execution, halt: Arc<Closure>) -> Self {
        Self::from_parts(
            Some(parent.clone()),
            Some(OnZero::Continuation {
                execution: execution.clone(),
                closure: halt,
            }),
        )
    }

    /// A parentless counter running `halt` when it reaches zero.
    pub fn with_halt(execution: &Execution, halt: Arc<Closure>) -> Self {
        Self::from_parts(
            None,
            Some(OnZero::Continuation {
                execution: execution.clone(),
                closure: halt,
            }),
        )
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn parent(&self) -> Option<&Counter> {
        self.0.parent.as_ref()
    }

    /// The shared count, excluding offsets still batched by any worker.
    pub fn live_tokens(&self) -> i64 {
        self.0.live.load(Ordering::Acquire)
    }

    pub fn is_halted(&self) -> bool {
        self.0.halted.load(Ordering::Acquire)
    }

    pub fn is_discorporate(&self) -> bool {
        self.0.discorporate.load(Ordering::Acquire)
    }

    pub fn set_discorporate(&self) {
        self.0.discorporate.store(true, Ordering::Release);
    }

    pub fn new_token(&self) {
        let pending = take_local_delta(self.0.id);
        self.apply(pending + 1);
    }

    pub fn halt_token(&self) {
        let pending = take_local_delta(self.0.id);
        self.apply(pending - 1);
    }

    /// Batches a new token in this worker's offset list. The caller must
    /// already hold a token on this counter that only this worker releases.
    ///
    /// Meant for spawn tokens: an inlined computation releases its token on
    /// the same worker, which cancels the offset without touching the shared
    /// count, and a scheduled one is flushed by the hand-off. Tokens another
    /// thread may release concurrently (a call context killed from outside)
    /// go through [`new_token`](Counter::new_token).
    pub fn new_token_optimized(&self) {
        add_local_delta(self, 1);
    }

    /// Batches a token release in this worker's offset list. The counter can
    /// only reach zero once the offset is flushed.
    pub fn halt_token_optimized(&self) {
        add_local_delta(self, -1);
    }

    /// Drives the count straight to zero.
    ///
    /// Only this worker's pending offset is absorbed; no other worker may
    /// hold an offset for this counter.
    pub fn halt(&self) {
        let pending = take_local_delta(self.0.id);
        let prev = self.0.live.swap(0, Ordering::AcqRel);
        let reconciled = prev + pending;
        if reconciled < 0 {
            invariant_violation(format!(
                "counter #{} halted with negative count {}",
                self.0.id, reconciled
            ));
        }
        if reconciled > 0 {
            self.reach_zero();
        }
    }

    /// This worker's pending offset for this counter.
    pub fn local_offset(&self) -> i64 {
        with_local(|offsets| offsets.delta_of(self.0.id)).unwrap_or(0)
    }

    /// Shared count plus every worker's outstanding offset.
    pub fn reconciled_count(&self) -> i64 {
        let pending: i64 = registry()
            .lock()
            .iter()
            .map(|worker| worker.lock().delta_of(self.0.id))
            .sum();
        self.live_tokens() + pending
    }

    pub fn ptr_eq(&self, other: &Counter) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn apply(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        if delta > 0 && self.is_halted() {
            invariant_violation(format!(
                "counter #{} received tokens after reaching zero",
                self.0.id
            ));
        }
        let prev = self.0.live.fetch_add(delta, Ordering::AcqRel);
        let now = prev + delta;
        if now < 0 {
            invariant_violation(format!(
                "counter #{} went negative ({} -> {})",
                self.0.id, prev, now
            ));
        }
        if now == 0 {
            self.reach_zero();
        }
    }

    fn reach_zero(&self) {
        if self.0.halted.swap(true, Ordering::AcqRel) {
            invariant_violation(format!("counter #{} reached zero twice", self.0.id));
        }
        let discorporate = self.is_discorporate();
        let action = self.0.on_zero.lock().take();
        match action {
            Some(OnZero::Continuation { execution, closure }) if !discorporate => {
                execution.stats().record_halt_continuation();
                execution.run_continuation(closure, Vec::new(), self.0.parent.clone());
            }
            Some(OnZero::Callback(callback)) => {
                callback(discorporate);
                self.release_parent(discorporate);
            }
            _ => self.release_parent(discorporate),
        }
    }

    fn release_parent(&self, discorporate: bool) {
        if let Some(parent) = &self.0.parent {
            if discorporate {
                parent.set_discorporate();
            }
            parent.halt_token();
        }
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("id", &self.0.id)
            .field("live", &self.live_tokens())
            .field("halted", &self.is_halted())
            .field("discorporate", &self.is_discorporate())
            .finish()
    }
}

/// Which batched offsets a flush reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolarity {
    /// Pending new tokens only. Safe at any point: never reaches zero.
    Positive,
    /// Pending releases only.
    Negative,
    All,
}

impl FlushPolarity {
    fn selects(self, delta: i64) -> bool {
        match self {
            FlushPolarity::Positive => delta > 0,
            FlushPolarity::Negative => delta < 0,
            FlushPolarity::All => true,
        }
    }
}

/// A batched, not yet reconciled change to one counter.
pub struct CounterOffset {
    counter: Counter,
    delta: i64,
}

impl CounterOffset {
    pub fn counter(&self) -> &Counter {
        &self.counter
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    /// Applies the delta to the shared count.
    pub fn flush(self) {
        self.counter.apply(self.delta);
    }
}

/// One worker's offset list: entries in first-touched order plus an index by
/// counter id.
#[derive(Default)]
struct WorkerOffsets {
    entries: Vec<CounterOffset>,
    index: HashMap<u64, usize>,
    /// Set when the owning thread exited with offsets outstanding.
    orphaned: bool,
}

impl WorkerOffsets {
    fn add(&mut self, counter: &Counter, delta: i64) {
        match self.index.get(&counter.id()) {
            Some(&i) => self.entries[i].delta += delta,
            None => {
                self.index.insert(counter.id(), self.entries.len());
                self.entries.push(CounterOffset {
                    counter: counter.clone(),
                    delta,
                });
            }
        }
    }

    fn delta_of(&self, id: u64) -> i64 {
        self.index.get(&id).map_or(0, |&i| self.entries[i].delta)
    }

    fn take(&mut self, id: u64) -> i64 {
        let Some(i) = self.index.remove(&id) else {
            return 0;
        };
        let offset = self.entries.swap_remove(i);
        if let Some(moved) = self.entries.get(i) {
            self.index.insert(moved.counter.id(), i);
        }
        offset.delta
    }

    /// Removes the entries selected by `polarity` and every zero entry.
    fn drain(&mut self, polarity: FlushPolarity) -> Vec<CounterOffset> {
        let mut drained = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for offset in self.entries.drain(..) {
            if offset.delta == 0 {
                continue;
            }
            if polarity.selects(offset.delta) {
                drained.push(offset);
            } else {
                kept.push(offset);
            }
        }
        self.entries = kept;
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, offset)| (offset.counter.id(), i))
            .collect();
        drained
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type SharedOffsets = Arc<Mutex<WorkerOffsets>>;

fn registry() -> &'static Mutex<Vec<SharedOffsets>> {
    static REGISTRY: OnceLock<Mutex<Vec<SharedOffsets>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

struct LocalOffsets {
    offsets: SharedOffsets,
}

impl LocalOffsets {
    fn register() -> Self {
        let offsets: SharedOffsets = Arc::default();
        registry().lock().push(offsets.clone());
        Self { offsets }
    }
}

impl Drop for LocalOffsets {
    fn drop(&mut self) {
        // A list that still holds offsets stays registered so a global flush
        // can reconcile it after the thread is gone.
        let mut offsets = self.offsets.lock();
        if offsets.is_empty() {
            drop(offsets);
            registry()
                .lock()
                .retain(|worker| !Arc::ptr_eq(worker, &self.offsets));
        } else {
            offsets.orphaned = true;
        }
    }
}

thread_local! {
    static LOCAL_OFFSETS: RefCell<Option<LocalOffsets>> = const { RefCell::new(None) };
}

fn with_local<R>(f: impl FnOnce(&mut WorkerOffsets) -> R) -> Option<R> {
    LOCAL_OFFSETS
        .try_with(|slot| {
            let shared = slot
                .borrow_mut()
                .get_or_insert_with(LocalOffsets::register)
                .offsets
                .clone();
            let mut offsets = shared.lock();
            f(&mut offsets)
        })
        .ok()
}

fn add_local_delta(counter: &Counter, delta: i64) {
    if with_local(|offsets| offsets.add(counter, delta)).is_none() {
        counter.apply(delta);
    }
}

fn take_local_delta(id: u64) -> i64 {
    with_local(|offsets| offsets.take(id)).unwrap_or(0)
}

/// Reconciles this worker's offsets selected by `polarity`. Returns the
/// number of offsets applied.
///
/// Offsets are removed from the list before they are applied, so halt
/// continuations fired by the flush may batch new offsets freely.
pub fn flush_all_counters(polarity: FlushPolarity) -> usize {
    let drained = with_local(|offsets| offsets.drain(polarity)).unwrap_or_default();
    let applied = drained.len();
    for offset in drained {
        offset.flush();
    }
    applied
}

/// Reconciles the offsets of every worker, including threads that exited
/// with offsets outstanding.
pub fn flush_all_workers(polarity: FlushPolarity) -> usize {
    flush_workers(polarity, |_| true)
}

/// Reconciles only the offsets left behind by threads that have exited.
pub fn flush_orphaned_workers(polarity: FlushPolarity) -> usize {
    flush_workers(polarity, |offsets| offsets.orphaned)
}

fn flush_workers(polarity: FlushPolarity, select: impl Fn(&WorkerOffsets) -> bool) -> usize {
    let drained = {
        let mut registry = registry().lock();
        let mut drained = Vec::new();
        for worker in registry.iter() {
            let mut offsets = worker.lock();
            if select(&offsets) {
                drained.extend(offsets.drain(polarity));
            }
        }
        registry.retain(|worker| {
            let offsets = worker.lock();
            !(offsets.orphaned && offsets.is_empty())
        });
        drained
    };
    let applied = drained.len();
    for offset in drained {
        offset.flush();
    }
    applied
}
