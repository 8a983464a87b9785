//! Per-call-site polymorphic inline cache.
//!
//! `Uninitialized -> Cached(n) -> Universal`. Entries are appended under the
//! cache lock and read without it; once a new target arrives at a full cache
//! the site turns universal for good and the entries are no longer consulted.
//!
//! Internal entries hold their target weakly: a target's own sites may cache
//! calls to it.
use std::sync::{
    Arc, OnceLock, Weak,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::runtime::{call_target::CallTarget, error::RuntimeError, site::Invoker, value::Value};

/// Upper bound for the configurable cache capacity.
pub const MAX_CACHE_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// Closure entry point, matched by identity.
    Internal(Weak<CallTarget>),
    /// External invoker, matched by `can_invoke`.
    External(Invoker),
}

impl CacheEntry {
    pub fn internal(entry: &Arc<CallTarget>) -> Self {
        CacheEntry::Internal(Arc::downgrade(entry))
    }

    /// Whether this is the internal entry for `entry`.
    #[inline]
    pub fn is_entry(&self, entry: &Arc<CallTarget>) -> bool {
        match self {
            CacheEntry::Internal(target) => std::ptr::eq(target.as_ptr(), Arc::as_ptr(entry)),
            CacheEntry::External(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uninitialized,
    Cached(usize),
    Universal,
}

pub enum Insert<'a> {
    /// A racing thread added a matching entry first.
    Existing(&'a CacheEntry),
    Added(&'a CacheEntry),
    Universal { transitioned: bool },
}

pub struct InlineCache {
    slots: [OnceLock<CacheEntry>; MAX_CACHE_CAPACITY],
    len: AtomicUsize,
    universal: AtomicBool,
    lock: Mutex<()>,
}

impl InlineCache {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| OnceLock::new()),
            len: AtomicUsize::new(0),
            universal: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> CacheState {
        if self.is_universal() {
            return CacheState::Universal;
        }
        match self.len.load(Ordering::Acquire) {
            0 => CacheState::Uninitialized,
            n => CacheState::Cached(n),
        }
    }

    #[inline]
    pub fn is_universal(&self) -> bool {
        self.universal.load(Ordering::Acquire)
    }

    fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        let len = self.len.load(Ordering::Acquire);
        self.slots[..len].iter().filter_map(OnceLock::get)
    }

    /// Whether `entry` is cached here.
    #[inline]
    pub fn lookup_internal(&self, entry: &Arc<CallTarget>) -> bool {
        !self.is_universal() && self.entries().any(|cached| cached.is_entry(entry))
    }

    #[inline]
    pub fn lookup_external(&self, target: &Value, args: &[Value]) -> Option<&Invoker> {
        if self.is_universal() {
            return None;
        }
        self.entries().find_map(|cached| match cached {
            CacheEntry::External(invoker) if invoker.can_invoke(target, args) => Some(invoker),
            _ => None,
        })
    }

    /// Slow path: under the cache lock, re-checks for an entry accepted by
    /// `matches`, then appends the one produced by `make`, or turns the cache
    /// universal when `capacity` entries are already present. A failing
    /// `make` also turns the cache universal.
    pub fn insert(
        &self,
        capacity: usize,
        matches: impl Fn(&CacheEntry) -> bool,
        make: impl FnOnce() -> Result<CacheEntry, RuntimeError>,
    ) -> Result<Insert<'_>, RuntimeError> {
        let _guard = self.lock.lock();
        if self.is_universal() {
            return Ok(Insert::Universal {
                transitioned: false,
            });
        }
        if let Some(existing) = self.entries().find(|cached| matches(*cached)) {
            return Ok(Insert::Existing(existing));
        }
        let len = self.len.load(Ordering::Acquire);
        if len >= capacity.min(MAX_CACHE_CAPACITY) {
            self.universal.store(true, Ordering::Release);
            return Ok(Insert::Universal { transitioned: true });
        }
        let entry = match make() {
            Ok(entry) => entry,
            Err(err) => {
                self.universal.store(true, Ordering::Release);
                return Err(err);
            }
        };
        let added = self.slots[len].get_or_init(|| entry);
        self.len.store(len + 1, Ordering::Release);
        Ok(Insert::Added(added))
    }
}

impl Default for InlineCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::Value;

    fn target(name: &str) -> Arc<CallTarget> {
        Arc::new(CallTarget::new(name, 0, |_| Ok(Value::Signal)))
    }

    fn add(cache: &InlineCache, capacity: usize, entry: &Arc<CallTarget>) -> bool {
        matches!(
            cache.insert(
                capacity,
                |cached| cached.is_entry(entry),
                || Ok(CacheEntry::internal(entry)),
            ),
            Ok(Insert::Added(_))
        )
    }

    #[test]
    fn fills_up_to_capacity_then_turns_universal() {
        let cache = InlineCache::new();
        assert_eq!(cache.state(), CacheState::Uninitialized);
        let targets: Vec<_> = (0..3).map(|i| target(&format!("t{}", i))).collect();
        assert!(add(&cache, 2, &targets[0]));
        assert!(add(&cache, 2, &targets[1]));
        assert_eq!(cache.state(), CacheState::Cached(2));
        assert!(cache.lookup_internal(&targets[1]));
        assert!(!add(&cache, 2, &targets[2]));
        assert_eq!(cache.state(), CacheState::Universal);
        assert!(!cache.lookup_internal(&targets[0]));
    }

    #[test]
    fn repeated_insert_of_same_target_finds_existing_entry() {
        let cache = InlineCache::new();
        let t = target("t");
        assert!(add(&cache, 4, &t));
        assert!(!add(&cache, 4, &t));
        assert_eq!(cache.state(), CacheState::Cached(1));
    }

    #[test]
    fn cached_entries_do_not_keep_targets_alive() {
        let cache = InlineCache::new();
        let t = target("t");
        let weak = Arc::downgrade(&t);
        assert!(add(&cache, 4, &t));
        drop(t);
        assert!(weak.upgrade().is_none());
        assert_eq!(cache.state(), CacheState::Cached(1));
    }

    #[test]
    fn failed_resolution_turns_universal() {
        let cache = InlineCache::new();
        let result = cache.insert(
            4,
            |_| false,
            || {
                Err(RuntimeError::NoInvoker {
                    target: "Int".to_string(),
                    shape: String::new(),
                })
            },
        );
        assert!(result.is_err());
        assert_eq!(cache.state(), CacheState::Universal);
    }
}
