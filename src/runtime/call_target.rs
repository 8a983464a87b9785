use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;

use crate::runtime::{
    EntryFn, closure::Closure, dispatch::CallSite, error::invariant_violation, frame::Frame,
    signal::Signal, spawn::SpawnProfile, value::Value,
};

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an entry point. Dispatch caches and trampoline chains are
/// keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetId(u64);

impl TargetId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A compiled entry point: fixed arity, fixed captured layout and the call
/// sites its body dispatches through.
pub struct CallTarget {
    id: TargetId,
    name: String,
    num_parameters: usize,
    num_captured: usize,
    sites: Vec<CallSite>,
    body: Box<EntryFn>,
    profile: SpawnProfile,
}

impl CallTarget {
    pub fn new(
        name: impl Into<String>,
        num_parameters: usize,
        body: impl Fn(&mut Frame<'_>) -> Result<Value, Signal> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: TargetId(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            num_parameters,
            num_captured: 0,
            sites: Vec::new(),
            body: Box::new(body),
            profile: SpawnProfile::default(),
        }
    }

    pub fn with_captured(mut self, num_captured: usize) -> Self {
        self.num_captured = num_captured;
        self
    }

    /// Appends a call site; the body addresses it by position.
    pub fn with_site(mut self, site: CallSite) -> Self {
        self.sites.push(site);
        self
    }

    pub fn with_sites(mut self, sites: impl IntoIterator<Item = CallSite>) -> Self {
        self.sites.extend(sites);
        self
    }

    /// Wraps the target in a closure with an empty environment.
    pub fn into_closure(self) -> Arc<Closure> {
        Arc::new(Closure::new(Arc::new(self), Vec::new()))
    }

    pub fn into_direct_closure(self) -> Arc<Closure> {
        Arc::new(Closure::direct(Arc::new(self), Vec::new()))
    }

    pub fn into_closure_with(self, captured: Vec<Value>) -> Arc<Closure> {
        Arc::new(Closure::new(Arc::new(self), captured))
    }

    pub fn into_direct_closure_with(self, captured: Vec<Value>) -> Arc<Closure> {
        Arc::new(Closure::direct(Arc::new(self), captured))
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_parameters(&self) -> usize {
        self.num_parameters
    }

    pub fn num_captured(&self) -> usize {
        self.num_captured
    }

    pub fn sites(&self) -> &[CallSite] {
        &self.sites
    }

    pub fn site(&self, index: usize) -> &CallSite {
        match self.sites.get(index) {
            Some(site) => site,
            None => invariant_violation(format!(
                "{} has no call site {} ({} declared)",
                self.name,
                index,
                self.sites.len()
            )),
        }
    }

    pub fn profile(&self) -> &SpawnProfile {
        &self.profile
    }

    #[inline]
    pub(crate) fn enter(&self, frame: &mut Frame<'_>) -> Result<Value, Signal> {
        (self.body)(frame)
    }
}

impl fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTarget")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("num_parameters", &self.num_parameters)
            .field("num_captured", &self.num_captured)
            .field("sites", &self.sites.len())
            .finish()
    }
}
