use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::runtime::signal::Signal;

static NEXT_TERMINATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Anything a terminator kills along with itself: nested terminators,
/// live external call contexts and joins blocked on futures.
pub trait Terminatable: Send + Sync {
    fn kill(&self);
}

/// Cooperative cancellation node.
///
/// `killed` only ever goes from false to true. Killing a node kills every
/// attached child, and children attached after the kill are killed on
/// arrival, so [`check_live`](Terminator::check_live) only has to read the
/// node's own flag.
#[derive(Clone)]
pub struct Terminator(Arc<TerminatorInner>);

pub(crate) struct TerminatorInner {
    id: u64,
    parent: Option<Weak<TerminatorInner>>,
    killed: AtomicBool,
    /// `None` once killed.
    children: Mutex<Option<Vec<Arc<dyn Terminatable>>>>,
}

impl TerminatorInner {
    fn new(parent: Option<Weak<TerminatorInner>>) -> Self {
        Self {
            id: NEXT_TERMINATOR_ID.fetch_add(1, Ordering::Relaxed),
            parent,
            killed: AtomicBool::new(false),
            children: Mutex::new(Some(Vec::new())),
        }
    }

    fn kill_now(&self) -> bool {
        if self.killed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let children = self.children.lock().take().unwrap_or_default();
        for child in children {
            child.kill();
        }
        true
    }

    fn attach(&self, child: Arc<dyn Terminatable>) -> bool {
        {
            let mut children = self.children.lock();
            if let Some(list) = children.as_mut() {
                list.push(child);
                return true;
            }
        }
        child.kill();
        false
    }

    fn detach(&self, child: *const ()) {
        if let Some(list) = self.children.lock().as_mut() {
            if let Some(pos) = list
                .iter()
                .position(|c| std::ptr::addr_eq(Arc::as_ptr(c), child))
            {
                list.swap_remove(pos);
            }
        }
    }
}

impl Terminatable for TerminatorInner {
    fn kill(&self) {
        self.kill_now();
    }
}

impl Terminator {
    pub fn root() -> Self {
        Terminator(Arc::new(TerminatorInner::new(None)))
    }

    /// Creates a child of `parent`. The child starts killed when the parent
    /// already is.
    pub fn nested(parent: &Terminator) -> Self {
        let child = Arc::new(TerminatorInner::new(Some(Arc::downgrade(&parent.0))));
        parent.0.attach(child.clone());
        Terminator(child)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Kills this node and everything attached below it. Returns whether this
    /// call performed the kill.
    pub fn kill(&self) -> bool {
        self.0.kill_now()
    }

    pub fn is_killed(&self) -> bool {
        self.0.killed.load(Ordering::Acquire)
    }

    /// Cooperative checkpoint.
    #[inline]
    pub fn check_live(&self) -> Result<(), Signal> {
        if self.is_killed() {
            Err(Signal::Killed)
        } else {
            Ok(())
        }
    }

    /// Attaches `child` so it is killed with this node. Returns false (after
    /// killing `child`) when this node is already killed.
    pub fn add_child(&self, child: Arc<dyn Terminatable>) -> bool {
        self.0.attach(child)
    }

    pub fn remove_child(&self, child: &Arc<dyn Terminatable>) {
        self.0.detach(Arc::as_ptr(child) as *const ());
    }

    pub(crate) fn remove_child_ptr<T: Terminatable>(&self, child: &Arc<T>) {
        self.0.detach(Arc::as_ptr(child) as *const ());
    }

    /// Detaches this node from its parent once its scope exits normally.
    pub fn detach(&self) {
        if let Some(parent) = self.0.parent.as_ref().and_then(Weak::upgrade) {
            parent.detach(Arc::as_ptr(&self.0) as *const ());
        }
    }

    pub fn child_count(&self) -> usize {
        self.0.children.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn ptr_eq(&self, other: &Terminator) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminator")
            .field("id", &self.0.id)
            .field("killed", &self.is_killed())
            .finish()
    }
}
