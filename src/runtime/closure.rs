use std::sync::Arc;

use crate::runtime::{
    call_target::{CallTarget, TargetId},
    value::Value,
};

/// An entry point plus its captured environment.
///
/// CPS closures take `[P, C, T, args...]` and publish through `P`; direct
/// closures take their arguments alone and return their result.
#[derive(Debug, Clone)]
pub struct Closure {
    pub entry: Arc<CallTarget>,
    pub captured: Vec<Value>,
    pub direct_return: bool,
}

impl Closure {
    pub fn new(entry: Arc<CallTarget>, captured: Vec<Value>) -> Self {
        Self {
            entry,
            captured,
            direct_return: false,
        }
    }

    pub fn direct(entry: Arc<CallTarget>, captured: Vec<Value>) -> Self {
        Self {
            entry,
            captured,
            direct_return: true,
        }
    }

    pub fn target_id(&self) -> TargetId {
        self.entry.id()
    }

    pub fn same_entry(&self, entry: &Arc<CallTarget>) -> bool {
        Arc::ptr_eq(&self.entry, entry)
    }
}
