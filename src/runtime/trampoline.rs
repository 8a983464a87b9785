//! Tail-call trampoline.
//!
//! A [`TailCallLoop`] sits at a non-tail call site and catches tail call
//! signals raised below it. It keeps one chain node per distinct target it
//! has run, appended in first-seen order and never removed, and drives the
//! tail calls in a loop so the native stack stays flat however many logical
//! tail calls occur. Nodes hold their target weakly, since the site owning the
//! loop may belong to one of the targets it runs.
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::RwLock;

use crate::runtime::{
    call_target::{CallTarget, TargetId},
    dispatch::invoke_target,
    execution::Execution,
    signal::{Signal, TailCall},
    value::Value,
};

struct ChainNode {
    id: TargetId,
    target: Weak<CallTarget>,
}

#[derive(Default)]
struct TailChain {
    nodes: Vec<ChainNode>,
    index: HashMap<TargetId, usize>,
}

#[derive(Default)]
pub struct TailCallLoop {
    chain: RwLock<TailChain>,
}

impl TailCallLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `call` and every tail call it leads to.
    pub fn run(&self, execution: &Execution, call: TailCall) -> Result<Value, Signal> {
        let mut call = call;
        loop {
            let node = call.closure.entry.clone();
            self.register(execution, &node);
            match run_node(execution, &node, call) {
                Err(Signal::TailCall(next)) => call = *next,
                other => return other,
            }
        }
    }

    /// Appends a chain node for `entry` on first sight.
    fn register(&self, execution: &Execution, entry: &Arc<CallTarget>) {
        if self.chain.read().index.contains_key(&entry.id()) {
            return;
        }
        let mut chain = self.chain.write();
        if chain.index.contains_key(&entry.id()) {
            return;
        }
        let position = chain.nodes.len();
        chain.index.insert(entry.id(), position);
        chain.nodes.push(ChainNode {
            id: entry.id(),
            target: Arc::downgrade(entry),
        });
        execution.stats().record_trampoline_node();
        tracing::debug!(
            target: "tessel::trampoline",
            entry = entry.name(),
            id = entry.id().get(),
            position,
            "tail call chain extended"
        );
    }

    pub fn chain_len(&self) -> usize {
        self.chain.read().nodes.len()
    }

    /// Targets in first-seen order.
    pub fn chain_targets(&self) -> Vec<TargetId> {
        self.chain.read().nodes.iter().map(|node| node.id).collect()
    }

    /// Chain nodes whose target is still alive.
    pub fn live_nodes(&self) -> usize {
        self.chain
            .read()
            .nodes
            .iter()
            .filter(|node| node.target.strong_count() > 0)
            .count()
    }
}

/// Invokes one chain node, looping locally while the node tail-calls its own
/// target.
fn run_node(
    execution: &Execution,
    node: &Arc<CallTarget>,
    call: TailCall,
) -> Result<Value, Signal> {
    let TailCall {
        mut closure,
        mut args,
    } = call;
    loop {
        match invoke_target(execution, node, closure, args) {
            Err(Signal::TailCall(next)) if next.closure.same_entry(node) => {
                execution.stats().record_local_tail_loop();
                TailCall { closure, args } = *next;
            }
            other => return other,
        }
    }
}
