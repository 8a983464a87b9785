use std::sync::Arc;

use crate::runtime::{
    call_target::CallTarget,
    closure::Closure,
    error::invariant_violation,
    execution::Execution,
    frame::Frame,
    signal::Signal,
    telemetry::RuntimeEvent,
    value::Value,
};

use super::{CallSite, cache::CacheEntry};

impl CallSite {
    /// Calls a closure from this site: in tail position the call becomes a
    /// signal, otherwise it is invoked here with tail calls caught by the
    /// site's trampoline.
    pub(super) fn call_closure(
        &self,
        frame: &mut Frame<'_>,
        closure: Arc<Closure>,
        args: Vec<Value>,
    ) -> Result<Value, Signal> {
        if self.tail {
            return Err(self.tail_call(frame, closure, args));
        }
        self.invoke(frame.execution(), closure, args)
    }

    /// Calls a closure without consulting the cache.
    pub(super) fn call_closure_uncached(
        &self,
        frame: &mut Frame<'_>,
        closure: Arc<Closure>,
        args: Vec<Value>,
    ) -> Result<Value, Signal> {
        if self.tail {
            return Err(self.tail_call(frame, closure, args));
        }
        let execution = frame.execution();
        self.catch_tail_calls(execution, invoke_closure(execution, closure, args))
    }

    fn tail_call(&self, frame: &mut Frame<'_>, closure: Arc<Closure>, args: Vec<Value>) -> Signal {
        let execution = frame.execution();
        if execution.config().self_tail_elision && closure.same_entry(frame.entry()) {
            let arity = check_arity(execution, &closure.entry, closure.direct_return, &args);
            if let Err(signal) = arity {
                return signal;
            }
            execution.stats().record_self_tail_call();
            frame.overwrite(closure, args);
            return Signal::SelfTailCall;
        }
        execution.stats().record_tail_call_signal();
        Signal::tail_call(closure, args)
    }

    /// Non-tail invocation through the inline cache.
    pub(crate) fn invoke(
        &self,
        execution: &Execution,
        closure: Arc<Closure>,
        args: Vec<Value>,
    ) -> Result<Value, Signal> {
        let result = if self.cache.lookup_internal(&closure.entry) {
            invoke_closure(execution, closure, args)
        } else {
            self.invoke_slow(execution, closure, args)
        };
        self.catch_tail_calls(execution, result)
    }

    #[cold]
    #[inline(never)]
    fn invoke_slow(
        &self,
        execution: &Execution,
        closure: Arc<Closure>,
        args: Vec<Value>,
    ) -> Result<Value, Signal> {
        if self.cache.is_universal() {
            return invoke_closure(execution, closure, args);
        }
        let entry = &closure.entry;
        let insert = self.cache.insert(
            execution.config().call_cache_capacity,
            |cached| cached.is_entry(entry),
            || Ok(CacheEntry::internal(entry)),
        );
        if let Ok(insert) = &insert {
            self.record_insert(execution, insert);
        }
        invoke_closure(execution, closure, args)
    }

    pub(super) fn catch_tail_calls(
        &self,
        execution: &Execution,
        result: Result<Value, Signal>,
    ) -> Result<Value, Signal> {
        match result {
            Err(Signal::TailCall(call)) => self.trampoline.run(execution, *call),
            other => other,
        }
    }
}

fn check_arity(
    execution: &Execution,
    entry: &CallTarget,
    direct_return: bool,
    args: &[Value],
) -> Result<(), Signal> {
    if args.len() == entry.num_parameters() {
        return Ok(());
    }
    execution.notify(RuntimeEvent::ArityMismatch {
        target: entry.name().to_string(),
        expected: entry.num_parameters(),
        actual: args.len(),
    });
    // A CPS callee would have owned the caller's token.
    if !direct_return {
        if let Some(Value::Counter(counter)) = args.get(1) {
            counter.halt_token();
        }
    }
    Err(Signal::Halt)
}

/// Runs `closure` on a fresh frame, re-entering the body after every in-place
/// self tail call. Tail calls to other targets are returned as signals.
pub(crate) fn invoke_closure(
    execution: &Execution,
    closure: Arc<Closure>,
    args: Vec<Value>,
) -> Result<Value, Signal> {
    let entry = closure.entry.clone();
    invoke_target(execution, &entry, closure, args)
}

pub(crate) fn invoke_target(
    execution: &Execution,
    target: &CallTarget,
    closure: Arc<Closure>,
    args: Vec<Value>,
) -> Result<Value, Signal> {
    check_arity(execution, target, closure.direct_return, &args)?;
    if closure.captured.len() != target.num_captured() {
        invariant_violation(format!(
            "{} expects {} captured values, closure carries {}",
            target.name(),
            target.num_captured(),
            closure.captured.len()
        ));
    }
    let mut frame = Frame::new(execution, closure, args);
    loop {
        match target.enter(&mut frame) {
            Err(Signal::SelfTailCall) => {
                if frame.closure().captured.len() != target.num_captured() {
                    invariant_violation(format!(
                        "{} re-entered with {} captured values",
                        target.name(),
                        frame.closure().captured.len()
                    ));
                }
            }
            other => return other,
        }
    }
}
