use crate::runtime::{
    error::{RuntimeError, SiteError},
    execution::Execution,
    frame::Frame,
    signal::Signal,
    site::{CallContext, Invoker},
    value::Value,
};

use super::{
    CallKind, CallSite, CpsArgs,
    cache::{CacheEntry, Insert},
    split_cps,
};

impl CallSite {
    pub(super) fn dispatch_external(
        &self,
        frame: &mut Frame<'_>,
        target: Value,
        args: Vec<Value>,
    ) -> Result<Value, Signal> {
        match self.kind {
            CallKind::Cps => {
                let (cps, args) = split_cps(args);
                self.external_cps(frame, target, cps, args)
            }
            _ => self.external_direct(frame.execution(), target, args),
        }
    }

    fn external_cps(
        &self,
        frame: &mut Frame<'_>,
        target: Value,
        cps: CpsArgs,
        args: Vec<Value>,
    ) -> Result<Value, Signal> {
        let execution = frame.execution();
        let invoker = match self.resolve_invoker(execution, &target, &args) {
            Ok(invoker) => invoker,
            Err(err) => {
                self.report_failure(execution, &target, err.to_string());
                cps.counter.halt_token();
                return Ok(Value::Signal);
            }
        };
        match invoker {
            Invoker::Direct(invoker) => match invoker.invoke_direct(&target, &args) {
                Ok(value) => self.call_closure_uncached(frame, cps.p, vec![value]),
                Err(SiteError::Halt) => {
                    cps.counter.halt_token();
                    Ok(Value::Signal)
                }
                Err(SiteError::Failed(message)) => {
                    self.report_failure(execution, &target, message);
                    cps.counter.halt_token();
                    Ok(Value::Signal)
                }
            },
            Invoker::Cps(invoker) => {
                let ctx = CallContext::new(execution, self.id, cps.p, cps.counter, cps.terminator);
                if !ctx.begin() {
                    return Err(Signal::Killed);
                }
                match invoker.invoke(&ctx, &target, &args) {
                    Ok(()) => {}
                    Err(SiteError::Halt) => ctx.halt(),
                    Err(SiteError::Failed(message)) => {
                        self.report_failure(execution, &target, message);
                        ctx.halt();
                    }
                }
                Ok(Value::Signal)
            }
        }
    }

    fn external_direct(
        &self,
        execution: &Execution,
        target: Value,
        args: Vec<Value>,
    ) -> Result<Value, Signal> {
        let invoker = match self.resolve_invoker(execution, &target, &args) {
            Ok(invoker) => invoker,
            Err(err) => {
                self.report_failure(execution, &target, err.to_string());
                return Err(Signal::Halt);
            }
        };
        match invoker {
            Invoker::Direct(invoker) => match invoker.invoke_direct(&target, &args) {
                Ok(value) => Ok(value),
                Err(SiteError::Halt) => Err(Signal::Halt),
                Err(SiteError::Failed(message)) => {
                    self.report_failure(execution, &target, message);
                    Err(Signal::Halt)
                }
            },
            Invoker::Cps(_) => {
                let err = RuntimeError::RequiresContinuation(target.target_label());
                self.report_failure(execution, &target, err.to_string());
                Err(Signal::Halt)
            }
        }
    }

    /// Cached invoker for `target`, specializing the site on a miss.
    fn resolve_invoker(
        &self,
        execution: &Execution,
        target: &Value,
        args: &[Value],
    ) -> Result<Invoker, RuntimeError> {
        if let Some(invoker) = self.cache.lookup_external(target, args) {
            return Ok(invoker.clone());
        }
        if self.cache.is_universal() {
            return execution.get_invoker(target, args);
        }
        let insert = self.cache.insert(
            execution.config().call_cache_capacity,
            |cached| match cached {
                CacheEntry::External(invoker) => invoker.can_invoke(target, args),
                CacheEntry::Internal(_) => false,
            },
            || execution.get_invoker(target, args).map(CacheEntry::External),
        );
        match insert {
            Ok(insert) => {
                self.record_insert(execution, &insert);
                match insert {
                    Insert::Added(CacheEntry::External(invoker))
                    | Insert::Existing(CacheEntry::External(invoker)) => Ok(invoker.clone()),
                    _ => execution.get_invoker(target, args),
                }
            }
            Err(err) => {
                execution.stats().record_cache_universal_transition();
                tracing::debug!(
                    target: "tessel::dispatch",
                    call_site = self.id.get(),
                    error = %err,
                    "invoker resolution failed, call site turned universal"
                );
                Err(err)
            }
        }
    }
}
