use crate::runtime::{
    error::{SiteError, invariant_violation},
    frame::Frame,
    signal::Signal,
    site::CallContext,
    value::Value,
};

use super::{CallKind, CallSite, split_cps};

impl CallSite {
    /// Hands the call to the execution's interceptor. Argument handling is
    /// the same as for external calls.
    pub(super) fn dispatch_intercepted(
        &self,
        frame: &mut Frame<'_>,
        target: Value,
        args: Vec<Value>,
    ) -> Result<Value, Signal> {
        let execution = frame.execution();
        let Some(interceptor) = execution.interceptor() else {
            invariant_violation(format!(
                "call site {} intercepted without an interceptor",
                self.id
            ));
        };
        match self.kind {
            CallKind::Cps => {
                let (cps, args) = split_cps(args);
                let ctx = CallContext::new(execution, self.id, cps.p, cps.counter, cps.terminator);
                if !ctx.begin() {
                    return Err(Signal::Killed);
                }
                match interceptor.intercept(&ctx, &target, &args) {
                    Ok(()) => {}
                    Err(SiteError::Halt) => ctx.halt(),
                    Err(SiteError::Failed(message)) => {
                        self.report_failure(execution, &target, message);
                        ctx.halt();
                    }
                }
                Ok(Value::Signal)
            }
            _ => match interceptor.intercept_direct(&target, &args) {
                Ok(value) => Ok(value),
                Err(SiteError::Halt) => Err(Signal::Halt),
                Err(SiteError::Failed(message)) => {
                    self.report_failure(execution, &target, message);
                    Err(Signal::Halt)
                }
            },
        }
    }
}
