use std::sync::Arc;

use crate::runtime::{
    call_target::CallTarget,
    closure::Closure,
    counter::Counter,
    error::invariant_violation,
    execution::Execution,
    future::{Join, JoinMode, JoinOutcome},
    signal::Signal,
    terminator::Terminator,
    value::Value,
};

/// Argument storage for one activation of an entry point.
///
/// A self tail call overwrites `closure` and `args` in place and re-enters
/// the body with the same frame.
pub struct Frame<'a> {
    execution: &'a Execution,
    closure: Arc<Closure>,
    args: Vec<Value>,
}

#[cold]
#[inline(never)]
fn mistyped(entry: &CallTarget, slot: &str, index: usize, expected: &str, got: &Value) -> ! {
    invariant_violation(format!(
        "{}: {} {} expected {}, got {}",
        entry.name(),
        slot,
        index,
        expected,
        got.type_name()
    ))
}

#[cold]
#[inline(never)]
fn missing(entry: &CallTarget, slot: &str, index: usize, len: usize) -> ! {
    invariant_violation(format!(
        "{}: {} {} out of range ({} present)",
        entry.name(),
        slot,
        index,
        len
    ))
}

impl<'a> Frame<'a> {
    pub(crate) fn new(execution: &'a Execution, closure: Arc<Closure>, args: Vec<Value>) -> Self {
        Self {
            execution,
            closure,
            args,
        }
    }

    pub fn execution(&self) -> &'a Execution {
        self.execution
    }

    pub fn closure(&self) -> &Arc<Closure> {
        &self.closure
    }

    pub fn entry(&self) -> &Arc<CallTarget> {
        &self.closure.entry
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub(crate) fn overwrite(&mut self, closure: Arc<Closure>, args: Vec<Value>) {
        self.closure = closure;
        self.args = args;
    }

    pub fn arg(&self, index: usize) -> &Value {
        match self.args.get(index) {
            Some(value) => value,
            None => missing(&self.closure.entry, "argument", index, self.args.len()),
        }
    }

    pub fn captured(&self, index: usize) -> &Value {
        match self.closure.captured.get(index) {
            Some(value) => value,
            None => missing(
                &self.closure.entry,
                "captured value",
                index,
                self.closure.captured.len(),
            ),
        }
    }

    pub fn arg_int(&self, index: usize) -> i64 {
        match self.arg(index) {
            Value::Integer(v) => *v,
            other => mistyped(&self.closure.entry, "argument", index, "Int", other),
        }
    }

    pub fn arg_closure(&self, index: usize) -> Arc<Closure> {
        match self.arg(index) {
            Value::Closure(closure) => closure.clone(),
            other => mistyped(&self.closure.entry, "argument", index, "Closure", other),
        }
    }

    pub fn arg_counter(&self, index: usize) -> Counter {
        match self.arg(index) {
            Value::Counter(counter) => counter.clone(),
            other => mistyped(&self.closure.entry, "argument", index, "Counter", other),
        }
    }

    pub fn arg_terminator(&self, index: usize) -> Terminator {
        match self.arg(index) {
            Value::Terminator(terminator) => terminator.clone(),
            other => mistyped(&self.closure.entry, "argument", index, "Terminator", other),
        }
    }

    pub fn captured_int(&self, index: usize) -> i64 {
        match self.captured(index) {
            Value::Integer(v) => *v,
            other => mistyped(&self.closure.entry, "captured value", index, "Int", other),
        }
    }

    pub fn captured_closure(&self, index: usize) -> Arc<Closure> {
        match self.captured(index) {
            Value::Closure(closure) => closure.clone(),
            other => mistyped(&self.closure.entry, "captured value", index, "Closure", other),
        }
    }

    pub fn captured_counter(&self, index: usize) -> Counter {
        match self.captured(index) {
            Value::Counter(counter) => counter.clone(),
            other => mistyped(&self.closure.entry, "captured value", index, "Counter", other),
        }
    }

    pub fn captured_terminator(&self, index: usize) -> Terminator {
        match self.captured(index) {
            Value::Terminator(terminator) => terminator.clone(),
            other => mistyped(
                &self.closure.entry,
                "captured value",
                index,
                "Terminator",
                other,
            ),
        }
    }

    /// Calls `target` through this entry's call site `site`.
    pub fn call(&mut self, site: usize, target: Value, args: Vec<Value>) -> Result<Value, Signal> {
        let entry = self.closure.entry.clone();
        entry.site(site).dispatch(self, target, args)
    }

    /// Direct call from CPS code holding a token on `counter`. A call that
    /// halts releases that token before the signal propagates.
    pub fn call_or_halt(
        &mut self,
        site: usize,
        target: Value,
        args: Vec<Value>,
        counter: &Counter,
    ) -> Result<Value, Signal> {
        self.call(site, target, args).inspect_err(|signal| {
            if matches!(signal, Signal::Halt) {
                counter.halt_token();
            }
        })
    }

    /// Spawns `computation` (called with no arguments) through spawn site
    /// `site`. The computation owns a token on `counter` that the caller
    /// created for it, usually with
    /// [`new_token_optimized`](Counter::new_token_optimized).
    pub fn spawn(
        &mut self,
        site: usize,
        counter: &Counter,
        terminator: &Terminator,
        computation: Arc<Closure>,
    ) -> Result<(), Signal> {
        let entry = self.closure.entry.clone();
        entry
            .site(site)
            .spawn(self.execution, counter, terminator, computation)
    }

    /// Resumes `p` through call site `site` with the values of `values`
    /// once every future among them is bound. Any stopped future halts the
    /// caller's token on `counter` instead.
    pub fn force(
        &mut self,
        site: usize,
        p: Arc<Closure>,
        counter: Counter,
        terminator: Terminator,
        values: Vec<Value>,
    ) -> Result<Value, Signal> {
        self.join(site, JoinMode::Force, p, counter, terminator, values)
    }

    /// Resumes `p` through call site `site`, with no arguments, once every
    /// future among `values` is resolved (bound or stopped).
    pub fn resolve(
        &mut self,
        site: usize,
        p: Arc<Closure>,
        counter: Counter,
        terminator: Terminator,
        values: Vec<Value>,
    ) -> Result<Value, Signal> {
        self.join(site, JoinMode::Resolve, p, counter, terminator, values)
    }

    fn join(
        &mut self,
        site: usize,
        mode: JoinMode,
        p: Arc<Closure>,
        counter: Counter,
        terminator: Terminator,
        values: Vec<Value>,
    ) -> Result<Value, Signal> {
        terminator.check_live().inspect_err(|_| counter.halt_token())?;
        match Join::start(self.execution, mode, p.clone(), counter, terminator, values) {
            JoinOutcome::Resolved(values) => self.call(site, Value::Closure(p), values),
            JoinOutcome::Halted | JoinOutcome::Blocked => Ok(Value::Signal),
        }
    }
}
