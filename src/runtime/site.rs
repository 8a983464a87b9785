//! Foreign and native call targets.
//!
//! A [`Site`] is resolved to an [`Invoker`] per (target, argument shape).
//! Direct invokers return a value synchronously; CPS invokers publish zero or
//! more values through a [`CallContext`] and halt it when done.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use crate::runtime::{
    closure::Closure,
    counter::Counter,
    dispatch::CallSiteId,
    error::{RuntimeError, SiteError},
    execution::Execution,
    telemetry::RuntimeEvent,
    terminator::{Terminatable, Terminator},
    value::{Value, argument_shape},
};

pub trait Site: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Returns an invoker able to handle this target with `args`.
    fn invoker(&self, args: &[Value]) -> Result<Invoker, RuntimeError>;
}

pub type SiteRef = Arc<dyn Site>;

pub trait DirectInvoker: Send + Sync {
    /// Whether this invoker still applies to `target` and `args`. Checked
    /// before every use of a cached invoker.
    fn can_invoke(&self, target: &Value, args: &[Value]) -> bool;

    fn invoke_direct(&self, target: &Value, args: &[Value]) -> Result<Value, SiteError>;
}

pub trait CpsInvoker: Send + Sync {
    fn can_invoke(&self, target: &Value, args: &[Value]) -> bool;

    /// Publishes through `ctx`. Returning `Ok` leaves the context running;
    /// the site must eventually call [`CallContext::halt`]. Returning an
    /// error halts the context.
    fn invoke(&self, ctx: &CallContext, target: &Value, args: &[Value]) -> Result<(), SiteError>;
}

#[derive(Clone)]
pub enum Invoker {
    Direct(Arc<dyn DirectInvoker>),
    Cps(Arc<dyn CpsInvoker>),
}

impl Invoker {
    pub fn direct(invoker: impl DirectInvoker + 'static) -> Self {
        Invoker::Direct(Arc::new(invoker))
    }

    pub fn cps(invoker: impl CpsInvoker + 'static) -> Self {
        Invoker::Cps(Arc::new(invoker))
    }

    pub fn can_invoke(&self, target: &Value, args: &[Value]) -> bool {
        match self {
            Invoker::Direct(invoker) => invoker.can_invoke(target, args),
            Invoker::Cps(invoker) => invoker.can_invoke(target, args),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Invoker::Direct(_))
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invoker::Direct(_) => write!(f, "Invoker::Direct"),
            Invoker::Cps(_) => write!(f, "Invoker::Cps"),
        }
    }
}

/// Maps an external target and its arguments to an invoker.
pub trait InvokerResolver: Send + Sync {
    fn get_invoker(&self, target: &Value, args: &[Value]) -> Result<Invoker, RuntimeError>;
}

/// Default resolver: asks the [`Site`] itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SiteResolver;

impl InvokerResolver for SiteResolver {
    fn get_invoker(&self, target: &Value, args: &[Value]) -> Result<Invoker, RuntimeError> {
        match target {
            Value::Site(site) => site.invoker(args),
            other => Err(RuntimeError::NoInvoker {
                target: other.type_name().to_string(),
                shape: argument_shape(args),
            }),
        }
    }
}

/// Runtime-level hook consulted before internal and external dispatch.
pub trait Interceptor: Send + Sync {
    fn should_intercept(&self, target: &Value, args: &[Value]) -> bool;

    /// Handles an intercepted CPS call. Same contract as
    /// [`CpsInvoker::invoke`].
    fn intercept(
        &self,
        ctx: &CallContext,
        target: &Value,
        args: &[Value],
    ) -> Result<(), SiteError>;

    /// Handles an intercepted direct call.
    fn intercept_direct(&self, target: &Value, args: &[Value]) -> Result<Value, SiteError> {
        let _ = (target, args);
        Err(SiteError::Failed(
            "interceptor does not handle direct calls".to_string(),
        ))
    }
}

/// Continuation state of one CPS external call.
///
/// Each publication takes a new token on the counter and resumes the
/// continuation with that token. The call's own token is released by the
/// first [`halt`](CallContext::halt), or by a kill of its terminator.
#[derive(Clone)]
pub struct CallContext(Arc<ContextInner>);

struct ContextInner {
    execution: Execution,
    call_site: CallSiteId,
    p: Arc<Closure>,
    counter: Counter,
    terminator: Terminator,
    state: Mutex<ContextState>,
    publications: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Running,
    Halted,
    Killed,
}

impl CallContext {
    pub(crate) fn new(
        execution: &Execution,
        call_site: CallSiteId,
        p: Arc<Closure>,
        counter: Counter,
        terminator: Terminator,
    ) -> Self {
        CallContext(Arc::new(ContextInner {
            execution: execution.clone(),
            call_site,
            p,
            counter,
            terminator,
            state: Mutex::new(ContextState::Running),
            publications: AtomicUsize::new(0),
        }))
    }

    /// Registers with the terminator. Returns false when the terminator was
    /// already killed; the context is then discorporated and halted.
    pub(crate) fn begin(&self) -> bool {
        self.0.terminator.add_child(self.0.clone())
    }

    pub fn call_site(&self) -> CallSiteId {
        self.0.call_site
    }

    pub fn terminator(&self) -> &Terminator {
        &self.0.terminator
    }

    pub fn is_halted(&self) -> bool {
        *self.0.state.lock() != ContextState::Running
    }

    pub fn publication_count(&self) -> usize {
        self.0.publications.load(Ordering::Relaxed)
    }

    /// Resumes the continuation with `value` under a fresh token.
    /// Publications after halt are dropped and reported; publications after
    /// a kill are dropped silently.
    pub fn publish(&self, value: Value) {
        {
            let state = self.0.state.lock();
            match *state {
                ContextState::Running => self.0.counter.new_token(),
                ContextState::Killed => return,
                ContextState::Halted => {
                    drop(state);
                    self.0.execution.notify(RuntimeEvent::PublishAfterHalt {
                        call_site: self.0.call_site.get(),
                    });
                    return;
                }
            }
        }
        self.0.publications.fetch_add(1, Ordering::Relaxed);
        self.0
            .execution
            .run_continuation(self.0.p.clone(), vec![value], None);
    }

    /// Publishes `value`, then halts.
    pub fn publish_final(&self, value: Value) {
        self.publish(value);
        self.halt();
    }

    /// Releases the call's token. Only the first call has an effect.
    pub fn halt(&self) {
        if !self.0.finish(ContextState::Halted) {
            return;
        }
        self.0.terminator.remove_child_ptr(&self.0);
        self.0.counter.halt_token();
    }
}

impl ContextInner {
    /// Leaves the running state. Returns false when already finished.
    fn finish(&self, next: ContextState) -> bool {
        let mut state = self.state.lock();
        if *state != ContextState::Running {
            return false;
        }
        *state = next;
        true
    }
}

impl Terminatable for ContextInner {
    fn kill(&self) {
        if self.finish(ContextState::Killed) {
            self.counter.set_discorporate();
            self.counter.halt_token();
        }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("call_site", &self.0.call_site)
            .field("halted", &self.is_halted())
            .field("publications", &self.publication_count())
            .finish()
    }
}
