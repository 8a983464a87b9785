use thiserror::Error;

/// Failures reported through the event sink. They never abort unrelated
/// computations: the failing call releases its token instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("no invoker for {target} with arguments ({shape})")]
    NoInvoker { target: String, shape: String },
    #[error("{0} publishes asynchronously and cannot be called for a direct result")]
    RequiresContinuation(String),
    #[error("future #{0} is already resolved")]
    AlreadyResolved(u64),
}

/// What an external invoker returns instead of a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SiteError {
    /// The site produced no result. Not an error and never reported.
    #[error("site halted without a result")]
    Halt,
    #[error("{0}")]
    Failed(String),
}

impl From<String> for SiteError {
    fn from(message: String) -> Self {
        SiteError::Failed(message)
    }
}

impl From<&str> for SiteError {
    fn from(message: &str) -> Self {
        SiteError::Failed(message.to_string())
    }
}

/// Aborts on a broken contract between the closure graph and the runtime
/// (negative counts, malformed environments, mistyped arguments).
#[cold]
#[inline(never)]
pub(crate) fn invariant_violation(message: String) -> ! {
    tracing::error!(target: "tessel::runtime", %message, "runtime invariant violated");
    panic!("runtime invariant violated: {}", message);
}
