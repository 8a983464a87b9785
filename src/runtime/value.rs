use std::{fmt, sync::Arc};

use serde::{Serialize, Serializer};

use crate::runtime::{
    closure::Closure, counter::Counter, future::Future, site::SiteRef, terminator::Terminator,
};

/// Runtime value passed between closures, sites and futures.
///
/// ## Sharing Model
///
/// Primitives (Integer, Float, Boolean, Signal) are unboxed. Heap-backed
/// variants use `Arc` so a value can cross worker threads without copying:
/// cloning a `Value` is O(1) for every variant.
///
/// Counters, terminators and futures are handles. Two handle values are
/// equal only when they refer to the same underlying node.
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// Boolean value.
    Boolean(bool),
    /// UTF-8 string value.
    String(Arc<str>),
    /// The unit value published by calls that only report completion.
    Signal,
    /// Ordered, immutable collection of values.
    Tuple(Arc<Vec<Value>>),
    /// Closure compiled for this runtime.
    Closure(Arc<Closure>),
    /// Foreign or native site, dispatched through an invoker.
    Site(SiteRef),
    /// Single-assignment cell.
    Future(Future),
    /// Termination-tracking node, passed as the `C` argument of CPS calls.
    Counter(Counter),
    /// Cancellation node, passed as the `T` argument of CPS calls.
    Terminator(Terminator),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Signal, Value::Signal) => true,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Site(a), Value::Site(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (Value::Future(a), Value::Future(b)) => a.ptr_eq(b),
            (Value::Counter(a), Value::Counter(b)) => a.ptr_eq(b),
            (Value::Terminator(a), Value::Terminator(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "\"{}\"", v),
            Value::Signal => write!(f, "signal"),
            Value::Tuple(elements) => {
                let items: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", items.join(", "))
            }
            Value::Closure(closure) => write!(f, "<closure {}>", closure.entry.name()),
            Value::Site(site) => write!(f, "<site {}>", site.name()),
            Value::Future(future) => write!(f, "<future #{}>", future.id()),
            Value::Counter(counter) => write!(f, "<counter #{}>", counter.id()),
            Value::Terminator(terminator) => write!(f, "<terminator #{}>", terminator.id()),
        }
    }
}

impl Value {
    /// Returns the runtime type label used in diagnostics and invoker shapes.
    ///
    /// These labels are user-visible and are expected to remain stable.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "Int",
            Value::Float(_) => "Float",
            Value::Boolean(_) => "Bool",
            Value::String(_) => "String",
            Value::Signal => "Signal",
            Value::Tuple(_) => "Tuple",
            Value::Closure(_) => "Closure",
            Value::Site(_) => "Site",
            Value::Future(_) => "Future",
            Value::Counter(_) => "Counter",
            Value::Terminator(_) => "Terminator",
        }
    }

    /// Only `Boolean(false)` is falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Boolean(false))
    }

    pub fn string(text: impl AsRef<str>) -> Self {
        Value::String(Arc::from(text.as_ref()))
    }

    pub fn tuple(elements: Vec<Value>) -> Self {
        Value::Tuple(Arc::new(elements))
    }

    pub fn closure(closure: Closure) -> Self {
        Value::Closure(Arc::new(closure))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Arc<Closure>> {
        match self {
            Value::Closure(closure) => Some(closure),
            _ => None,
        }
    }

    pub fn as_counter(&self) -> Option<&Counter> {
        match self {
            Value::Counter(counter) => Some(counter),
            _ => None,
        }
    }

    pub fn as_terminator(&self) -> Option<&Terminator> {
        match self {
            Value::Terminator(terminator) => Some(terminator),
            _ => None,
        }
    }

    pub fn as_future(&self) -> Option<&Future> {
        match self {
            Value::Future(future) => Some(future),
            _ => None,
        }
    }

    /// Label naming a call target in reports.
    pub fn target_label(&self) -> String {
        match self {
            Value::Closure(closure) => closure.entry.name().to_string(),
            Value::Site(site) => site.name().to_string(),
            other => other.type_name().to_string(),
        }
    }
}

/// Values serialize as their display text.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

/// Comma-separated type labels of an argument list, used as the argument
/// shape in invoker lookups and reports.
pub fn argument_shape(args: &[Value]) -> String {
    args.iter()
        .map(Value::type_name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Type labels of an argument list, kept by invokers specialized on it.
pub fn shape_of(args: &[Value]) -> Vec<&'static str> {
    args.iter().map(Value::type_name).collect()
}

/// Whether `args` has exactly the type labels in `shape`.
#[inline]
pub fn matches_shape(args: &[Value], shape: &[&'static str]) -> bool {
    args.len() == shape.len()
        && args
            .iter()
            .zip(shape)
            .all(|(arg, label)| arg.type_name() == *label)
}
