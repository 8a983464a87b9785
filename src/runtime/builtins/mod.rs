//! Native sites available to every program.
//!
//! Direct builtins are plain functions over argument slices; CPS builtins
//! publish through a [`CallContext`]. Both are exposed as [`Value::Site`]
//! through [`get_builtin`].
use std::{fmt, sync::Arc};

use crate::runtime::{
    BuiltinFn,
    error::{RuntimeError, SiteError},
    site::{CallContext, CpsInvoker, DirectInvoker, Invoker, Site},
    value::{Value, matches_shape, shape_of},
};

mod comparison_ops;
mod cps_ops;
mod helpers;
mod numeric_ops;
mod tuple_ops;


use comparison_ops::{
    builtin_eq, builtin_ge, builtin_gt, builtin_le, builtin_lt, builtin_ne, builtin_not,
};
use cps_ops::{builtin_each, builtin_ift, builtin_stop};
use numeric_ops::{
    builtin_abs, builtin_add, builtin_div, builtin_max, builtin_min, builtin_mul, builtin_rem,
    builtin_sub,
};
use tuple_ops::{builtin_index, builtin_len, builtin_tuple};

/// Native function backing a CPS builtin site.
pub type CpsBuiltinFn = fn(&CallContext, &[Value]) -> Result<(), SiteError>;

/// A site that answers synchronously.
#[derive(Clone, Copy)]
pub struct BuiltinSite {
    pub name: &'static str,
    pub func: BuiltinFn,
}

/// A site that may publish any number of values.
#[derive(Clone, Copy)]
pub struct CpsBuiltin {
    pub name: &'static str,
    pub func: CpsBuiltinFn,
}

impl fmt::Debug for BuiltinSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuiltinSite({})", self.name)
    }
}

impl fmt::Debug for CpsBuiltin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpsBuiltin({})", self.name)
    }
}

impl Site for BuiltinSite {
    fn name(&self) -> &str {
        self.name
    }

    fn invoker(&self, args: &[Value]) -> Result<Invoker, RuntimeError> {
        Ok(Invoker::direct(BuiltinInvoker {
            site: *self,
            shape: shape_of(args),
        }))
    }
}

impl Site for CpsBuiltin {
    fn name(&self) -> &str {
        self.name
    }

    fn invoker(&self, args: &[Value]) -> Result<Invoker, RuntimeError> {
        Ok(Invoker::cps(CpsBuiltinInvoker {
            site: *self,
            shape: shape_of(args),
        }))
    }
}

/// Invoker specialized on one argument shape.
struct BuiltinInvoker {
    site: BuiltinSite,
    shape: Vec<&'static str>,
}

struct CpsBuiltinInvoker {
    site: CpsBuiltin,
    shape: Vec<&'static str>,
}

fn targets_site(target: &Value, name: &str) -> bool {
    matches!(target, Value::Site(site) if site.name() == name)
}

impl DirectInvoker for BuiltinInvoker {
    fn can_invoke(&self, target: &Value, args: &[Value]) -> bool {
        targets_site(target, self.site.name) && matches_shape(args, &self.shape)
    }

    fn invoke_direct(&self, _target: &Value, args: &[Value]) -> Result<Value, SiteError> {
        (self.site.func)(args).map_err(SiteError::Failed)
    }
}

impl CpsInvoker for CpsBuiltinInvoker {
    fn can_invoke(&self, target: &Value, args: &[Value]) -> bool {
        targets_site(target, self.site.name) && matches_shape(args, &self.shape)
    }

    fn invoke(&self, ctx: &CallContext, _target: &Value, args: &[Value]) -> Result<(), SiteError> {
        (self.site.func)(ctx, args)
    }
}

pub static BUILTINS: &[BuiltinSite] = &[
    BuiltinSite {
        name: "add",
        func: builtin_add,
    },
    BuiltinSite {
        name: "sub",
        func: builtin_sub,
    },
    BuiltinSite {
        name: "mul",
        func: builtin_mul,
    },
    BuiltinSite {
        name: "div",
        func: builtin_div,
    },
    BuiltinSite {
        name: "rem",
        func: builtin_rem,
    },
    BuiltinSite {
        name: "abs",
        func: builtin_abs,
    },
    BuiltinSite {
        name: "min",
        func: builtin_min,
    },
    BuiltinSite {
        name: "max",
        func: builtin_max,
    },
    BuiltinSite {
        name: "eq",
        func: builtin_eq,
    },
    BuiltinSite {
        name: "ne",
        func: builtin_ne,
    },
    BuiltinSite {
        name: "lt",
        func: builtin_lt,
    },
    BuiltinSite {
        name: "le",
        func: builtin_le,
    },
    BuiltinSite {
        name: "gt",
        func: builtin_gt,
    },
    BuiltinSite {
        name: "ge",
        func: builtin_ge,
    },
    BuiltinSite {
        name: "not",
        func: builtin_not,
    },
    BuiltinSite {
        name: "tuple",
        func: builtin_tuple,
    },
    BuiltinSite {
        name: "len",
        func: builtin_len,
    },
    BuiltinSite {
        name: "index",
        func: builtin_index,
    },
];

pub static CPS_BUILTINS: &[CpsBuiltin] = &[
    CpsBuiltin {
        name: "each",
        func: builtin_each,
    },
    CpsBuiltin {
        name: "stop",
        func: builtin_stop,
    },
    CpsBuiltin {
        name: "ift",
        func: builtin_ift,
    },
];

/// Looks up a builtin by name and wraps it as a site value.
pub fn get_builtin(name: &str) -> Option<Value> {
    if let Some(site) = BUILTINS.iter().find(|b| b.name == name) {
        return Some(Value::Site(Arc::new(*site)));
    }
    CPS_BUILTINS
        .iter()
        .find(|b| b.name == name)
        .map(|site| Value::Site(Arc::new(*site)))
}

pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTINS
        .iter()
        .map(|b| b.name)
        .chain(CPS_BUILTINS.iter().map(|b| b.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_builtin() {
        assert!(get_builtin("add").is_some());
        assert!(get_builtin("each").is_some());
        assert!(get_builtin("nonexistent").is_none());
    }

    #[test]
    fn test_builtin_names_are_unique() {
        let mut names: Vec<_> = builtin_names().collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_direct_invoker_checks_shape() {
        let add = get_builtin("add").unwrap();
        let Value::Site(site) = &add else {
            panic!("expected site");
        };
        let args = [Value::Integer(1), Value::Integer(2)];
        let invoker = site.invoker(&args).unwrap();
        assert!(invoker.is_direct());
        assert!(invoker.can_invoke(&add, &args));
        assert!(!invoker.can_invoke(&add, &[Value::Float(1.0), Value::Integer(2)]));
        assert!(!invoker.can_invoke(&add, &[Value::Integer(1)]));
        let three = [Value::Integer(1), Value::Integer(2), Value::Integer(3)];
        assert!(!invoker.can_invoke(&add, &three));
        assert!(!invoker.can_invoke(&get_builtin("sub").unwrap(), &args));
    }

    #[test]
    fn test_direct_invoker_reports_failure() {
        let div = get_builtin("div").unwrap();
        let Value::Site(site) = &div else {
            panic!("expected site");
        };
        let args = [Value::Integer(1), Value::Integer(0)];
        let Invoker::Direct(invoker) = site.invoker(&args).unwrap() else {
            panic!("expected direct invoker");
        };
        let err = invoker.invoke_direct(&div, &args).unwrap_err();
        assert!(matches!(err, SiteError::Failed(message) if message.contains("division by zero")));
    }

    #[test]
    fn test_cps_builtins_resolve_to_cps_invokers() {
        let each = get_builtin("each").unwrap();
        let Value::Site(site) = &each else {
            panic!("expected site");
        };
        assert!(!site.invoker(&[]).unwrap().is_direct());
    }
}
