use crate::runtime::{error::SiteError, site::CallContext, value::Value};

use super::helpers::{arg_bool, arg_tuple, check_arity};

/// Publishes every element of a tuple, then halts.
pub(super) fn builtin_each(ctx: &CallContext, args: &[Value]) -> Result<(), SiteError> {
    check_arity(args, 1, "each", "each(tuple)")?;
    let elements = arg_tuple(args, 0, "each", "argument", "each(tuple)")?;
    for element in elements {
        if ctx.terminator().is_killed() {
            break;
        }
        ctx.publish(element.clone());
    }
    ctx.halt();
    Ok(())
}

/// Halts without publishing.
pub(super) fn builtin_stop(ctx: &CallContext, _args: &[Value]) -> Result<(), SiteError> {
    ctx.halt();
    Ok(())
}

/// Publishes a signal when the argument is true, otherwise halts silently.
pub(super) fn builtin_ift(ctx: &CallContext, args: &[Value]) -> Result<(), SiteError> {
    check_arity(args, 1, "ift", "ift(b)")?;
    if arg_bool(args, 0, "ift", "argument", "ift(b)")? {
        ctx.publish_final(Value::Signal);
    } else {
        ctx.halt();
    }
    Ok(())
}
