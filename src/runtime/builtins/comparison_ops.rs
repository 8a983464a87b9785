use std::cmp::Ordering;

use crate::runtime::value::Value;

use super::helpers::{arg_bool, arg_number, check_arity};

fn compare(args: &[Value], name: &str, signature: &str) -> Result<Ordering, String> {
    check_arity(args, 2, name, signature)?;
    if let (Value::Integer(a), Value::Integer(b)) = (&args[0], &args[1]) {
        return Ok(a.cmp(b));
    }
    if let (Value::String(a), Value::String(b)) = (&args[0], &args[1]) {
        return Ok(a.cmp(b));
    }
    let a = arg_number(args, 0, name, "first argument", signature)?;
    let b = arg_number(args, 1, name, "second argument", signature)?;
    a.partial_cmp(&b)
        .ok_or_else(|| format!("{}: cannot order {} and {}", name, a, b))
}

pub(super) fn builtin_eq(args: &[Value]) -> Result<Value, String> {
    check_arity(args, 2, "eq", "eq(a, b)")?;
    Ok(Value::Boolean(args[0] == args[1]))
}

pub(super) fn builtin_ne(args: &[Value]) -> Result<Value, String> {
    check_arity(args, 2, "ne", "ne(a, b)")?;
    Ok(Value::Boolean(args[0] != args[1]))
}

pub(super) fn builtin_lt(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Boolean(compare(args, "lt", "lt(a, b)")?.is_lt()))
}

pub(super) fn builtin_le(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Boolean(compare(args, "le", "le(a, b)")?.is_le()))
}

pub(super) fn builtin_gt(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Boolean(compare(args, "gt", "gt(a, b)")?.is_gt()))
}

pub(super) fn builtin_ge(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Boolean(compare(args, "ge", "ge(a, b)")?.is_ge()))
}

pub(super) fn builtin_not(args: &[Value]) -> Result<Value, String> {
    check_arity(args, 1, "not", "not(b)")?;
    Ok(Value::Boolean(!arg_bool(args, 0, "not", "argument", "not(b)")?))
}
