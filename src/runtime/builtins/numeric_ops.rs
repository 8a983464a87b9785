use crate::runtime::value::Value;

use super::helpers::{arg_int, arg_number, check_arity, type_error};

/// Integer arithmetic when both operands are integers, float otherwise.
fn arithmetic(
    args: &[Value],
    name: &str,
    signature: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, String> {
    check_arity(args, 2, name, signature)?;
    if let (Value::Integer(a), Value::Integer(b)) = (&args[0], &args[1]) {
        return int_op(*a, *b)
            .map(Value::Integer)
            .ok_or_else(|| format!("{}: integer overflow ({}, {})", name, a, b));
    }
    let a = arg_number(args, 0, name, "first argument", signature)?;
    let b = arg_number(args, 1, name, "second argument", signature)?;
    Ok(Value::Float(float_op(a, b)))
}

pub(super) fn builtin_add(args: &[Value]) -> Result<Value, String> {
    arithmetic(args, "add", "add(a, b)", i64::checked_add, |a, b| a + b)
}

pub(super) fn builtin_sub(args: &[Value]) -> Result<Value, String> {
    arithmetic(args, "sub", "sub(a, b)", i64::checked_sub, |a, b| a - b)
}

pub(super) fn builtin_mul(args: &[Value]) -> Result<Value, String> {
    arithmetic(args, "mul", "mul(a, b)", i64::checked_mul, |a, b| a * b)
}

pub(super) fn builtin_div(args: &[Value]) -> Result<Value, String> {
    check_arity(args, 2, "div", "div(a, b)")?;
    match &args[1] {
        Value::Integer(0) => Err("div: division by zero".to_string()),
        Value::Float(v) if *v == 0.0 => Err("div: division by zero".to_string()),
        _ => arithmetic(args, "div", "div(a, b)", i64::checked_div, |a, b| a / b),
    }
}

pub(super) fn builtin_rem(args: &[Value]) -> Result<Value, String> {
    check_arity(args, 2, "rem", "rem(a, b)")?;
    let a = arg_int(args, 0, "rem", "first argument", "rem(a, b)")?;
    let b = arg_int(args, 1, "rem", "second argument", "rem(a, b)")?;
    if b == 0 {
        return Err("rem: division by zero".to_string());
    }
    Ok(Value::Integer(a.wrapping_rem(b)))
}

pub(super) fn builtin_abs(args: &[Value]) -> Result<Value, String> {
    check_arity(args, 1, "abs", "abs(n)")?;
    match &args[0] {
        Value::Integer(v) => v
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| format!("abs: integer overflow ({})", v)),
        Value::Float(v) => Ok(Value::Float(v.abs())),
        other => Err(type_error(
            "abs",
            "argument",
            "Number",
            other.type_name(),
            "abs(n)",
        )),
    }
}

pub(super) fn builtin_min(args: &[Value]) -> Result<Value, String> {
    check_arity(args, 2, "min", "min(a, b)")?;
    if let (Value::Integer(a), Value::Integer(b)) = (&args[0], &args[1]) {
        return Ok(Value::Integer(*a.min(b)));
    }
    let a = arg_number(args, 0, "min", "first argument", "min(a, b)")?;
    let b = arg_number(args, 1, "min", "second argument", "min(a, b)")?;
    Ok(Value::Float(a.min(b)))
}

pub(super) fn builtin_max(args: &[Value]) -> Result<Value, String> {
    check_arity(args, 2, "max", "max(a, b)")?;
    if let (Value::Integer(a), Value::Integer(b)) = (&args[0], &args[1]) {
        return Ok(Value::Integer(*a.max(b)));
    }
    let a = arg_number(args, 0, "max", "first argument", "max(a, b)")?;
    let b = arg_number(args, 1, "max", "second argument", "max(a, b)")?;
    Ok(Value::Float(a.max(b)))
}
