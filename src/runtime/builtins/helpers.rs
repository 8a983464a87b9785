use crate::runtime::value::Value;

pub(super) fn format_hint(signature: &str) -> String {
    format!("\n\nHint:\n  {}", signature)
}

pub(super) fn arity_error(name: &str, expected: &str, got: usize, signature: &str) -> String {
    format!(
        "wrong number of arguments\n\n  site: {}\n  expected: {}\n  got: {}{}",
        name,
        expected,
        got,
        format_hint(signature)
    )
}

pub(super) fn type_error(
    name: &str,
    label: &str,
    expected: &str,
    got: &str,
    signature: &str,
) -> String {
    format!(
        "{} expected {} to be {}, got {}{}",
        name,
        label,
        expected,
        got,
        format_hint(signature)
    )
}

pub(super) fn check_arity(
    args: &[Value],
    expected: usize,
    name: &str,
    signature: &str,
) -> Result<(), String> {
    if args.len() != expected {
        return Err(arity_error(
            name,
            &expected.to_string(),
            args.len(),
            signature,
        ));
    }
    Ok(())
}

pub(super) fn arg_int(
    args: &[Value],
    index: usize,
    name: &str,
    label: &str,
    signature: &str,
) -> Result<i64, String> {
    match &args[index] {
        Value::Integer(value) => Ok(*value),
        other => Err(type_error(
            name,
            label,
            "Int",
            other.type_name(),
            signature,
        )),
    }
}

pub(super) fn arg_number(
    args: &[Value],
    index: usize,
    name: &str,
    label: &str,
    signature: &str,
) -> Result<f64, String> {
    match &args[index] {
        Value::Integer(v) => Ok(*v as f64),
        Value::Float(v) => Ok(*v),
        other => Err(type_error(
            name,
            label,
            "Number",
            other.type_name(),
            signature,
        )),
    }
}

pub(super) fn arg_tuple<'a>(
    args: &'a [Value],
    index: usize,
    name: &str,
    label: &str,
    signature: &str,
) -> Result<&'a [Value], String> {
    match &args[index] {
        Value::Tuple(elements) => Ok(elements.as_slice()),
        other => Err(type_error(
            name,
            label,
            "Tuple",
            other.type_name(),
            signature,
        )),
    }
}

pub(super) fn arg_bool(
    args: &[Value],
    index: usize,
    name: &str,
    label: &str,
    signature: &str,
) -> Result<bool, String> {
    match &args[index] {
        Value::Boolean(value) => Ok(*value),
        other => Err(type_error(
            name,
            label,
            "Bool",
            other.type_name(),
            signature,
        )),
    }
}
