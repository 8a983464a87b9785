use std::sync::Arc;

use crate::{
    programs,
    runtime::{
        call_target::CallTarget,
        config::RuntimeConfig,
        dispatch::CallSite,
        execution::Execution,
        signal::Signal,
        value::Value,
    },
};

fn execution(config: RuntimeConfig) -> Execution {
    Execution::deterministic(config).unwrap()
}

#[test]
fn mutual_tail_calls_run_in_constant_stack() {
    let execution = execution(RuntimeConfig::default());
    let result = programs::is_even(&execution, 1_000_000).unwrap();
    assert_eq!(result, Value::Boolean(true));

    let trampoline = execution.root_site().trampoline();
    assert_eq!(trampoline.chain_len(), 2);
    let stats = execution.stats().snapshot();
    assert_eq!(stats.tail_call_signals, 1_000_000);
    assert_eq!(stats.trampoline_nodes, 2);
    assert_eq!(stats.local_tail_loops, 0);
}

#[test]
fn chain_keeps_first_seen_order() {
    let execution = execution(RuntimeConfig::default());
    let (even, odd) = programs::even_odd();
    let result = execution
        .invoke(
            odd.clone(),
            vec![
                Value::Integer(3),
                Value::Closure(even.clone()),
                Value::Closure(odd.clone()),
            ],
        )
        .unwrap();
    assert_eq!(result, Value::Boolean(true));
    assert_eq!(
        execution.root_site().trampoline().chain_targets(),
        vec![even.target_id(), odd.target_id()]
    );

    // A later run through the same site reuses the nodes.
    execution
        .invoke(
            even.clone(),
            vec![Value::Integer(10), Value::Closure(even), Value::Closure(odd)],
        )
        .unwrap();
    assert_eq!(execution.root_site().trampoline().chain_len(), 2);
    assert_eq!(execution.stats().snapshot().trampoline_nodes, 2);
}

#[test]
fn self_tail_calls_reuse_the_frame() {
    let execution = execution(RuntimeConfig::default());
    let result = execution
        .invoke(programs::countdown(), vec![Value::Integer(100_000)])
        .unwrap();
    assert_eq!(result, Value::Integer(0));

    let stats = execution.stats().snapshot();
    assert_eq!(stats.self_tail_calls, 100_000);
    assert_eq!(stats.tail_call_signals, 0);
    assert_eq!(execution.root_site().trampoline().chain_len(), 0);
}

#[test]
fn without_elision_self_calls_loop_locally() {
    let config = RuntimeConfig {
        self_tail_elision: false,
        ..RuntimeConfig::default()
    };
    let execution = execution(config);
    let result = execution
        .invoke(programs::countdown(), vec![Value::Integer(1000)])
        .unwrap();
    assert_eq!(result, Value::Integer(0));

    let stats = execution.stats().snapshot();
    assert_eq!(stats.self_tail_calls, 0);
    assert_eq!(stats.tail_call_signals, 1000);
    assert_eq!(stats.trampoline_nodes, 1);
    assert_eq!(stats.local_tail_loops, 999);
}

#[test]
fn non_tail_site_catches_tail_calls_below_it() {
    let execution = execution(RuntimeConfig::default());
    let (even, odd) = programs::even_odd();
    // outer(n) = even(n, even, odd), called from a non-tail site.
    let outer = CallTarget::new("outer", 1, |frame| {
        let n = frame.arg(0).clone();
        let even = frame.captured(0).clone();
        let odd = frame.captured(1).clone();
        let parity = frame.call(0, even.clone(), vec![n, even, odd])?;
        Ok(Value::tuple(vec![parity, Value::string("after")]))
    })
    .with_captured(2)
    .with_site(CallSite::direct())
    .into_direct_closure_with(vec![Value::Closure(even), Value::Closure(odd)]);

    let result = execution
        .invoke(outer.clone(), vec![Value::Integer(7)])
        .unwrap();
    assert_eq!(
        result,
        Value::tuple(vec![Value::Boolean(false), Value::string("after")])
    );
    assert_eq!(outer.entry.site(0).trampoline().chain_len(), 2);
    assert_eq!(execution.root_site().trampoline().chain_len(), 0);
}

#[test]
fn arity_mismatch_in_tail_position_halts() {
    let execution = execution(RuntimeConfig::default());
    let countdown = programs::countdown();
    let bad = CallTarget::new("bad", 0, |frame| {
        let target = frame.captured(0).clone();
        frame.call(0, target, vec![Value::Integer(1), Value::Integer(2)])
    })
    .with_captured(1)
    .with_site(CallSite::direct_tail())
    .into_direct_closure_with(vec![Value::Closure(countdown)]);

    let result = execution.invoke(bad, Vec::new());
    assert!(matches!(result, Err(Signal::Halt)));
}

#[test]
fn chains_do_not_keep_their_targets_alive() {
    let execution = execution(RuntimeConfig::default());
    // bounce(n, f) = f(n, f), in tail position.
    let bounce = CallTarget::new("bounce", 2, |frame| {
        let n = frame.arg(0).clone();
        let f = frame.arg(1).clone();
        frame.call(0, f.clone(), vec![n, f])
    })
    .with_site(CallSite::direct_tail())
    .into_direct_closure();
    // nest(n, me) = 0 if n == 0, else 1 + bounce(n - 1, me). The bounce lands
    // on nest's own non-tail site, so that site's chain holds nest.
    let nest = CallTarget::new("nest", 2, |frame| {
        let n = frame.arg_int(0);
        if n == 0 {
            return Ok(Value::Integer(0));
        }
        let bounce = frame.captured(0).clone();
        let me = frame.arg(1).clone();
        let inner = frame.call(0, bounce, vec![Value::Integer(n - 1), me])?;
        Ok(Value::Integer(inner.as_int().unwrap_or(0) + 1))
    })
    .with_captured(1)
    .with_site(CallSite::direct())
    .into_direct_closure_with(vec![Value::Closure(bounce)]);

    let result = execution
        .invoke(
            nest.clone(),
            vec![Value::Integer(3), Value::Closure(nest.clone())],
        )
        .unwrap();
    assert_eq!(result, Value::Integer(3));
    let trampoline = nest.entry.site(0).trampoline();
    assert_eq!(trampoline.chain_targets(), vec![nest.target_id()]);
    assert_eq!(trampoline.live_nodes(), 1);

    let target = Arc::downgrade(&nest.entry);
    drop(nest);
    assert!(target.upgrade().is_none());
}
