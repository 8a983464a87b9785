//! Hand-compiled sample programs.
//!
//! Each function builds the closures a compiler would emit for a small
//! orchestration program. They drive the command-line scenarios, the
//! integration tests and the benchmarks.
use std::sync::Arc;

use crate::runtime::{
    builtins::get_builtin,
    call_target::CallTarget,
    closure::Closure,
    counter::Counter,
    dispatch::CallSite,
    error::invariant_violation,
    execution::Execution,
    frame::Frame,
    signal::Signal,
    value::Value,
};

fn builtin(name: &str) -> Value {
    match get_builtin(name) {
        Some(site) => site,
        None => invariant_violation(format!("missing builtin {}", name)),
    }
}

/// `countdown(n)`: direct, self tail-recursive down to zero.
pub fn countdown() -> Arc<Closure> {
    CallTarget::new("countdown", 1, |frame| {
        let n = frame.arg_int(0);
        if n <= 0 {
            return Ok(Value::Integer(0));
        }
        let this = Value::Closure(frame.closure().clone());
        frame.call(0, this, vec![Value::Integer(n - 1)])
    })
    .with_site(CallSite::direct_tail())
    .into_direct_closure()
}

/// `even(n, even, odd)` and `odd(n, even, odd)`: direct and mutually
/// tail-recursive. Each receives both closures as arguments so neither
/// captures the other.
pub fn even_odd() -> (Arc<Closure>, Arc<Closure>) {
    fn parity(name: &'static str, zero: bool, next: usize) -> Arc<Closure> {
        CallTarget::new(name, 3, move |frame| {
            let n = frame.arg_int(0);
            if n <= 0 {
                return Ok(Value::Boolean(zero));
            }
            let even = frame.arg(1).clone();
            let odd = frame.arg(2).clone();
            let target = if next == 1 { even.clone() } else { odd.clone() };
            frame.call(0, target, vec![Value::Integer(n - 1), even, odd])
        })
        .with_site(CallSite::direct_tail())
        .into_direct_closure()
    }
    (parity("even", true, 2), parity("odd", false, 1))
}

/// Runs `even(n)` through the execution's root call site.
pub fn is_even(execution: &Execution, n: i64) -> Result<Value, Signal> {
    let (even, odd) = even_odd();
    execution.invoke(
        even.clone(),
        vec![Value::Integer(n), Value::Closure(even), Value::Closure(odd)],
    )
}

/// `fan_out(P, C, T)`: spawns `width` children under a nested counter.
/// Child `i` publishes `i * i`; once every child is done the halt
/// continuation publishes `"done"`.
pub fn fan_out(width: i64) -> Arc<Closure> {
    let child = Arc::new(
        CallTarget::new("square", 0, |frame| {
            let p = frame.captured_closure(0);
            let root = frame.captured_counter(1);
            let inner = frame.captured_counter(2);
            let i = frame.captured_int(3);
            match frame.call(0, builtin("mul"), vec![Value::Integer(i), Value::Integer(i)]) {
                Ok(square) => {
                    root.new_token();
                    frame.call(1, Value::Closure(p), vec![square])?;
                }
                Err(Signal::Halt) => {}
                Err(other) => return Err(other),
            }
            inner.halt_token();
            Ok(Value::Signal)
        })
        .with_captured(4)
        .with_sites([CallSite::direct(), CallSite::continuation()]),
    );
    let done = Arc::new(
        CallTarget::new("fan_out_done", 0, |frame| {
            let p = frame.captured_closure(0);
            let root = frame.captured_counter(1);
            root.new_token();
            frame.call(0, Value::Closure(p), vec![Value::string("done")])
        })
        .with_captured(2)
        .with_site(CallSite::continuation()),
    );

    CallTarget::new("fan_out", 3, move |frame| {
        let p = frame.arg_closure(0);
        let c = frame.arg_counter(1);
        let t = frame.arg_terminator(2);
        let width = frame.captured_int(0);
        let halt = Arc::new(Closure::new(
            done.clone(),
            vec![Value::Closure(p.clone()), Value::Counter(c.clone())],
        ));
        let inner = Counter::nested_with_halt(&c, frame.execution(), halt);
        inner.new_token();
        for i in 0..width {
            inner.new_token_optimized();
            let computation = Arc::new(Closure::new(
                child.clone(),
                vec![
                    Value::Closure(p.clone()),
                    Value::Counter(c.clone()),
                    Value::Counter(inner.clone()),
                    Value::Integer(i),
                ],
            ));
            frame.spawn(0, &inner, &t, computation)?;
        }
        inner.halt_token();
        c.halt_token();
        Ok(Value::Signal)
    })
    .with_captured(1)
    .with_site(CallSite::spawn_site(false))
    .into_closure_with(vec![Value::Integer(width)])
}

/// `each(P, C, T, tuple)`: publishes every element through the `each`
/// builtin.
pub fn each() -> Arc<Closure> {
    CallTarget::new("each_program", 4, |frame| {
        let mut args = frame.args()[..3].to_vec();
        args.push(frame.arg(3).clone());
        frame.call(0, builtin("each"), args)
    })
    .with_site(CallSite::cps())
    .into_closure()
}

/// `pipeline(P, C, T)`: a producer binds a future to `41` while the program
/// forces it; the continuation publishes the value plus one.
pub fn pipeline() -> Arc<Closure> {
    let producer = Arc::new(
        CallTarget::new("producer", 0, |frame| {
            let Value::Future(future) = frame.captured(0).clone() else {
                invariant_violation("producer captured a non-future".to_string());
            };
            frame.execution().bind(&future, Value::Integer(41));
            frame.captured_counter(1).halt_token();
            Ok(Value::Signal)
        })
        .with_captured(2),
    );
    let consume = Arc::new(
        CallTarget::new("consume", 1, |frame| {
            let p = frame.captured_closure(0);
            let counter = frame.captured_counter(1);
            let value = frame.arg(0).clone();
            let next =
                frame.call_or_halt(0, builtin("add"), vec![value, Value::Integer(1)], &counter)?;
            frame.call(1, Value::Closure(p), vec![next])
        })
        .with_captured(2)
        .with_sites([CallSite::direct(), CallSite::continuation()]),
    );

    CallTarget::new("pipeline", 3, move |frame| {
        let p = frame.arg_closure(0);
        let c = frame.arg_counter(1);
        let t = frame.arg_terminator(2);
        let future = frame.execution().new_future();

        c.new_token_optimized();
        let computation = Arc::new(Closure::new(
            producer.clone(),
            vec![Value::Future(future.clone()), Value::Counter(c.clone())],
        ));
        frame.spawn(0, &c, &t, computation)?;

        let k = Arc::new(Closure::new(
            consume.clone(),
            vec![Value::Closure(p), Value::Counter(c.clone())],
        ));
        frame.force(1, k, c, t, vec![Value::Future(future)])
    })
    .with_sites([CallSite::spawn_site(false), CallSite::continuation()])
    .into_closure()
}

/// `stalled(P, C, T)`: forces a future nobody binds, so the run never
/// quiesces.
pub fn stalled() -> Arc<Closure> {
    CallTarget::new("stalled", 3, |frame| {
        let p = frame.arg_closure(0);
        let c = frame.arg_counter(1);
        let t = frame.arg_terminator(2);
        let future = frame.execution().new_future();
        frame.force(0, p, c, t, vec![Value::Future(future)])
    })
    .with_site(CallSite::continuation())
    .into_closure()
}

/// A direct closure that always fails through the `div` builtin.
pub fn divide_by_zero() -> Arc<Closure> {
    CallTarget::new("divide_by_zero", 1, |frame| {
        let n = frame.arg(0).clone();
        frame.call(0, builtin("div"), vec![n, Value::Integer(0)])
    })
    .with_site(CallSite::direct())
    .into_direct_closure()
}

/// Direct closure returning its argument plus the captured step, used to
/// drive call-site caches with many distinct targets.
pub fn adder(step: i64) -> Arc<Closure> {
    CallTarget::new(format!("add_{}", step), 1, |frame| {
        Ok(Value::Integer(frame.arg_int(0) + frame.captured_int(0)))
    })
    .with_captured(1)
    .into_direct_closure_with(vec![Value::Integer(step)])
}

/// Direct closure calling its first argument with its second through one
/// call site, so the site sees every target it is handed.
pub fn apply() -> Arc<Closure> {
    CallTarget::new("apply", 2, |frame: &mut Frame<'_>| {
        let f = frame.arg(0).clone();
        let x = frame.arg(1).clone();
        frame.call(0, f, vec![x])
    })
    .with_site(CallSite::direct())
    .into_direct_closure()
}
