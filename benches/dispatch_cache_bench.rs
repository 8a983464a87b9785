use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tessel::programs;
use tessel::runtime::{
    builtins::get_builtin, call_target::CallTarget, config::RuntimeConfig, dispatch::CallSite,
    execution::Execution, value::Value,
};

const CALLS: u64 = 1_024;

fn execution() -> Execution {
    match Execution::deterministic(RuntimeConfig::default()) {
        Ok(execution) => execution,
        Err(err) => panic!("{}", err),
    }
}

/// Calls `apply` with `targets` distinct adders in rotation, so the site
/// stays cached (up to capacity) or turns universal.
fn bench_internal(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/internal");
    group.throughput(Throughput::Elements(CALLS));

    for targets in [1_i64, 4, 16] {
        let execution = execution();
        let apply = programs::apply();
        let adders: Vec<Value> = (0..targets)
            .map(|step| Value::Closure(programs::adder(step)))
            .collect();
        group.bench_with_input(BenchmarkId::new("targets", targets), &adders, |b, adders| {
            b.iter(|| {
                for i in 0..CALLS as usize {
                    let adder = adders[i % adders.len()].clone();
                    black_box(
                        execution.invoke(apply.clone(), vec![adder, Value::Integer(i as i64)]),
                    )
                    .ok();
                }
            });
        });
    }

    group.finish();
}

/// Calls the `add` builtin through one direct site with one or two argument
/// shapes.
fn bench_external(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/external");
    group.throughput(Throughput::Elements(CALLS));
    let Some(add) = get_builtin("add") else {
        panic!("add builtin missing");
    };

    for (label, mixed) in [("int", false), ("int_float", true)] {
        let execution = execution();
        let call = CallTarget::new("call_add", 2, |frame| {
            let add = frame.captured(0).clone();
            let args = frame.args().to_vec();
            frame.call(0, add, args)
        })
        .with_captured(1)
        .with_site(CallSite::direct())
        .into_direct_closure_with(vec![add.clone()]);

        group.bench_function(label, |b| {
            b.iter(|| {
                for i in 0..CALLS {
                    let rhs = if mixed && i % 2 == 1 {
                        Value::Float(1.5)
                    } else {
                        Value::Integer(1)
                    };
                    black_box(execution.invoke(call.clone(), vec![Value::Integer(i as i64), rhs]))
                        .ok();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_internal, bench_external);
criterion_main!(benches);
