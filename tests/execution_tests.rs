use std::sync::Arc;

use tessel::programs;
use tessel::runtime::{
    call_target::CallTarget,
    closure::Closure,
    config::{DoubleResolution, RuntimeConfig},
    dispatch::CallSite,
    execution::Execution,
    scheduler::QueueScheduler,
    telemetry::{ChannelSink, RuntimeEvent},
    value::Value,
};

fn deterministic() -> Execution {
    Execution::deterministic(RuntimeConfig::default()).unwrap()
}

/// `stuck(P, C, T)`: forces a future nobody binds and spawns a task that
/// kills the execution.
fn stuck_until_killed() -> Arc<Closure> {
    let killer = Arc::new(
        CallTarget::new("killer", 0, |frame| {
            frame.execution().kill();
            frame.captured_counter(0).halt_token();
            Ok(Value::Signal)
        })
        .with_captured(1),
    );
    CallTarget::new("stuck", 3, move |frame| {
        let p = frame.arg_closure(0);
        let c = frame.arg_counter(1);
        let t = frame.arg_terminator(2);
        let future = frame.execution().new_future();

        c.new_token();
        let computation = Arc::new(Closure::new(
            killer.clone(),
            vec![Value::Counter(c.clone())],
        ));
        frame.spawn(0, &c, &t, computation)?;
        frame.force(1, p, c, t, vec![Value::Future(future)])
    })
    .with_sites([CallSite::spawn_site(false), CallSite::continuation()])
    .into_closure()
}

#[test]
fn unbound_read_reports_an_incomplete_run() {
    let report = deterministic().run(programs::stalled(), Vec::new());
    assert!(!report.completed);
    assert!(!report.discorporated);
    assert!(report.publications.is_empty());
}

#[test]
fn fan_out_publishes_children_then_done() {
    let execution = deterministic();
    let report = execution.run(programs::fan_out(4), Vec::new());

    assert!(report.completed);
    assert!(!report.discorporated);
    assert_eq!(
        report.publications,
        vec![
            Value::Integer(0),
            Value::Integer(1),
            Value::Integer(4),
            Value::Integer(9),
            Value::string("done"),
        ]
    );
    assert_eq!(report.stats.spawns_scheduled, 4);
    assert_eq!(report.stats.tasks_run, 5);
    assert_eq!(report.stats.halt_continuations, 1);
    // Each child's batched token is flushed when it is handed to the scheduler.
    assert_eq!(report.stats.counter_flushes, 4);
}

#[test]
fn fan_out_with_eager_inlining_never_schedules_children() {
    let config = RuntimeConfig {
        min_calls_for_time_per_call: 0,
        ..RuntimeConfig::default()
    };
    let execution = Execution::deterministic(config).unwrap();
    let report = execution.run(programs::fan_out(3), Vec::new());

    assert!(report.completed);
    assert_eq!(report.publications.len(), 4);
    assert_eq!(report.stats.spawns_inlined, 3);
    assert_eq!(report.stats.spawns_scheduled, 0);
    assert_eq!(report.stats.tasks_run, 1);
    // Inlined children release their batched tokens on the spawning thread.
    assert_eq!(report.stats.counter_flushes, 0);
}

#[test]
fn empty_fan_out_still_runs_the_halt_continuation() {
    let report = deterministic().run(programs::fan_out(0), Vec::new());
    assert!(report.completed);
    assert_eq!(report.publications, vec![Value::string("done")]);
}

#[test]
fn each_publishes_every_element() {
    let elements: Vec<_> = (1..=5).map(Value::Integer).collect();
    let report = deterministic().run(programs::each(), vec![Value::tuple(elements.clone())]);
    assert!(report.completed);
    assert_eq!(report.publications, elements);
}

#[test]
fn pipeline_forces_the_producers_future() {
    let report = deterministic().run(programs::pipeline(), Vec::new());
    assert!(report.completed);
    assert!(!report.discorporated);
    assert_eq!(report.publications, vec![Value::Integer(42)]);
    assert_eq!(report.stats.futures_bound, 1);
}

#[test]
fn kill_releases_blocked_program_as_discorporated() {
    let execution = deterministic();
    let report = execution.run(stuck_until_killed(), Vec::new());
    assert!(report.completed);
    assert!(report.discorporated);
    assert!(report.publications.is_empty());
    assert!(execution.root_terminator().is_killed());
}

#[test]
fn program_under_killed_execution_publishes_nothing() {
    let execution = deterministic();
    assert!(execution.kill());
    let report = execution.run(
        programs::each(),
        vec![Value::tuple(vec![Value::Integer(1)])],
    );
    assert!(report.completed);
    assert!(report.publications.is_empty());
}

#[test]
fn report_serializes_to_json() {
    let report = deterministic().run(programs::pipeline(), Vec::new());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["publications"], serde_json::json!(["42"]));
    assert_eq!(json["completed"], serde_json::json!(true));
    assert_eq!(json["stats"]["futures_bound"], serde_json::json!(1));
}

#[test]
fn double_resolution_is_reported_through_the_sink() {
    let config = RuntimeConfig {
        double_resolution: DoubleResolution::Report,
        ..RuntimeConfig::default()
    };
    let (sink, events) = ChannelSink::unbounded();
    let execution = Execution::builder()
        .config(config)
        .scheduler(Arc::new(QueueScheduler::new()))
        .event_sink(Arc::new(sink))
        .build()
        .unwrap();

    let future = execution.new_future();
    execution.bind(&future, Value::Integer(1));
    execution.stop(&future);
    assert_eq!(
        events.try_recv().unwrap(),
        RuntimeEvent::DoubleResolution {
            future: future.id()
        }
    );
    assert!(events.try_recv().is_err());

    let stats = execution.stats().snapshot();
    assert_eq!(stats.futures_bound, 1);
    assert_eq!(stats.futures_stopped, 0);
}

#[test]
fn countdown_stats_snapshot() {
    let execution = deterministic();
    let result = execution
        .invoke(programs::countdown(), vec![Value::Integer(10)])
        .unwrap();
    assert_eq!(result, Value::Integer(0));
    insta::assert_snapshot!(execution.stats().snapshot().to_string(), @r"
    spawns_inlined: 0
    spawns_scheduled: 0
    spawns_killed: 0
    continuations_inlined: 0
    continuations_scheduled: 0
    tasks_run: 0
    self_tail_calls: 10
    tail_call_signals: 0
    local_tail_loops: 0
    trampoline_nodes: 0
    cache_specializations: 1
    cache_universal_transitions: 0
    counter_flushes: 0
    halt_continuations: 0
    futures_bound: 0
    futures_stopped: 0
    caught_failures: 0
    max_inline_depth: 0
    ");
}
