#![cfg(feature = "rayon-scheduler")]

use std::{thread, time::Duration};

use tessel::programs;
use tessel::runtime::{config::RuntimeConfig, execution::Execution, value::Value};

fn pooled(config: RuntimeConfig) -> Execution {
    Execution::builder()
        .config(RuntimeConfig {
            worker_threads: 4,
            ..config
        })
        .build()
        .unwrap()
}

fn squares_then_done(publications: &[Value], width: i64) {
    let (last, children) = publications.split_last().unwrap();
    assert_eq!(last, &Value::string("done"));
    let mut squares: Vec<i64> = children.iter().filter_map(Value::as_int).collect();
    squares.sort_unstable();
    assert_eq!(squares, (0..width).map(|i| i * i).collect::<Vec<_>>());
}

#[test]
fn fan_out_completes_on_worker_pool() {
    let execution = pooled(RuntimeConfig::default());
    assert_eq!(execution.scheduler().name(), "rayon");
    let report = execution.run(programs::fan_out(64), Vec::new());

    assert!(report.completed);
    assert!(!report.discorporated);
    squares_then_done(&report.publications, 64);
    assert_eq!(report.stats.spawns_inlined + report.stats.spawns_scheduled, 64);
}

#[test]
fn inlined_fan_out_matches_scheduled_fan_out() {
    let config = RuntimeConfig {
        min_calls_for_time_per_call: 0,
        ..RuntimeConfig::default()
    };
    let report = pooled(config).run(programs::fan_out(16), Vec::new());
    assert!(report.completed);
    squares_then_done(&report.publications, 16);
    assert_eq!(report.stats.spawns_inlined, 16);
}

#[test]
fn repeated_runs_share_one_execution() {
    let execution = pooled(RuntimeConfig::default());
    for _ in 0..8 {
        let report = execution.run(programs::pipeline(), Vec::new());
        assert!(report.completed);
        assert_eq!(report.publications, vec![Value::Integer(42)]);
    }
    assert_eq!(execution.stats().snapshot().futures_bound, 8);
}

#[test]
fn each_runs_on_worker_pool() {
    let elements: Vec<_> = (0..10).map(Value::Integer).collect();
    let report = pooled(RuntimeConfig::default())
        .run(programs::each(), vec![Value::tuple(elements.clone())]);
    assert!(report.completed);
    assert_eq!(report.publications, elements);
}

#[test]
fn unbound_read_reports_an_incomplete_run() {
    let (sender, receiver) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let report = pooled(RuntimeConfig::default()).run(programs::stalled(), Vec::new());
        let _ = sender.send(report);
    });
    let report = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("run on the worker pool returned");

    assert!(!report.completed);
    assert!(!report.discorporated);
    assert!(report.publications.is_empty());
    assert_eq!(report.stats.tasks_run, 1);
}
