use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::runtime::{
    call_target::CallTarget,
    closure::Closure,
    config::RuntimeConfig,
    counter::Counter,
    dispatch::CallSite,
    execution::Execution,
    scheduler::QueueScheduler,
    spawn::{
        SpawnProfile, current_stack_depth, increment_and_check_stack_depth, should_inline_spawn,
    },
    terminator::Terminator,
    value::Value,
};

/// Computation publishing `tag` and releasing one token on its counter.
fn marker(tag: i64, counter: &Counter) -> Arc<Closure> {
    CallTarget::new("marker", 0, |frame| {
        frame
            .execution()
            .record_publication(frame.captured(0).clone());
        frame.captured_counter(1).halt_token();
        Ok(Value::Signal)
    })
    .with_captured(2)
    .into_closure_with(vec![Value::Integer(tag), Value::Counter(counter.clone())])
}

fn with_queue(config: RuntimeConfig) -> (Execution, Arc<QueueScheduler>) {
    let queue = Arc::new(QueueScheduler::new());
    let execution = Execution::builder()
        .config(config)
        .scheduler(queue.clone())
        .build()
        .unwrap();
    (execution, queue)
}

fn counted() -> (Counter, Arc<AtomicUsize>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = {
        let fired = fired.clone();
        Counter::root(move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    };
    counter.new_token();
    (counter, fired)
}

fn inline_everything() -> RuntimeConfig {
    RuntimeConfig {
        min_calls_for_time_per_call: 0,
        ..RuntimeConfig::default()
    }
}

#[test]
fn depth_guard_bounds_inline_nesting() {
    assert_eq!(current_stack_depth(), 0);
    {
        let first = increment_and_check_stack_depth(2).unwrap();
        assert_eq!(first.depth(), 1);
        let second = increment_and_check_stack_depth(2).unwrap();
        assert_eq!(second.depth(), 2);
        assert!(increment_and_check_stack_depth(2).is_none());
        assert_eq!(current_stack_depth(), 2);
    }
    assert_eq!(current_stack_depth(), 0);
}

#[test]
fn profile_needs_minimum_sample() {
    let profile = SpawnProfile::default();
    assert_eq!(profile.time_per_call(0), Some(0));
    assert_eq!(profile.time_per_call(2), None);
    profile.record(Duration::from_nanos(300));
    assert_eq!(profile.time_per_call(2), None);
    profile.record(Duration::from_nanos(100));
    assert_eq!(profile.calls(), 2);
    assert_eq!(profile.time_per_call(2), Some(200));
}

#[test]
fn inlining_policy_follows_config() {
    let computation = marker(0, &Counter::new());
    let defaults = RuntimeConfig::default();
    // No profile yet: the first spawns are always scheduled.
    assert!(!should_inline_spawn(&defaults, &computation, false));

    let eager = inline_everything();
    assert!(should_inline_spawn(&eager, &computation, false));
    assert!(!should_inline_spawn(&eager, &computation, true));

    let all = RuntimeConfig {
        allow_all_spawn_inlining: true,
        ..inline_everything()
    };
    assert!(should_inline_spawn(&all, &computation, true));

    let off = RuntimeConfig {
        allow_spawn_inlining: false,
        ..all
    };
    assert!(!should_inline_spawn(&off, &computation, false));

    let slow = RuntimeConfig {
        inline_average_time_limit_ns: 0,
        ..inline_everything()
    };
    assert!(!should_inline_spawn(&slow, &computation, false));
}

#[test]
fn spawn_runs_inline_when_allowed() {
    let (execution, queue) = with_queue(inline_everything());
    let (counter, fired) = counted();
    let site = CallSite::spawn_site(false);

    counter.new_token();
    site.spawn(&execution, &counter, &Terminator::root(), marker(1, &counter))
        .unwrap();
    assert!(queue.is_empty());
    assert_eq!(execution.publications(), vec![Value::Integer(1)]);

    counter.halt_token();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    let stats = execution.stats().snapshot();
    assert_eq!(stats.spawns_inlined, 1);
    assert_eq!(stats.max_inline_depth, 1);
}

#[test]
fn spawn_is_scheduled_without_profile() {
    let (execution, queue) = with_queue(RuntimeConfig::default());
    let (counter, fired) = counted();
    let site = CallSite::spawn_site(false);

    counter.new_token();
    site.spawn(&execution, &counter, &Terminator::root(), marker(2, &counter))
        .unwrap();
    assert_eq!(queue.len(), 1);
    assert!(execution.publications().is_empty());

    assert_eq!(queue.run_until_idle(), 1);
    assert_eq!(execution.publications(), vec![Value::Integer(2)]);
    counter.halt_token();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(execution.stats().snapshot().spawns_scheduled, 1);
}

#[test]
fn must_spawn_site_schedules() {
    let (execution, queue) = with_queue(inline_everything());
    let (counter, _) = counted();
    let site = CallSite::spawn_site(true);

    counter.new_token();
    site.spawn(&execution, &counter, &Terminator::root(), marker(3, &counter))
        .unwrap();
    assert_eq!(queue.len(), 1);
    queue.run_until_idle();
    assert_eq!(execution.publications(), vec![Value::Integer(3)]);
}

#[test]
fn spawn_at_depth_limit_schedules() {
    let config = RuntimeConfig {
        max_stack_depth: 0,
        ..inline_everything()
    };
    let (execution, queue) = with_queue(config);
    let (counter, _) = counted();
    let site = CallSite::spawn_site(false);

    counter.new_token();
    site.spawn(&execution, &counter, &Terminator::root(), marker(4, &counter))
        .unwrap();
    assert_eq!(queue.len(), 1);
}

#[test]
fn spawn_under_killed_terminator_releases_token() {
    let (execution, queue) = with_queue(inline_everything());
    let (counter, fired) = counted();
    let terminator = Terminator::root();
    terminator.kill();
    let site = CallSite::spawn_site(false);

    counter.new_token();
    site.spawn(&execution, &counter, &terminator, marker(5, &counter))
        .unwrap();
    assert!(queue.is_empty());
    assert!(execution.publications().is_empty());
    assert_eq!(execution.stats().snapshot().spawns_killed, 1);

    counter.halt_token();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn scheduled_runs_feed_the_profile() {
    let config = RuntimeConfig {
        min_calls_for_time_per_call: 2,
        inline_average_time_limit_ns: u64::MAX,
        ..RuntimeConfig::default()
    };
    let (execution, queue) = with_queue(config);
    let (counter, _) = counted();
    let site = CallSite::spawn_site(false);
    let computation = marker(6, &counter);

    for _ in 0..2 {
        counter.new_token();
        site.spawn(&execution, &counter, &Terminator::root(), computation.clone())
            .unwrap();
        queue.run_until_idle();
    }
    assert_eq!(computation.entry.profile().calls(), 2);

    counter.new_token();
    site.spawn(&execution, &counter, &Terminator::root(), computation.clone())
        .unwrap();
    assert!(queue.is_empty());
    assert_eq!(execution.stats().snapshot().spawns_inlined, 1);
    assert_eq!(execution.publications().len(), 3);
}

#[test]
fn continuation_beyond_depth_limit_is_scheduled_then_halts() {
    let config = RuntimeConfig {
        max_stack_depth: 0,
        ..RuntimeConfig::default()
    };
    let (execution, queue) = with_queue(config);
    let (counter, fired) = counted();
    let (parent, parent_fired) = counted();

    counter.new_token();
    execution.run_continuation(marker(7, &counter), Vec::new(), Some(parent.clone()));
    assert_eq!(queue.len(), 1);
    assert_eq!(parent_fired.load(Ordering::SeqCst), 0);

    queue.run_until_idle();
    assert_eq!(execution.publications(), vec![Value::Integer(7)]);
    assert_eq!(parent_fired.load(Ordering::SeqCst), 1);
    counter.halt_token();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(execution.stats().snapshot().continuations_scheduled, 1);
}
