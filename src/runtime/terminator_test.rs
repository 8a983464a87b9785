use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::runtime::{
    signal::Signal,
    terminator::{Terminatable, Terminator},
};

#[derive(Default)]
struct Probe {
    kills: AtomicUsize,
}

impl Terminatable for Probe {
    fn kill(&self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn kill_is_idempotent() {
    let terminator = Terminator::root();
    assert!(terminator.check_live().is_ok());
    assert!(terminator.kill());
    assert!(!terminator.kill());
    assert!(terminator.is_killed());
    assert!(matches!(terminator.check_live(), Err(Signal::Killed)));
}

#[test]
fn kill_reaches_every_attached_child_once() {
    let terminator = Terminator::root();
    let a = Arc::new(Probe::default());
    let b = Arc::new(Probe::default());
    assert!(terminator.add_child(a.clone()));
    assert!(terminator.add_child(b.clone()));
    assert_eq!(terminator.child_count(), 2);

    terminator.kill();
    terminator.kill();
    assert_eq!(a.kills.load(Ordering::SeqCst), 1);
    assert_eq!(b.kills.load(Ordering::SeqCst), 1);
    assert_eq!(terminator.child_count(), 0);
}

#[test]
fn child_added_after_kill_is_killed_on_arrival() {
    let terminator = Terminator::root();
    terminator.kill();
    let late = Arc::new(Probe::default());
    assert!(!terminator.add_child(late.clone()));
    assert_eq!(late.kills.load(Ordering::SeqCst), 1);
}

#[test]
fn removed_child_is_not_killed() {
    let terminator = Terminator::root();
    let probe = Arc::new(Probe::default());
    let child: Arc<dyn Terminatable> = probe.clone();
    terminator.add_child(child.clone());
    terminator.remove_child(&child);
    assert_eq!(terminator.child_count(), 0);
    terminator.kill();
    assert_eq!(probe.kills.load(Ordering::SeqCst), 0);
}

#[test]
fn kill_cascades_through_nested_terminators() {
    let root = Terminator::root();
    let middle = Terminator::nested(&root);
    let leaf = Terminator::nested(&middle);
    let probe = Arc::new(Probe::default());
    leaf.add_child(probe.clone());

    root.kill();
    assert!(middle.is_killed());
    assert!(leaf.is_killed());
    assert_eq!(probe.kills.load(Ordering::SeqCst), 1);
}

#[test]
fn killing_a_child_leaves_the_parent_live() {
    let root = Terminator::root();
    let child = Terminator::nested(&root);
    child.kill();
    assert!(!root.is_killed());
    assert!(root.check_live().is_ok());
}

#[test]
fn nested_under_killed_parent_starts_killed() {
    let root = Terminator::root();
    root.kill();
    let child = Terminator::nested(&root);
    assert!(child.is_killed());
}

#[test]
fn detach_removes_child_from_parent() {
    let root = Terminator::root();
    let child = Terminator::nested(&root);
    assert_eq!(root.child_count(), 1);
    child.detach();
    assert_eq!(root.child_count(), 0);
    root.kill();
    assert!(!child.is_killed());
}

#[test]
fn concurrent_kills_run_children_once() {
    let terminator = Terminator::root();
    let probe = Arc::new(Probe::default());
    terminator.add_child(probe.clone());
    let winners: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| terminator.kill()))
            .collect();
        handles
            .into_iter()
            .map(|handle| usize::from(handle.join().unwrap()))
            .sum()
    });
    assert_eq!(winners, 1);
    assert_eq!(probe.kills.load(Ordering::SeqCst), 1);
}
