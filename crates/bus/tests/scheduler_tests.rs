//! Integration tests for per-context task scheduling.

mod common;

use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use bus::{LambdaTask, RepeatTask, RoutingContext, SequenceTask, Task, TaskManager, TaskState};
use common::{WAIT, eventually};
use courier_core::SchedulerConfig;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

fn manager() -> TaskManager {
  TaskManager::new(SchedulerConfig {
    idle_wait_ms: 5,
    autostart_app: false,
  })
}

#[test]
fn test_tasks_run_in_submission_order() {
  let manager = manager();
  let scheduler = manager.scheduler(RoutingContext::next_tab());
  let log = Arc::new(Mutex::new(Vec::new()));

  for i in 0..20 {
    let log = Arc::clone(&log);
    scheduler.push_task(LambdaTask::new(format!("push-{i}"), move || log.lock().push(i)));
  }
  scheduler.start_scheduler_loop_threaded().unwrap();
  assert!(scheduler.wait_until_idle(WAIT));
  scheduler.stop_scheduler_loop();

  assert_eq!(*log.lock(), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_one_task_at_a_time_per_context() {
  let manager = manager();
  let scheduler = manager.scheduler(RoutingContext::next_tab());
  let active = Arc::new(AtomicUsize::new(0));
  let overlap = Arc::new(AtomicUsize::new(0));

  for _ in 0..10 {
    let (active, overlap) = (Arc::clone(&active), Arc::clone(&overlap));
    scheduler.push_task(LambdaTask::new("exclusive", move || {
      if active.fetch_add(1, Ordering::SeqCst) > 0 {
        overlap.fetch_add(1, Ordering::SeqCst);
      }
      thread::sleep(Duration::from_millis(2));
      active.fetch_sub(1, Ordering::SeqCst);
    }));
  }
  scheduler.start_scheduler_loop_threaded().unwrap();
  assert!(scheduler.wait_until_idle(WAIT));
  scheduler.stop_scheduler_loop();

  assert_eq!(overlap.load(Ordering::SeqCst), 0);
}

#[test]
fn test_contexts_run_concurrently() {
  let manager = manager();
  let first = manager.scheduler(RoutingContext::next_tab());
  let second = manager.scheduler(RoutingContext::next_tab());
  let started = Arc::new(AtomicUsize::new(0));

  // Each task waits until both have started; serial execution would time out
  for scheduler in [&first, &second] {
    let started = Arc::clone(&started);
    scheduler.push_task(LambdaTask::new("rendezvous", move || {
      started.fetch_add(1, Ordering::SeqCst);
      let deadline = Instant::now() + WAIT;
      while started.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
      }
    }));
    scheduler.start_scheduler_loop_threaded().unwrap();
  }

  assert!(first.wait_until_idle(WAIT));
  assert!(second.wait_until_idle(WAIT));
  assert_eq!(started.load(Ordering::SeqCst), 2);
  manager.stop_all();
}

#[test]
fn test_cancel_before_start() {
  let manager = manager();
  let scheduler = manager.scheduler(RoutingContext::next_tab());
  let ran = Arc::new(Mutex::new(Vec::new()));

  let ids: Vec<_> = ["a", "b", "c"]
    .into_iter()
    .map(|name| {
      let ran = Arc::clone(&ran);
      scheduler.push_task(LambdaTask::new(name, move || ran.lock().push(name)))
    })
    .collect();
  assert!(scheduler.cancel(ids[1]));

  scheduler.start_scheduler_loop_threaded().unwrap();
  assert!(scheduler.wait_until_idle(WAIT));
  scheduler.stop_scheduler_loop();

  assert_eq!(*ran.lock(), vec!["a", "c"]);
}

#[test]
fn test_running_task_cannot_be_cancelled() {
  let manager = manager();
  let scheduler = manager.scheduler(RoutingContext::next_tab());
  let started = Arc::new(AtomicUsize::new(0));
  let release = Arc::new(AtomicUsize::new(0));

  let (started_in, release_in) = (Arc::clone(&started), Arc::clone(&release));
  let id = scheduler.push_task(LambdaTask::new("blocking", move || {
    started_in.store(1, Ordering::SeqCst);
    while release_in.load(Ordering::SeqCst) == 0 {
      thread::sleep(Duration::from_millis(1));
    }
  }));
  scheduler.start_scheduler_loop_threaded().unwrap();

  assert!(eventually(|| started.load(Ordering::SeqCst) == 1));
  assert!(scheduler.is_busy());
  assert!(!scheduler.cancel(id));

  release.store(1, Ordering::SeqCst);
  assert!(scheduler.wait_until_idle(WAIT));
  assert_eq!(scheduler.completed_count(), 1);
  scheduler.stop_scheduler_loop();
}

#[test]
fn test_stop_finishes_current_task_and_keeps_queue() {
  let manager = manager();
  let scheduler = manager.scheduler(RoutingContext::next_tab());
  let finished = Arc::new(AtomicUsize::new(0));
  let started = Arc::new(AtomicUsize::new(0));

  let (started_in, finished_in) = (Arc::clone(&started), Arc::clone(&finished));
  scheduler.push_task(LambdaTask::new("slow", move || {
    started_in.store(1, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(30));
    finished_in.fetch_add(1, Ordering::SeqCst);
  }));
  let finished_in = Arc::clone(&finished);
  scheduler.push_task(LambdaTask::new("after", move || {
    finished_in.fetch_add(1, Ordering::SeqCst);
  }));

  scheduler.start_scheduler_loop_threaded().unwrap();
  assert!(eventually(|| started.load(Ordering::SeqCst) == 1));
  scheduler.stop_scheduler_loop();

  // Stop joined after the slow task; the second one is still waiting
  assert_eq!(finished.load(Ordering::SeqCst), 1);
  assert_eq!(scheduler.queued_count(), 1);

  scheduler.start_scheduler_loop_threaded().unwrap();
  assert!(scheduler.wait_until_idle(WAIT));
  assert_eq!(finished.load(Ordering::SeqCst), 2);
  scheduler.stop_scheduler_loop();
}

#[test]
fn test_panicking_task_counts_as_failure() {
  let manager = manager();
  let scheduler = manager.scheduler(RoutingContext::next_tab());
  let after = Arc::new(AtomicUsize::new(0));

  scheduler.push_task(LambdaTask::new("explodes", || panic!("task failure")));
  let after_in = Arc::clone(&after);
  scheduler.push_task(LambdaTask::new("survivor", move || {
    after_in.fetch_add(1, Ordering::SeqCst);
  }));

  scheduler.start_scheduler_loop_threaded().unwrap();
  assert!(scheduler.wait_until_idle(WAIT));
  assert!(scheduler.loop_is_running());
  scheduler.stop_scheduler_loop();

  assert_eq!(scheduler.failed_count(), 1);
  assert_eq!(scheduler.completed_count(), 1);
  assert_eq!(after.load(Ordering::SeqCst), 1);
}

/// Fails after `steps` updates
struct FailAfter {
  steps: usize,
}

impl Task for FailAfter {
  fn update(&mut self) -> TaskState {
    if self.steps == 0 {
      return TaskState::Failure;
    }
    self.steps -= 1;
    TaskState::Running
  }

  fn name(&self) -> &str {
    "fail-after"
  }
}

#[test]
fn test_composite_tasks_on_scheduler() {
  let manager = manager();
  let scheduler = manager.scheduler(RoutingContext::next_tab());
  let log = Arc::new(Mutex::new(Vec::new()));

  let (first, second) = (Arc::clone(&log), Arc::clone(&log));
  scheduler.push_task(
    SequenceTask::new("steps")
      .then(LambdaTask::new("one", move || first.lock().push("one")))
      .then(LambdaTask::new("two", move || second.lock().push("two"))),
  );

  let repeated = Arc::clone(&log);
  scheduler.push_task(RepeatTask::new("again", 2, move || {
    let log = Arc::clone(&repeated);
    Box::new(LambdaTask::new("again", move || log.lock().push("again"))) as Box<dyn Task>
  }));

  let never = Arc::clone(&log);
  scheduler.push_task(
    SequenceTask::new("broken")
      .then(FailAfter { steps: 3 })
      .then(LambdaTask::new("never", move || never.lock().push("never"))),
  );

  scheduler.start_scheduler_loop_threaded().unwrap();
  assert!(scheduler.wait_until_idle(WAIT));
  scheduler.stop_scheduler_loop();

  assert_eq!(*log.lock(), vec!["one", "two", "again", "again"]);
  assert_eq!(scheduler.completed_count(), 2);
  assert_eq!(scheduler.failed_count(), 1);
}

#[test]
fn test_manager_remove_drops_queued_tasks() {
  let manager = manager();
  let tab = RoutingContext::next_tab();
  let ran = Arc::new(AtomicUsize::new(0));

  let ran_in = Arc::clone(&ran);
  manager.scheduler(tab).push_task(LambdaTask::new("dropped", move || {
    ran_in.fetch_add(1, Ordering::SeqCst);
  }));
  assert!(manager.remove(tab));

  // A new scheduler for the same context starts empty
  let scheduler = manager.scheduler(tab);
  assert!(!scheduler.has_tasks_queued());
  scheduler.start_scheduler_loop_threaded().unwrap();
  thread::sleep(Duration::from_millis(20));
  scheduler.stop_scheduler_loop();
  assert_eq!(ran.load(Ordering::SeqCst), 0);
}
