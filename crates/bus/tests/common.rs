//! Common test utilities for bus integration tests
//!
//! Tests run in parallel, so each one builds its own queue and task manager
//! instead of touching the process-wide instances.

#![allow(dead_code)]

use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::{Duration, Instant},
};

use bus::{Message, MessageListener, MessageQueue, TaskManager};
use courier_core::{QueueConfig, SchedulerConfig};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct TestMessage;

impl Message for TestMessage {
  const TYPE: &'static str = "TestMessage";
}

#[derive(Debug)]
pub struct Test2Message;

impl Message for Test2Message {
  const TYPE: &'static str = "TestMessage2";
}

/// Counts every `TestMessage` it receives
#[derive(Default)]
pub struct TestListener {
  pub count: AtomicUsize,
}

impl TestListener {
  pub fn count(&self) -> usize {
    self.count.load(Ordering::SeqCst)
  }
}

impl MessageListener<TestMessage> for TestListener {
  fn handle_message(&self, _message: &TestMessage) {
    self.count.fetch_add(1, Ordering::SeqCst);
  }
}

/// Queue with a fast poll interval and its own task manager
pub fn fresh_queue() -> Arc<MessageQueue> {
  let task_manager = Arc::new(TaskManager::new(SchedulerConfig {
    idle_wait_ms: 5,
    autostart_app: false,
  }));
  Arc::new(MessageQueue::new(
    QueueConfig {
      poll_interval_ms: 1,
      send_as_tasks: false,
    },
    task_manager,
  ))
}

/// Poll `condition` until it holds or `WAIT` elapses
pub fn eventually(condition: impl Fn() -> bool) -> bool {
  let deadline = Instant::now() + WAIT;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    std::thread::sleep(Duration::from_millis(1));
  }
  condition()
}
