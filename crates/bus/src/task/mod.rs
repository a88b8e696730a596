//! Cooperative tasks and the per-context schedulers that run them.
//!
//! A [`Task`] is advanced by repeated [`Task::update`] calls until it reports
//! a terminal [`TaskState`]. Each [`TaskScheduler`] runs its tasks one at a
//! time, in submission order, on its own loop thread. The [`TaskManager`] maps
//! routing contexts to schedulers, creating them on first use.

mod manager;
mod scheduler;

use std::{
  collections::VecDeque,
  fmt,
  sync::atomic::{AtomicU64, Ordering},
};

pub use manager::TaskManager;
pub use scheduler::TaskScheduler;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Result of one [`Task::update`] step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  /// More work to do; call `update` again
  Running,
  Success,
  Failure,
}

impl TaskState {
  pub fn is_done(&self) -> bool {
    !matches!(self, Self::Running)
  }
}

/// Handle for a task accepted by a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
  pub(crate) fn next() -> Self {
    Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
  }
}

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "task-{}", self.0)
  }
}

/// A cooperative unit of deferred work
pub trait Task: Send {
  /// Advance the task by one step
  fn update(&mut self) -> TaskState;

  fn name(&self) -> &str {
    "task"
  }
}

impl Task for Box<dyn Task> {
  fn update(&mut self) -> TaskState {
    (**self).update()
  }

  fn name(&self) -> &str {
    (**self).name()
  }
}

// ============================================================================
// Provided Tasks
// ============================================================================

/// Runs a closure once
pub struct LambdaTask<F> {
  name: String,
  func: Option<F>,
}

impl<F: FnOnce() + Send> LambdaTask<F> {
  pub fn new(name: impl Into<String>, func: F) -> Self {
    Self {
      name: name.into(),
      func: Some(func),
    }
  }
}

impl<F: FnOnce() + Send> Task for LambdaTask<F> {
  fn update(&mut self) -> TaskState {
    if let Some(func) = self.func.take() {
      func();
    }
    TaskState::Success
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// Runs child tasks in order, one step per update. Fails on the first
/// failing child; later children never start.
pub struct SequenceTask {
  name: String,
  children: VecDeque<Box<dyn Task>>,
}

impl SequenceTask {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      children: VecDeque::new(),
    }
  }

  pub fn then(mut self, task: impl Task + 'static) -> Self {
    self.children.push_back(Box::new(task));
    self
  }

  pub fn len(&self) -> usize {
    self.children.len()
  }

  pub fn is_empty(&self) -> bool {
    self.children.is_empty()
  }
}

impl Task for SequenceTask {
  fn update(&mut self) -> TaskState {
    let Some(current) = self.children.front_mut() else {
      return TaskState::Success;
    };

    match current.update() {
      TaskState::Running => TaskState::Running,
      TaskState::Failure => {
        self.children.clear();
        TaskState::Failure
      }
      TaskState::Success => {
        self.children.pop_front();
        if self.children.is_empty() {
          TaskState::Success
        } else {
          TaskState::Running
        }
      }
    }
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// Runs a freshly built child task a fixed number of times, stopping early
/// if one run fails
pub struct RepeatTask<F> {
  name: String,
  remaining: usize,
  failed: bool,
  factory: F,
  current: Option<Box<dyn Task>>,
}

impl<F: FnMut() -> Box<dyn Task> + Send> RepeatTask<F> {
  pub fn new(name: impl Into<String>, times: usize, factory: F) -> Self {
    Self {
      name: name.into(),
      remaining: times,
      failed: false,
      factory,
      current: None,
    }
  }
}

impl<F: FnMut() -> Box<dyn Task> + Send> Task for RepeatTask<F> {
  fn update(&mut self) -> TaskState {
    if self.failed {
      return TaskState::Failure;
    }
    if self.remaining == 0 {
      return TaskState::Success;
    }

    let current = self.current.get_or_insert_with(|| (self.factory)());
    match current.update() {
      TaskState::Running => TaskState::Running,
      TaskState::Failure => {
        self.current = None;
        self.failed = true;
        TaskState::Failure
      }
      TaskState::Success => {
        self.current = None;
        self.remaining -= 1;
        if self.remaining == 0 {
          TaskState::Success
        } else {
          TaskState::Running
        }
      }
    }
  }

  fn name(&self) -> &str {
    &self.name
  }
}
