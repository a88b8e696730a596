//! Single-threaded FIFO task runner bound to one routing context.

use std::{
  collections::VecDeque,
  mem,
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
  },
  time::{Duration, Instant},
};

use courier_core::SchedulerConfig;
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::{Task, TaskId, TaskState};
use crate::{
  error::{Result, panic_message},
  routing::RoutingContext,
  worker::LoopHandle,
};

struct QueuedTask {
  id: TaskId,
  task: Box<dyn Task>,
}

#[derive(Default)]
struct SchedulerState {
  queue: VecDeque<QueuedTask>,
  /// Task currently inside `update`, if any
  running: Option<TaskId>,
}

/// Runs tasks for one routing context, one at a time, in submission order.
///
/// Tasks pushed while the loop is stopped stay queued until it starts.
/// Stopping lets the executing task finish and leaves the rest queued.
pub struct TaskScheduler {
  context: RoutingContext,
  config: SchedulerConfig,
  state: Mutex<SchedulerState>,
  wake: Condvar,
  /// Parent of every loop token; cancelled by the owning manager
  shutdown: CancellationToken,
  scheduler_loop: Mutex<Option<LoopHandle>>,
  completed: AtomicU64,
  failed: AtomicU64,
}

impl TaskScheduler {
  pub fn new(context: RoutingContext, config: SchedulerConfig) -> Self {
    Self::with_shutdown(context, config, CancellationToken::new())
  }

  pub(crate) fn with_shutdown(context: RoutingContext, config: SchedulerConfig, shutdown: CancellationToken) -> Self {
    Self {
      context,
      config,
      state: Mutex::new(SchedulerState::default()),
      wake: Condvar::new(),
      shutdown,
      scheduler_loop: Mutex::new(None),
      completed: AtomicU64::new(0),
      failed: AtomicU64::new(0),
    }
  }

  pub fn context(&self) -> RoutingContext {
    self.context
  }

  /// Queue `task` behind everything already submitted
  pub fn push_task(&self, task: impl Task + 'static) -> TaskId {
    let id = TaskId::next();
    let mut state = self.state.lock();
    trace!(context = %self.context, task_id = %id, task = task.name(), "Task queued");
    state.queue.push_back(QueuedTask {
      id,
      task: Box::new(task),
    });
    self.wake.notify_one();
    id
  }

  /// Withdraw a task that has not started yet. Returns false if it already
  /// ran, is running, or was never queued here.
  pub fn cancel(&self, id: TaskId) -> bool {
    let removed = {
      let mut state = self.state.lock();
      let position = state.queue.iter().position(|queued| queued.id == id);
      position.and_then(|index| state.queue.remove(index))
    };

    match removed {
      Some(queued) => {
        debug!(context = %self.context, task_id = %id, task = queued.task.name(), "Task cancelled");
        true
      }
      None => false,
    }
  }

  pub fn has_tasks_queued(&self) -> bool {
    !self.state.lock().queue.is_empty()
  }

  pub fn queued_count(&self) -> usize {
    self.state.lock().queue.len()
  }

  /// A task is executing right now
  pub fn is_busy(&self) -> bool {
    self.state.lock().running.is_some()
  }

  pub fn is_idle(&self) -> bool {
    let state = self.state.lock();
    state.queue.is_empty() && state.running.is_none()
  }

  /// Poll until nothing is queued or running. Returns false on timeout.
  pub fn wait_until_idle(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
      if self.is_idle() {
        return true;
      }
      if Instant::now() >= deadline {
        return false;
      }
      std::thread::sleep(Duration::from_millis(1));
    }
  }

  /// Drop every queued task. The running task, if any, is unaffected.
  pub fn clear(&self) {
    let dropped = mem::take(&mut self.state.lock().queue);
    if !dropped.is_empty() {
      debug!(context = %self.context, dropped = dropped.len(), "Cleared queued tasks");
    }
  }

  pub fn completed_count(&self) -> u64 {
    self.completed.load(Ordering::Relaxed)
  }

  pub fn failed_count(&self) -> u64 {
    self.failed.load(Ordering::Relaxed)
  }

  // ==========================================================================
  // Loop control
  // ==========================================================================

  /// Start the loop thread. No-op if it is already running.
  pub fn start_scheduler_loop_threaded(self: &Arc<Self>) -> Result<()> {
    let mut slot = self.scheduler_loop.lock();
    if slot.as_ref().is_some_and(LoopHandle::is_running) {
      return Ok(());
    }

    let scheduler = Arc::downgrade(self);
    let handle = LoopHandle::spawn(
      format!("courier-scheduler-{}", self.context),
      self.shutdown.child_token(),
      move |cancel| run_scheduler_loop(scheduler, cancel),
    )?;
    *slot = Some(handle);

    debug!(context = %self.context, "Scheduler loop started");
    Ok(())
  }

  /// Stop the loop thread after its current task. No-op if not running.
  pub fn stop_scheduler_loop(&self) {
    let Some(handle) = self.scheduler_loop.lock().take() else {
      return;
    };

    handle.signal();
    {
      // Taken under the state lock so a loop about to wait cannot miss it
      let _state = self.state.lock();
      self.wake.notify_all();
    }
    handle.join();

    debug!(context = %self.context, "Scheduler loop stopped");
  }

  pub fn loop_is_running(&self) -> bool {
    self.scheduler_loop.lock().as_ref().is_some_and(LoopHandle::is_running)
  }

  /// Block until a task is available or the loop is cancelled
  fn next_task(&self, cancel: &CancellationToken) -> Option<QueuedTask> {
    let mut state = self.state.lock();
    loop {
      if cancel.is_cancelled() {
        return None;
      }
      if let Some(queued) = state.queue.pop_front() {
        state.running = Some(queued.id);
        return Some(queued);
      }
      // Bounded so a dropped scheduler is noticed
      self.wake.wait_for(&mut state, self.config.idle_wait());
      if state.queue.is_empty() {
        return None;
      }
    }
  }

  fn execute(&self, queued: QueuedTask) {
    let QueuedTask { id, mut task } = queued;

    let outcome = catch_unwind(AssertUnwindSafe(|| {
      loop {
        let state = task.update();
        if state.is_done() {
          break state;
        }
      }
    }));

    let state = outcome.unwrap_or_else(|panic| {
      error!(
        context = %self.context,
        task_id = %id,
        task = task.name(),
        panic = %panic_message(&*panic),
        "Task panicked"
      );
      TaskState::Failure
    });

    match state {
      TaskState::Failure => {
        self.failed.fetch_add(1, Ordering::Relaxed);
        warn!(context = %self.context, task_id = %id, task = task.name(), "Task failed");
      }
      _ => {
        self.completed.fetch_add(1, Ordering::Relaxed);
        trace!(context = %self.context, task_id = %id, task = task.name(), "Task finished");
      }
    }

    drop(task);
    self.state.lock().running = None;
  }
}

impl Drop for TaskScheduler {
  fn drop(&mut self) {
    if let Some(handle) = self.scheduler_loop.get_mut().take() {
      handle.signal();
    }
  }
}

fn run_scheduler_loop(scheduler: Weak<TaskScheduler>, cancel: CancellationToken) {
  loop {
    if cancel.is_cancelled() {
      break;
    }
    let Some(scheduler) = scheduler.upgrade() else {
      break;
    };
    if let Some(queued) = scheduler.next_task(&cancel) {
      scheduler.execute(queued);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;

  use super::*;
  use crate::task::LambdaTask;

  fn scheduler() -> Arc<TaskScheduler> {
    Arc::new(TaskScheduler::new(
      RoutingContext::next_tab(),
      SchedulerConfig {
        idle_wait_ms: 5,
        ..Default::default()
      },
    ))
  }

  #[test]
  fn test_tasks_wait_for_loop() {
    let scheduler = scheduler();
    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
      let count = Arc::clone(&count);
      scheduler.push_task(LambdaTask::new("count", move || {
        count.fetch_add(1, Ordering::SeqCst);
      }));
    }

    assert!(scheduler.has_tasks_queued());
    assert_eq!(scheduler.queued_count(), 3);
    assert!(!scheduler.wait_until_idle(Duration::from_millis(20)));
    assert_eq!(count.load(Ordering::SeqCst), 0);

    scheduler.start_scheduler_loop_threaded().unwrap();
    assert!(scheduler.wait_until_idle(Duration::from_secs(2)));
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(scheduler.completed_count(), 3);

    scheduler.stop_scheduler_loop();
    assert!(!scheduler.loop_is_running());
  }

  #[test]
  fn test_cancel_only_queued() {
    let scheduler = scheduler();
    let first = scheduler.push_task(LambdaTask::new("first", || {}));
    let second = scheduler.push_task(LambdaTask::new("second", || {}));

    assert!(scheduler.cancel(first));
    assert!(!scheduler.cancel(first));
    assert_eq!(scheduler.queued_count(), 1);

    scheduler.start_scheduler_loop_threaded().unwrap();
    assert!(scheduler.wait_until_idle(Duration::from_secs(2)));
    assert!(!scheduler.cancel(second));
    scheduler.stop_scheduler_loop();
  }

  #[test]
  fn test_start_and_stop_are_idempotent() {
    let scheduler = scheduler();
    scheduler.stop_scheduler_loop();
    assert!(!scheduler.loop_is_running());

    scheduler.start_scheduler_loop_threaded().unwrap();
    scheduler.start_scheduler_loop_threaded().unwrap();
    assert!(scheduler.loop_is_running());

    scheduler.stop_scheduler_loop();
    scheduler.stop_scheduler_loop();
    assert!(!scheduler.loop_is_running());

    scheduler.start_scheduler_loop_threaded().unwrap();
    assert!(scheduler.loop_is_running());
    scheduler.stop_scheduler_loop();
  }

  #[test]
  fn test_clear_drops_queued() {
    let scheduler = scheduler();
    scheduler.push_task(LambdaTask::new("a", || {}));
    scheduler.push_task(LambdaTask::new("b", || {}));
    scheduler.clear();
    assert!(!scheduler.has_tasks_queued());
    assert!(scheduler.is_idle());
  }
}
