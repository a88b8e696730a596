//! TaskManager - maps routing contexts to their schedulers, creating them on demand
//!
//! Lookups go through `DashMap`, so concurrent first requests for the same
//! context still produce a single scheduler.

use std::sync::{Arc, LazyLock};

use courier_core::SchedulerConfig;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::TaskScheduler;
use crate::routing::RoutingContext;

static INSTANCE: LazyLock<Arc<TaskManager>> = LazyLock::new(|| Arc::new(TaskManager::new(SchedulerConfig::default())));

pub struct TaskManager {
  config: SchedulerConfig,
  schedulers: DashMap<RoutingContext, Arc<TaskScheduler>>,
  /// Parent of every scheduler's shutdown token
  cancel: CancellationToken,
}

impl TaskManager {
  pub fn new(config: SchedulerConfig) -> Self {
    Self {
      config,
      schedulers: DashMap::new(),
      cancel: CancellationToken::new(),
    }
  }

  /// The process-wide manager
  pub fn instance() -> Arc<TaskManager> {
    Arc::clone(&INSTANCE)
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }

  /// Scheduler for `context`, created (stopped) on first request
  pub fn scheduler(&self, context: RoutingContext) -> Arc<TaskScheduler> {
    // Fast path: already exists
    if let Some(scheduler) = self.schedulers.get(&context) {
      return Arc::clone(scheduler.value());
    }

    let entry = self.schedulers.entry(context).or_insert_with(|| {
      info!(context = %context, "Creating task scheduler");
      Arc::new(TaskScheduler::with_shutdown(
        context,
        self.config.clone(),
        self.cancel.child_token(),
      ))
    });
    Arc::clone(entry.value())
  }

  /// Existing scheduler for `context`, without creating one
  pub fn get(&self, context: RoutingContext) -> Option<Arc<TaskScheduler>> {
    self.schedulers.get(&context).map(|entry| Arc::clone(entry.value()))
  }

  pub fn contexts(&self) -> Vec<RoutingContext> {
    let mut contexts: Vec<_> = self.schedulers.iter().map(|entry| *entry.key()).collect();
    contexts.sort();
    contexts
  }

  pub fn len(&self) -> usize {
    self.schedulers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.schedulers.is_empty()
  }

  /// Stop and forget the scheduler for `context`. Queued tasks are dropped
  /// with it. Returns false if there was none.
  pub fn remove(&self, context: RoutingContext) -> bool {
    // Removed first so the map shard is not locked while the loop joins
    let Some((_, scheduler)) = self.schedulers.remove(&context) else {
      return false;
    };
    scheduler.stop_scheduler_loop();
    scheduler.clear();
    debug!(context = %context, "Task scheduler removed");
    true
  }

  /// Stop every scheduler loop. Schedulers and their queued tasks are kept.
  pub fn stop_all(&self) {
    let schedulers: Vec<_> = self.schedulers.iter().map(|entry| Arc::clone(entry.value())).collect();
    for scheduler in &schedulers {
      scheduler.stop_scheduler_loop();
    }
    info!(schedulers = schedulers.len(), "Stopped all task schedulers");
  }
}

impl Drop for TaskManager {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}
