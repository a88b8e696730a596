//! CLI command implementations

mod config;
mod demo;
mod run;
mod stress;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use bus::{MessageQueue, RoutingContext, TaskManager};
use courier_core::Config;
use tracing::debug;

pub use config::{cmd_config_init, cmd_config_show};
pub use demo::cmd_demo;
pub use run::cmd_run;
pub use stress::cmd_stress;

/// Build a queue and task manager from config and start the message loop
/// (plus the application scheduler when `autostart_app` is set)
fn start_bus(config: &Config) -> Result<Arc<MessageQueue>> {
  let task_manager = Arc::new(TaskManager::new(config.scheduler.clone()));
  let queue = Arc::new(MessageQueue::new(config.queue.clone(), task_manager));

  queue
    .start_message_loop_threaded()
    .context("Failed to start message loop")?;

  if config.scheduler.autostart_app {
    queue
      .task_manager()
      .scheduler(RoutingContext::app())
      .start_scheduler_loop_threaded()
      .context("Failed to start application scheduler")?;
  }

  debug!("Bus started");
  Ok(queue)
}

/// Wait until the queue and every scheduler have nothing left to do
async fn wait_for_idle(queue: Arc<MessageQueue>, timeout: Duration) -> Result<bool> {
  let idle = tokio::task::spawn_blocking(move || {
    if !queue.wait_until_idle(timeout) {
      return false;
    }
    let manager = queue.task_manager();
    manager
      .contexts()
      .into_iter()
      .filter_map(|context| manager.get(context))
      .all(|scheduler| scheduler.wait_until_idle(timeout))
  })
  .await?;
  Ok(idle)
}

/// Stop the loop and every scheduler, joining their threads
async fn stop_bus(queue: Arc<MessageQueue>) -> Result<()> {
  tokio::task::spawn_blocking(move || {
    queue.stop_message_loop();
    queue.task_manager().stop_all();
  })
  .await?;
  Ok(())
}
