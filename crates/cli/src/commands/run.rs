//! `courier run` - keep the bus running until Ctrl-C

use std::sync::Arc;

use anyhow::{Context, Result};
use bus::Envelope;
use courier_core::Config;
use tracing::info;

use super::{start_bus, stop_bus};
use crate::messages::{StatusLog, StatusText};

pub async fn cmd_run(config: &Config) -> Result<()> {
  let queue = start_bus(config)?;

  let status = Arc::new(StatusLog::default());
  queue.register_listener::<StatusText, _>(&status);
  queue.dispatch(Envelope::new(StatusText::new("courier running")));

  info!(
    poll_interval_ms = config.queue.poll_interval_ms,
    send_as_tasks = config.queue.send_as_tasks,
    "Bus running, press Ctrl-C to stop"
  );

  tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
  info!("Shutdown requested");

  // Delivered inline so it lands before the loop stops
  queue.send_message(StatusText::new("courier stopping"));
  stop_bus(queue).await?;

  info!(status_lines = status.lines.lock().len(), "Bus stopped");
  Ok(())
}
