//! `courier stress` - dispatch throughput across routing contexts

use std::{
  sync::{Arc, atomic::Ordering},
  time::{Duration, Instant},
};

use anyhow::{Result, bail};
use bus::{Envelope, RoutingContext};
use courier_core::Config;
use serde::Serialize;
use tracing::info;

use super::{start_bus, stop_bus, wait_for_idle};
use crate::messages::{Ping, PingCounter};

const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct StressReport {
  messages: u64,
  contexts: usize,
  as_tasks: bool,
  delivered: usize,
  highest_sequence: u64,
  elapsed_ms: u64,
  messages_per_second: f64,
  tasks_per_context: Vec<(String, u64)>,
}

pub async fn cmd_stress(config: &Config, messages: u64, contexts: usize, as_tasks: bool, json: bool) -> Result<()> {
  if contexts == 0 {
    bail!("--contexts must be at least 1");
  }

  let queue = start_bus(config)?;
  let counter = Arc::new(PingCounter::default());
  queue.register_listener::<Ping, _>(&counter);
  queue.set_send_messages_as_tasks(as_tasks);

  let tabs: Vec<_> = (0..contexts).map(|_| RoutingContext::next_tab()).collect();
  if as_tasks {
    for tab in &tabs {
      queue.task_manager().scheduler(*tab).start_scheduler_loop_threaded()?;
    }
  }

  info!(messages, contexts, as_tasks, "Starting stress run");
  let started = Instant::now();

  for sequence in 0..messages {
    let tab = tabs[(sequence % contexts as u64) as usize];
    queue.dispatch(
      Envelope::new(Ping { sequence })
        .logged(false)
        .as_task(as_tasks)
        .routed_to(tab),
    );
  }

  if !wait_for_idle(Arc::clone(&queue), IDLE_TIMEOUT).await? {
    stop_bus(queue).await?;
    bail!("Bus did not go idle within {:?}", IDLE_TIMEOUT);
  }
  let elapsed = started.elapsed();

  let tasks_per_context = tabs
    .iter()
    .filter_map(|tab| queue.task_manager().get(*tab))
    .map(|scheduler| (scheduler.context().to_string(), scheduler.completed_count()))
    .collect();
  stop_bus(Arc::clone(&queue)).await?;

  let report = StressReport {
    messages,
    contexts,
    as_tasks,
    delivered: counter.received.load(Ordering::Relaxed),
    highest_sequence: counter.highest_sequence.load(Ordering::Relaxed),
    elapsed_ms: elapsed.as_millis() as u64,
    messages_per_second: messages as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    tasks_per_context,
  };

  if json {
    println!("{}", serde_json::to_string_pretty(&report)?);
    return Ok(());
  }

  println!("Courier Stress");
  println!("==============\n");
  println!("Messages:        {}", report.messages);
  println!("Contexts:        {}", report.contexts);
  println!("As tasks:        {}", if report.as_tasks { "yes" } else { "no" });
  println!("Delivered:       {}", report.delivered);
  println!("Last sequence:   {}", report.highest_sequence);
  println!("Elapsed:         {} ms", report.elapsed_ms);
  println!("Throughput:      {:.0} msg/s", report.messages_per_second);
  for (context, completed) in &report.tasks_per_context {
    println!("  {:<14} {} tasks", context, completed);
  }

  Ok(())
}
