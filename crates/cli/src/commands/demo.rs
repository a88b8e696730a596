//! `courier demo` - a short scripted session on the bus

use std::{
  sync::{Arc, atomic::Ordering},
  time::Duration,
};

use anyhow::{Result, bail};
use bus::{CoalesceFilter, Envelope, RoutingContext};
use courier_core::Config;
use serde::Serialize;
use tracing::info;

use super::{start_bus, stop_bus, wait_for_idle};
use crate::messages::{CursorMoved, CursorTracker, FocusTracker, FocusView, StatusLog, StatusText, View};

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const MOVES_PER_BURST: u32 = 10;

#[derive(Debug, Serialize)]
struct DemoReport {
  bursts: u32,
  cursor_moves_dispatched: u32,
  cursor_moves_delivered: usize,
  last_cursor: Option<(u32, u32)>,
  focus_changes: usize,
  focused_view: View,
  focus_context: String,
  status_lines: Vec<String>,
}

/// Simulate an editor tab: bursts of cursor moves coalesced by a filter, focus
/// changes delivered on the tab's scheduler, and status text inline
pub async fn cmd_demo(config: &Config, bursts: u32, json: bool) -> Result<()> {
  let queue = start_bus(config)?;

  let cursor = Arc::new(CursorTracker::default());
  let focus = Arc::new(FocusTracker::default());
  let status = Arc::new(StatusLog::default());
  queue.register_listener::<CursorMoved, _>(&cursor);
  queue.register_listener::<FocusView, _>(&focus);
  queue.register_listener::<StatusText, _>(&status);
  queue.add_message_filter(Arc::new(CoalesceFilter::default().with::<CursorMoved>()));

  // Focus changes run on the tab's own scheduler
  let tab = RoutingContext::next_tab();
  queue.set_send_messages_as_tasks(true);
  queue.task_manager().scheduler(tab).start_scheduler_loop_threaded()?;

  info!(bursts, context = %tab, "Running demo");
  queue.dispatch(Envelope::new(StatusText::new("demo started")).as_task(false));

  for burst in 0..bursts {
    for step in 0..MOVES_PER_BURST {
      let line = burst * MOVES_PER_BURST + step;
      let moved = CursorMoved { line, column: step * 2 };
      queue.dispatch(Envelope::new(moved).logged(false).as_task(false));
    }
    queue.dispatch(Envelope::new(FocusView::Toggle).routed_to(tab));
  }
  queue.dispatch(Envelope::new(FocusView::Focus(View::Code)).routed_to(tab));

  if !wait_for_idle(Arc::clone(&queue), IDLE_TIMEOUT).await? {
    stop_bus(queue).await?;
    bail!("Bus did not go idle within {:?}", IDLE_TIMEOUT);
  }

  // Urgent message, delivered before returning
  queue.send_message(StatusText::new("demo finished"));
  stop_bus(Arc::clone(&queue)).await?;

  let report = DemoReport {
    bursts,
    cursor_moves_dispatched: bursts * MOVES_PER_BURST,
    cursor_moves_delivered: cursor.moves.load(Ordering::SeqCst),
    last_cursor: *cursor.last.lock(),
    focus_changes: focus.changes.load(Ordering::SeqCst),
    focused_view: *focus.focused.lock(),
    focus_context: tab.to_string(),
    status_lines: status.lines.lock().clone(),
  };

  if json {
    println!("{}", serde_json::to_string_pretty(&report)?);
    return Ok(());
  }

  println!("Courier Demo");
  println!("============\n");
  println!("Bursts:          {}", report.bursts);
  println!(
    "Cursor moves:    {} dispatched, {} delivered after coalescing",
    report.cursor_moves_dispatched, report.cursor_moves_delivered
  );
  if let Some((line, column)) = report.last_cursor {
    println!("Last cursor:     line {}, column {}", line, column);
  }
  println!(
    "Focus changes:   {} on {} (now {:?})",
    report.focus_changes, report.focus_context, report.focused_view
  );
  println!("Status lines:");
  for line in &report.status_lines {
    println!("  - {}", line);
  }

  Ok(())
}
