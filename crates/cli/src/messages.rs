//! Sample message kinds and listeners used by the demo, run and stress commands

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bus::{Message, MessageListener};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct CursorMoved {
  pub line: u32,
  pub column: u32,
}

impl Message for CursorMoved {
  const TYPE: &'static str = "CursorMoved";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
  Graph,
  Code,
}

#[derive(Debug, Clone, Copy)]
pub enum FocusView {
  Focus(View),
  Toggle,
}

impl Message for FocusView {
  const TYPE: &'static str = "FocusView";
}

#[derive(Debug, Clone)]
pub struct StatusText {
  pub text: String,
}

impl StatusText {
  pub fn new(text: impl Into<String>) -> Self {
    Self { text: text.into() }
  }
}

impl Message for StatusText {
  const TYPE: &'static str = "StatusText";
}

/// Payload of the stress command
#[derive(Debug)]
pub struct Ping {
  pub sequence: u64,
}

impl Message for Ping {
  const TYPE: &'static str = "Ping";
}

// ============================================================================
// Listeners
// ============================================================================

/// Follows the cursor
#[derive(Default)]
pub struct CursorTracker {
  pub moves: AtomicUsize,
  pub last: Mutex<Option<(u32, u32)>>,
}

impl MessageListener<CursorMoved> for CursorTracker {
  fn handle_message(&self, message: &CursorMoved) {
    self.moves.fetch_add(1, Ordering::SeqCst);
    *self.last.lock() = Some((message.line, message.column));
  }
}

/// Tracks which view has focus
pub struct FocusTracker {
  pub changes: AtomicUsize,
  pub focused: Mutex<View>,
}

impl Default for FocusTracker {
  fn default() -> Self {
    Self {
      changes: AtomicUsize::new(0),
      focused: Mutex::new(View::Code),
    }
  }
}

impl MessageListener<FocusView> for FocusTracker {
  fn handle_message(&self, message: &FocusView) {
    let mut focused = self.focused.lock();
    *focused = match (message, *focused) {
      (FocusView::Focus(view), _) => *view,
      (FocusView::Toggle, View::Code) => View::Graph,
      (FocusView::Toggle, View::Graph) => View::Code,
    };
    self.changes.fetch_add(1, Ordering::SeqCst);
  }
}

/// Keeps every status line and echoes it to the log
#[derive(Default)]
pub struct StatusLog {
  pub lines: Mutex<Vec<String>>,
}

impl MessageListener<StatusText> for StatusLog {
  fn handle_message(&self, message: &StatusText) {
    info!(status = %message.text, "Status");
    self.lines.lock().push(message.text.clone());
  }
}

/// Counts pings
#[derive(Default)]
pub struct PingCounter {
  pub received: AtomicUsize,
  pub highest_sequence: AtomicU64,
}

impl MessageListener<Ping> for PingCounter {
  fn handle_message(&self, message: &Ping) {
    self.received.fetch_add(1, Ordering::Relaxed);
    self.highest_sequence.fetch_max(message.sequence, Ordering::Relaxed);
  }
}
