//! Routing contexts select which scheduler runs task-routed work.
//!
//! One reserved context is application-wide, one is for background work, and
//! every UI tab gets its own id from [`RoutingContext::next_tab`].

use std::sync::atomic::{AtomicU64, Ordering};

const APP_ID: u64 = 1;
const BACKGROUND_ID: u64 = 2;
const FIRST_TAB_ID: u64 = 16;

static NEXT_TAB: AtomicU64 = AtomicU64::new(FIRST_TAB_ID);
static CURRENT: AtomicU64 = AtomicU64::new(APP_ID);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingContext(u64);

impl RoutingContext {
  /// The application-wide context, used when no tab applies
  pub const fn app() -> Self {
    Self(APP_ID)
  }

  /// Context for long-running background work
  pub const fn background() -> Self {
    Self(BACKGROUND_ID)
  }

  /// Allocate a fresh tab context
  pub fn next_tab() -> Self {
    Self(NEXT_TAB.fetch_add(1, Ordering::Relaxed))
  }

  /// The context currently in focus. Defaults to [`RoutingContext::app`].
  pub fn current() -> Self {
    Self(CURRENT.load(Ordering::Acquire))
  }

  /// Record which context is in focus (called by whatever tracks tab focus)
  pub fn set_current(context: Self) {
    CURRENT.store(context.0, Ordering::Release);
  }

  pub fn id(&self) -> u64 {
    self.0
  }

  pub fn is_app(&self) -> bool {
    self.0 == APP_ID
  }

  pub fn is_tab(&self) -> bool {
    self.0 >= FIRST_TAB_ID
  }
}

impl Default for RoutingContext {
  fn default() -> Self {
    Self::current()
  }
}

impl std::fmt::Display for RoutingContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.0 {
      APP_ID => write!(f, "app"),
      BACKGROUND_ID => write!(f, "background"),
      id => write!(f, "tab-{}", id),
    }
  }
}
