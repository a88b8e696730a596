//! Named background threads driven by a cancellation token.

use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BusError, Result};

/// A running loop thread and the token that stops it
pub(crate) struct LoopHandle {
  name: String,
  cancel: CancellationToken,
  thread: JoinHandle<()>,
}

impl LoopHandle {
  /// Spawn `body` on a thread called `name`. The body must return soon after
  /// the token it receives is cancelled.
  pub(crate) fn spawn<F>(name: String, cancel: CancellationToken, body: F) -> Result<Self>
  where
    F: FnOnce(CancellationToken) + Send + 'static,
  {
    let token = cancel.clone();
    let thread = thread::Builder::new()
      .name(name.clone())
      .spawn(move || body(token))
      .map_err(|source| BusError::SpawnFailed {
        name: name.clone(),
        source,
      })?;
    debug!(thread = %name, "Loop thread spawned");

    Ok(Self { name, cancel, thread })
  }

  pub(crate) fn is_running(&self) -> bool {
    !self.cancel.is_cancelled() && !self.thread.is_finished()
  }

  pub(crate) fn signal(&self) {
    self.cancel.cancel();
  }

  /// Wait for the thread to exit. From the loop thread itself this only
  /// detaches, since joining would never return.
  pub(crate) fn join(self) {
    if self.thread.thread().id() == thread::current().id() {
      debug!(thread = %self.name, "Stop requested from loop thread, not joining");
      return;
    }
    if self.thread.join().is_err() {
      warn!(thread = %self.name, "Loop thread exited with a panic");
    }
  }

  /// Signal, then join
  pub(crate) fn stop(self) {
    self.signal();
    self.join();
  }
}
