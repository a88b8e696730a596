/// Errors raised by the bus infrastructure itself.
///
/// Listener and task faults are not errors here: they are isolated and
/// logged on the thread that ran them.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
  #[error("Failed to spawn thread {name}: {source}")]
  SpawnFailed {
    name: String,
    #[source]
    source: std::io::Error,
  },
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
