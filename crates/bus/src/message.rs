//! Message types carried by the bus.
//!
//! A concrete message is any `Debug + Send + Sync` type implementing
//! [`Message`]. Producers wrap it in an [`Envelope`], which adds the delivery
//! metadata the queue acts on, and hand the envelope to the queue.

use std::{
  any::Any,
  fmt,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use crate::{queue::MessageQueue, routing::RoutingContext};

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A concrete message kind.
pub trait Message: Any + Send + Sync + fmt::Debug {
  /// Stable tag naming this message kind. Listeners are keyed by it.
  const TYPE: &'static str;
}

/// Object-safe view of a message payload
pub(crate) trait Payload: Any + Send + Sync + fmt::Debug {
  fn as_any(&self) -> &dyn Any;
}

impl<M: Message> Payload for M {
  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// Delivery metadata attached to every message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMeta {
  /// Process-unique, increasing in construction order
  pub id: u64,
  pub type_tag: &'static str,
  /// Trace the message at info level when it is delivered
  pub is_logged: bool,
  /// Eligible for scheduler delivery when the queue sends messages as tasks
  pub send_as_task: bool,
  /// Scheduler that receives the message when it is sent as a task
  pub routing: RoutingContext,
  /// Re-emitted from history rather than produced fresh
  pub is_replayed: bool,
}

/// A message plus its delivery metadata.
///
/// Cloning is cheap and shares the payload.
#[derive(Clone)]
pub struct Envelope {
  meta: MessageMeta,
  payload: Arc<dyn Payload>,
}

impl Envelope {
  pub fn new<M: Message>(message: M) -> Self {
    Self {
      meta: MessageMeta {
        id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
        type_tag: M::TYPE,
        is_logged: true,
        send_as_task: true,
        routing: RoutingContext::current(),
        is_replayed: false,
      },
      payload: Arc::new(message),
    }
  }

  pub fn logged(mut self, is_logged: bool) -> Self {
    self.meta.is_logged = is_logged;
    self
  }

  pub fn as_task(mut self, send_as_task: bool) -> Self {
    self.meta.send_as_task = send_as_task;
    self
  }

  pub fn routed_to(mut self, routing: RoutingContext) -> Self {
    self.meta.routing = routing;
    self
  }

  pub fn replayed(mut self, is_replayed: bool) -> Self {
    self.meta.is_replayed = is_replayed;
    self
  }

  pub fn set_is_logged(&mut self, is_logged: bool) {
    self.meta.is_logged = is_logged;
  }

  pub fn set_send_as_task(&mut self, send_as_task: bool) {
    self.meta.send_as_task = send_as_task;
  }

  pub fn set_routing(&mut self, routing: RoutingContext) {
    self.meta.routing = routing;
  }

  pub fn meta(&self) -> &MessageMeta {
    &self.meta
  }

  pub fn id(&self) -> u64 {
    self.meta.id
  }

  pub fn type_tag(&self) -> &'static str {
    self.meta.type_tag
  }

  pub fn is_logged(&self) -> bool {
    self.meta.is_logged
  }

  pub fn send_as_task(&self) -> bool {
    self.meta.send_as_task
  }

  pub fn routing(&self) -> RoutingContext {
    self.meta.routing
  }

  pub fn is_replayed(&self) -> bool {
    self.meta.is_replayed
  }

  /// Whether the payload is of kind `M`
  pub fn is<M: Message>(&self) -> bool {
    self.meta.type_tag == M::TYPE && self.payload.as_any().is::<M>()
  }

  /// Borrow the payload as `M`, if that is its kind
  pub fn payload<M: Message>(&self) -> Option<&M> {
    self.payload.as_any().downcast_ref::<M>()
  }

  /// Enqueue on the process-wide queue
  pub fn dispatch(self) {
    MessageQueue::instance().dispatch(self);
  }
}

impl<M: Message> From<M> for Envelope {
  fn from(message: M) -> Self {
    Self::new(message)
  }
}

impl fmt::Debug for Envelope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Envelope")
      .field("meta", &self.meta)
      .field("payload", &self.payload)
      .finish()
  }
}

impl fmt::Display for Envelope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{} {:?}", self.meta.type_tag, self.meta.id, self.payload)?;
    if self.meta.is_replayed {
      write!(f, " (replayed)")?;
    }
    Ok(())
  }
}
