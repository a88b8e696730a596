//! Listener capability and the type-keyed listener registry.
//!
//! The registry never owns a listener. Each entry holds a `Weak` reference
//! plus the listener's identity, so dropping the last `Arc` to a listener is
//! enough to stop deliveries to it. Dead entries are skipped at delivery time
//! and pruned on the next mutation.
//!
//! Per-type lists are copy-on-write `Arc<Vec<_>>`. Delivery works on a
//! snapshot (an `Arc` clone taken before the first listener runs), so handlers
//! may register or unregister listeners, even for the type currently being
//! delivered, without disturbing the delivery in progress. Such changes are
//! visible to the next snapshot.

use std::{
  collections::HashMap,
  marker::PhantomData,
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{Arc, Weak},
};

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::{
  error::panic_message,
  message::{Envelope, Message},
};

/// Capability to receive messages of kind `M`.
///
/// Handlers take `&self`; listeners keep their state behind interior
/// mutability. A handler may run on the message loop thread, on a scheduler
/// thread, or on the producer's thread for direct sends.
pub trait MessageListener<M: Message>: Send + Sync + 'static {
  fn handle_message(&self, message: &M);
}

/// Identity of a listener object, shared by all its registrations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

impl ListenerId {
  pub fn of<L: ?Sized>(listener: &Arc<L>) -> Self {
    Self(Arc::as_ptr(listener) as *const () as usize)
  }
}

/// Type-erased binding of one listener to one message kind
trait Binding: Send + Sync {
  /// Hand the message to the listener. Returns false if the listener is gone.
  fn deliver(&self, envelope: &Envelope) -> bool;

  fn is_alive(&self) -> bool;
}

struct TypedBinding<M, L> {
  listener: Weak<L>,
  _message: PhantomData<fn(&M)>,
}

impl<M: Message, L: MessageListener<M>> Binding for TypedBinding<M, L> {
  fn deliver(&self, envelope: &Envelope) -> bool {
    let Some(listener) = self.listener.upgrade() else {
      return false;
    };
    match envelope.payload::<M>() {
      Some(message) => {
        listener.handle_message(message);
        true
      }
      // Another kind registered under the same tag
      None => false,
    }
  }

  fn is_alive(&self) -> bool {
    self.listener.strong_count() > 0
  }
}

#[derive(Clone)]
pub(crate) struct ListenerEntry {
  id: ListenerId,
  binding: Arc<dyn Binding>,
}

impl ListenerEntry {
  pub(crate) fn id(&self) -> ListenerId {
    self.id
  }
}

type ListenerList = Arc<Vec<ListenerEntry>>;

/// Message type tag -> listeners in registration order
#[derive(Default)]
pub(crate) struct ListenerRegistry {
  by_type: RwLock<HashMap<&'static str, ListenerList>>,
}

impl ListenerRegistry {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Add `listener` for kind `M`. Returns false if it was already registered.
  pub(crate) fn register<M, L>(&self, listener: &Arc<L>) -> bool
  where
    M: Message,
    L: MessageListener<M>,
  {
    let id = ListenerId::of(listener);
    let mut by_type = self.by_type.write();
    let entries = Arc::make_mut(by_type.entry(M::TYPE).or_default());

    // Prune first: a dead entry may share the address of a new listener
    entries.retain(|entry| entry.binding.is_alive());
    if entries.iter().any(|entry| entry.id == id) {
      return false;
    }

    entries.push(ListenerEntry {
      id,
      binding: Arc::new(TypedBinding::<M, L> {
        listener: Arc::downgrade(listener),
        _message: PhantomData,
      }),
    });
    debug!(type_tag = M::TYPE, listeners = entries.len(), "Listener registered");
    true
  }

  /// Remove `id` from every type. Returns how many registrations were removed.
  pub(crate) fn unregister(&self, id: ListenerId) -> usize {
    let mut by_type = self.by_type.write();
    let mut removed = 0;

    for list in by_type.values_mut() {
      let touched = list.iter().any(|entry| entry.id == id || !entry.binding.is_alive());
      if !touched {
        continue;
      }
      let entries = Arc::make_mut(list);
      removed += entries.iter().filter(|entry| entry.id == id).count();
      entries.retain(|entry| entry.id != id && entry.binding.is_alive());
    }
    by_type.retain(|_, list| !list.is_empty());

    if removed > 0 {
      debug!(removed, "Listener unregistered");
    }
    removed
  }

  /// Point-in-time copy of the listeners for `type_tag`
  pub(crate) fn snapshot(&self, type_tag: &str) -> Option<ListenerList> {
    self.by_type.read().get(type_tag).cloned()
  }

  /// Deliver `envelope` to a fresh snapshot of its type's listeners.
  ///
  /// With `isolate`, a panicking listener is logged and the remaining
  /// listeners still run. Otherwise the panic propagates to the caller.
  /// Returns the number of listeners that received the message.
  pub(crate) fn deliver(&self, envelope: &Envelope, isolate: bool) -> usize {
    let Some(snapshot) = self.snapshot(envelope.type_tag()) else {
      return 0;
    };

    let mut delivered = 0;
    for entry in snapshot.iter() {
      if !isolate {
        if entry.binding.deliver(envelope) {
          delivered += 1;
        }
        continue;
      }

      match catch_unwind(AssertUnwindSafe(|| entry.binding.deliver(envelope))) {
        Ok(true) => delivered += 1,
        Ok(false) => {}
        Err(panic) => {
          error!(
            message_id = envelope.id(),
            type_tag = envelope.type_tag(),
            listener = ?entry.id(),
            panic = %panic_message(&*panic),
            "Listener panicked while handling message"
          );
        }
      }
    }
    delivered
  }

  /// Live listeners registered for `type_tag`
  pub(crate) fn listener_count(&self, type_tag: &str) -> usize {
    self
      .by_type
      .read()
      .get(type_tag)
      .map(|list| list.iter().filter(|entry| entry.binding.is_alive()).count())
      .unwrap_or(0)
  }

  /// Number of message types with at least one live listener
  pub(crate) fn type_count(&self) -> usize {
    self
      .by_type
      .read()
      .values()
      .filter(|list| list.iter().any(|entry| entry.binding.is_alive()))
      .count()
  }

  pub(crate) fn clear(&self) {
    self.by_type.write().clear();
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  #[derive(Debug)]
  struct Ping;

  impl Message for Ping {
    const TYPE: &'static str = "Ping";
  }

  #[derive(Debug)]
  struct Pong;

  impl Message for Pong {
    const TYPE: &'static str = "Pong";
  }

  #[derive(Default)]
  struct Counter {
    pings: AtomicUsize,
    pongs: AtomicUsize,
  }

  impl MessageListener<Ping> for Counter {
    fn handle_message(&self, _message: &Ping) {
      self.pings.fetch_add(1, Ordering::SeqCst);
    }
  }

  impl MessageListener<Pong> for Counter {
    fn handle_message(&self, _message: &Pong) {
      self.pongs.fetch_add(1, Ordering::SeqCst);
    }
  }

  struct Exploding;

  impl MessageListener<Ping> for Exploding {
    fn handle_message(&self, _message: &Ping) {
      panic!("boom");
    }
  }

  #[test]
  fn test_register_is_unique() {
    let registry = ListenerRegistry::new();
    let listener = Arc::new(Counter::default());

    assert!(registry.register::<Ping, _>(&listener));
    assert!(!registry.register::<Ping, _>(&listener));
    assert!(!registry.register::<Ping, _>(&listener));

    assert_eq!(registry.listener_count(Ping::TYPE), 1);
    assert_eq!(registry.type_count(), 1);
  }

  #[test]
  fn test_one_object_two_types() {
    let registry = ListenerRegistry::new();
    let listener = Arc::new(Counter::default());

    registry.register::<Ping, _>(&listener);
    registry.register::<Pong, _>(&listener);
    assert_eq!(registry.type_count(), 2);

    registry.deliver(&Envelope::new(Ping), false);
    registry.deliver(&Envelope::new(Pong), false);
    registry.deliver(&Envelope::new(Pong), false);
    assert_eq!(listener.pings.load(Ordering::SeqCst), 1);
    assert_eq!(listener.pongs.load(Ordering::SeqCst), 2);

    assert_eq!(registry.unregister(ListenerId::of(&listener)), 2);
    assert_eq!(registry.type_count(), 0);
  }

  #[test]
  fn test_dropped_listener_is_skipped_and_pruned() {
    let registry = ListenerRegistry::new();
    let kept = Arc::new(Counter::default());
    let dropped = Arc::new(Counter::default());

    registry.register::<Ping, _>(&kept);
    registry.register::<Ping, _>(&dropped);
    drop(dropped);

    assert_eq!(registry.listener_count(Ping::TYPE), 1);
    assert_eq!(registry.deliver(&Envelope::new(Ping), false), 1);

    // Any mutation prunes the dead entry
    let other = Arc::new(Counter::default());
    registry.register::<Ping, _>(&other);
    assert_eq!(registry.snapshot(Ping::TYPE).map(|list| list.len()), Some(2));
  }

  #[test]
  fn test_snapshot_is_not_affected_by_later_registration() {
    let registry = ListenerRegistry::new();
    let first = Arc::new(Counter::default());
    registry.register::<Ping, _>(&first);

    let snapshot = registry.snapshot(Ping::TYPE).unwrap();
    let second = Arc::new(Counter::default());
    registry.register::<Ping, _>(&second);

    assert_eq!(snapshot.len(), 1);
    assert_eq!(registry.snapshot(Ping::TYPE).unwrap().len(), 2);
  }

  #[test]
  fn test_delivery_order_follows_registration() {
    struct Recorder {
      name: &'static str,
      log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    impl MessageListener<Ping> for Recorder {
      fn handle_message(&self, _message: &Ping) {
        self.log.lock().push(self.name);
      }
    }

    let registry = ListenerRegistry::new();
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let listeners: Vec<_> = ["a", "b", "c"]
      .into_iter()
      .map(|name| {
        Arc::new(Recorder {
          name,
          log: Arc::clone(&log),
        })
      })
      .collect();
    for listener in &listeners {
      registry.register::<Ping, _>(listener);
    }

    registry.deliver(&Envelope::new(Ping), false);
    assert_eq!(*log.lock(), vec!["a", "b", "c"]);
  }

  #[test]
  fn test_isolated_delivery_survives_panics() {
    let registry = ListenerRegistry::new();
    let exploding = Arc::new(Exploding);
    let counter = Arc::new(Counter::default());
    registry.register::<Ping, _>(&exploding);
    registry.register::<Ping, _>(&counter);

    assert_eq!(registry.deliver(&Envelope::new(Ping), true), 1);
    assert_eq!(counter.pings.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_unisolated_delivery_propagates_panics() {
    let registry = ListenerRegistry::new();
    let exploding = Arc::new(Exploding);
    registry.register::<Ping, _>(&exploding);

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| registry.deliver(&Envelope::new(Ping), false)));
    assert!(result.is_err());
  }

  #[test]
  fn test_unregister_unknown_is_noop() {
    let registry = ListenerRegistry::new();
    let listener = Arc::new(Counter::default());
    assert_eq!(registry.unregister(ListenerId::of(&listener)), 0);
  }
}
