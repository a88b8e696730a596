//! Batch filters run over each drained batch before delivery.
//!
//! Filters see the whole batch at once so they can make decisions that need
//! every pending message, like keeping only the newest cursor move.

use std::{
  collections::{HashSet, VecDeque},
  panic::{AssertUnwindSafe, catch_unwind},
  sync::Arc,
};

use parking_lot::RwLock;
use tracing::{debug, error, trace};

use crate::{
  error::panic_message,
  message::{Envelope, Message},
};

/// Messages waiting for delivery, oldest first
pub type MessageBuffer = VecDeque<Envelope>;

pub trait MessageFilter: Send + Sync {
  /// Inspect the batch and remove or replace entries in place
  fn filter(&self, buffer: &mut MessageBuffer);
}

impl<F> MessageFilter for F
where
  F: Fn(&mut MessageBuffer) + Send + Sync,
{
  fn filter(&self, buffer: &mut MessageBuffer) {
    self(buffer)
  }
}

/// Ordered filters, unique by identity
#[derive(Default)]
pub(crate) struct FilterChain {
  filters: RwLock<Vec<Arc<dyn MessageFilter>>>,
}

impl FilterChain {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Append `filter` unless this exact instance is already installed
  pub(crate) fn add(&self, filter: Arc<dyn MessageFilter>) -> bool {
    let mut filters = self.filters.write();
    if filters.iter().any(|existing| same_filter(existing, &filter)) {
      return false;
    }
    filters.push(filter);
    debug!(filters = filters.len(), "Message filter added");
    true
  }

  pub(crate) fn remove(&self, filter: &Arc<dyn MessageFilter>) -> bool {
    let mut filters = self.filters.write();
    let before = filters.len();
    filters.retain(|existing| !same_filter(existing, filter));
    filters.len() != before
  }

  pub(crate) fn len(&self) -> usize {
    self.filters.read().len()
  }

  pub(crate) fn clear(&self) {
    self.filters.write().clear();
  }

  /// Run every filter in order. A panicking filter is logged and skipped;
  /// the chain always runs to the end.
  pub(crate) fn apply(&self, buffer: &mut MessageBuffer) {
    let filters = self.filters.read().clone();
    for filter in filters {
      let before = buffer.len();
      if let Err(panic) = catch_unwind(AssertUnwindSafe(|| filter.filter(buffer))) {
        error!(panic = %panic_message(&*panic), "Message filter panicked");
        continue;
      }
      if buffer.len() != before {
        trace!(before, after = buffer.len(), "Message filter changed batch");
      }
    }
  }
}

fn same_filter(a: &Arc<dyn MessageFilter>, b: &Arc<dyn MessageFilter>) -> bool {
  std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Keeps only the newest message of each configured type in a batch.
///
/// Other messages, and the relative order of everything kept, are untouched.
#[derive(Debug, Clone, Default)]
pub struct CoalesceFilter {
  type_tags: Vec<&'static str>,
}

impl CoalesceFilter {
  pub fn new(type_tags: impl IntoIterator<Item = &'static str>) -> Self {
    Self {
      type_tags: type_tags.into_iter().collect(),
    }
  }

  /// Also coalesce messages of kind `M`
  pub fn with<M: Message>(mut self) -> Self {
    if !self.type_tags.contains(&M::TYPE) {
      self.type_tags.push(M::TYPE);
    }
    self
  }
}

impl MessageFilter for CoalesceFilter {
  fn filter(&self, buffer: &mut MessageBuffer) {
    let mut seen = HashSet::new();
    let mut keep = vec![true; buffer.len()];
    for (index, envelope) in buffer.iter().enumerate().rev() {
      let tag = envelope.type_tag();
      if self.type_tags.contains(&tag) && !seen.insert(tag) {
        keep[index] = false;
      }
    }

    let mut index = 0;
    buffer.retain(|_| {
      let kept = keep[index];
      index += 1;
      kept
    });
  }
}
