//! MessageQueue - buffers dispatched messages and delivers them from a loop thread
//!
//! # Delivery
//!
//! Producers append to the pending buffer with [`MessageQueue::dispatch`].
//! Each drain cycle swaps the whole buffer out, runs the filter chain over
//! that batch, then delivers the survivors in FIFO order. Every message gets
//! its own listener snapshot, so a listener registered while message `n` is
//! handled first sees message `n + 1`.
//!
//! A message flagged `send_as_task` is handed to the scheduler of its routing
//! context instead, while the queue-wide toggle is on. The delivery task takes
//! its snapshot when it runs on that scheduler's thread.
//!
//! # Direct sends
//!
//! [`MessageQueue::process_message`] and [`MessageQueue::send_message`] skip
//! the buffer and run listeners on the calling thread. They never wait for
//! the loop and may be called from anywhere, handlers included. Ordering
//! relative to buffered messages is not defined.

use std::{
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Arc, LazyLock, Weak,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  time::{Duration, Instant},
};

use courier_core::QueueConfig;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::{
  error::{Result, panic_message},
  filter::{FilterChain, MessageBuffer, MessageFilter},
  listener::{ListenerId, ListenerRegistry, MessageListener},
  message::{Envelope, Message},
  task::{LambdaTask, TaskId, TaskManager},
  worker::LoopHandle,
};

static INSTANCE: LazyLock<Arc<MessageQueue>> =
  LazyLock::new(|| Arc::new(MessageQueue::new(QueueConfig::default(), TaskManager::instance())));

pub struct MessageQueue {
  config: QueueConfig,
  listeners: Arc<ListenerRegistry>,
  filters: FilterChain,
  buffer: Mutex<MessageBuffer>,
  /// Messages swapped out of the buffer but not yet delivered
  in_flight: AtomicUsize,
  /// Held for the whole of a drain cycle
  draining: Mutex<()>,
  send_as_tasks: AtomicBool,
  task_manager: Arc<TaskManager>,
  message_loop: Mutex<Option<LoopHandle>>,
}

impl MessageQueue {
  /// An isolated queue. Most code wants [`MessageQueue::instance`].
  pub fn new(config: QueueConfig, task_manager: Arc<TaskManager>) -> Self {
    Self {
      send_as_tasks: AtomicBool::new(config.send_as_tasks),
      config,
      listeners: Arc::new(ListenerRegistry::new()),
      filters: FilterChain::new(),
      buffer: Mutex::new(MessageBuffer::new()),
      in_flight: AtomicUsize::new(0),
      draining: Mutex::new(()),
      task_manager,
      message_loop: Mutex::new(None),
    }
  }

  /// The process-wide queue, created on first use
  pub fn instance() -> Arc<MessageQueue> {
    Arc::clone(&INSTANCE)
  }

  pub fn config(&self) -> &QueueConfig {
    &self.config
  }

  pub fn task_manager(&self) -> &Arc<TaskManager> {
    &self.task_manager
  }

  // ==========================================================================
  // Listeners
  // ==========================================================================

  /// Register `listener` for messages of kind `M`. An object listening to
  /// several kinds registers once per kind. Returns false if it was already
  /// registered for `M`.
  pub fn register_listener<M, L>(&self, listener: &Arc<L>) -> bool
  where
    M: Message,
    L: MessageListener<M>,
  {
    self.listeners.register::<M, L>(listener)
  }

  /// Remove `listener` from every kind it is registered for
  pub fn unregister_listener<L: ?Sized>(&self, listener: &Arc<L>) -> bool {
    self.listeners.unregister(ListenerId::of(listener)) > 0
  }

  pub fn listener_count<M: Message>(&self) -> usize {
    self.listeners.listener_count(M::TYPE)
  }

  /// Message types with at least one live listener
  pub fn listened_type_count(&self) -> usize {
    self.listeners.type_count()
  }

  // ==========================================================================
  // Filters
  // ==========================================================================

  /// Append a batch filter. Adding the same instance again is a no-op.
  pub fn add_message_filter(&self, filter: Arc<dyn MessageFilter>) -> bool {
    self.filters.add(filter)
  }

  pub fn remove_message_filter(&self, filter: &Arc<dyn MessageFilter>) -> bool {
    self.filters.remove(filter)
  }

  pub fn filter_count(&self) -> usize {
    self.filters.len()
  }

  // ==========================================================================
  // Sending
  // ==========================================================================

  /// Append to the pending buffer. Never blocks on delivery.
  pub fn dispatch(&self, message: impl Into<Envelope>) {
    let envelope = message.into();
    trace!(message_id = envelope.id(), type_tag = envelope.type_tag(), "Message dispatched");
    self.buffer.lock().push_back(envelope);
  }

  /// Deliver one message now, skipping the buffer.
  ///
  /// With `via_task`, a message flagged `send_as_task` goes to its routing
  /// context's scheduler when task sending is enabled, and this returns
  /// without waiting. Otherwise listeners run on this thread and a panicking
  /// listener unwinds into the caller.
  pub fn process_message(&self, message: impl Into<Envelope>, via_task: bool) {
    self.route(message.into(), via_task, false);
  }

  /// Deliver one message now on this thread, never through a scheduler
  pub fn send_message(&self, message: impl Into<Envelope>) {
    self.route(message.into(), false, false);
  }

  pub fn set_send_messages_as_tasks(&self, enabled: bool) {
    self.send_as_tasks.store(enabled, Ordering::SeqCst);
    debug!(enabled, "Send messages as tasks");
  }

  pub fn sends_messages_as_tasks(&self) -> bool {
    self.send_as_tasks.load(Ordering::SeqCst)
  }

  fn route(&self, envelope: Envelope, via_task: bool, isolate: bool) {
    if via_task && envelope.send_as_task() && self.sends_messages_as_tasks() {
      self.submit_delivery_task(envelope);
      return;
    }

    log_delivery(&envelope);
    let delivered = self.listeners.deliver(&envelope, isolate);
    trace!(message_id = envelope.id(), delivered, "Message delivered");
  }

  fn submit_delivery_task(&self, envelope: Envelope) -> TaskId {
    let context = envelope.routing();
    let listeners = Arc::clone(&self.listeners);
    let name = format!("deliver {}", envelope.type_tag());
    let message_id = envelope.id();

    let task_id = self.task_manager.scheduler(context).push_task(LambdaTask::new(name, move || {
      log_delivery(&envelope);
      listeners.deliver(&envelope, true);
    }));
    trace!(message_id, context = %context, task_id = %task_id, "Message routed to scheduler");
    task_id
  }

  // ==========================================================================
  // Drain cycle
  // ==========================================================================

  /// Run one drain cycle on the calling thread.
  ///
  /// Swaps, filters and delivers batches until the buffer is empty, so
  /// messages dispatched by handlers during the cycle are delivered in it.
  /// Returns the number of messages the filters kept across all batches, or
  /// `None` if another cycle is already running.
  pub fn drain_once(&self) -> Option<usize> {
    let _draining = self.draining.try_lock()?;
    let _in_flight = InFlightGuard(&self.in_flight);

    let mut kept = 0;
    loop {
      let mut batch = {
        let mut buffer = self.buffer.lock();
        self.in_flight.store(buffer.len(), Ordering::SeqCst);
        std::mem::take(&mut *buffer)
      };
      if batch.is_empty() {
        return Some(kept);
      }

      let dispatched = batch.len();
      self.filters.apply(&mut batch);
      self.in_flight.store(batch.len(), Ordering::SeqCst);
      if batch.len() != dispatched {
        debug!(dispatched, kept = batch.len(), "Filters reduced batch");
      }

      kept += batch.len();
      while let Some(envelope) = batch.pop_front() {
        let message_id = envelope.id();
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.route(envelope, true, true))) {
          error!(message_id, panic = %panic_message(&*panic), "Message delivery panicked");
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
      }
    }
  }

  // ==========================================================================
  // Loop control
  // ==========================================================================

  /// Start the drain loop thread. No-op if it is already running.
  pub fn start_message_loop_threaded(self: &Arc<Self>) -> Result<()> {
    let mut slot = self.message_loop.lock();
    if slot.as_ref().is_some_and(LoopHandle::is_running) {
      return Ok(());
    }

    let queue = Arc::downgrade(self);
    let interval = self.config.poll_interval();
    let handle = LoopHandle::spawn(
      "courier-message-loop".to_string(),
      CancellationToken::new(),
      move |cancel| run_message_loop(queue, cancel, interval),
    )?;
    *slot = Some(handle);

    info!(poll_interval_ms = interval.as_millis() as u64, "Message loop started");
    Ok(())
  }

  /// Stop the drain loop after its current cycle. No-op if not running.
  pub fn stop_message_loop(&self) {
    let Some(handle) = self.message_loop.lock().take() else {
      return;
    };
    handle.stop();
    info!("Message loop stopped");
  }

  pub fn loop_is_running(&self) -> bool {
    self.message_loop.lock().as_ref().is_some_and(LoopHandle::is_running)
  }

  // ==========================================================================
  // State
  // ==========================================================================

  /// Something is buffered or a drained batch is still being delivered
  pub fn has_messages_queued(&self) -> bool {
    !self.is_idle()
  }

  pub fn pending_count(&self) -> usize {
    self.buffer.lock().len()
  }

  /// Nothing buffered and no drained batch still being delivered
  pub fn is_idle(&self) -> bool {
    let buffer = self.buffer.lock();
    buffer.is_empty() && self.in_flight.load(Ordering::SeqCst) == 0
  }

  /// Poll until idle. Returns false on timeout.
  pub fn wait_until_idle(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
      if self.is_idle() {
        return true;
      }
      if Instant::now() >= deadline {
        return false;
      }
      std::thread::sleep(self.config.poll_interval());
    }
  }

  /// Drop all listeners, filters and pending messages. The loop is left as is.
  pub fn clear(&self) {
    let dropped = std::mem::take(&mut *self.buffer.lock());
    self.listeners.clear();
    self.filters.clear();
    debug!(dropped = dropped.len(), "Message queue cleared");
  }
}

impl Drop for MessageQueue {
  fn drop(&mut self) {
    // May run on the loop thread itself, so never join here
    if let Some(handle) = self.message_loop.get_mut().take() {
      handle.signal();
    }
  }
}

/// Zeroes the in-flight count when a drain cycle ends, even by unwinding
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    self.0.store(0, Ordering::SeqCst);
  }
}

fn log_delivery(envelope: &Envelope) {
  if envelope.is_logged() {
    info!(message_id = envelope.id(), type_tag = envelope.type_tag(), "send {envelope}");
  } else {
    trace!(message_id = envelope.id(), type_tag = envelope.type_tag(), "send {envelope}");
  }
}

fn run_message_loop(queue: Weak<MessageQueue>, cancel: CancellationToken, interval: Duration) {
  debug!("Message loop running");
  loop {
    if cancel.is_cancelled() {
      break;
    }
    let Some(queue) = queue.upgrade() else {
      debug!("Message queue dropped, loop exiting");
      break;
    };
    queue.drain_once();
    drop(queue);

    std::thread::sleep(interval);
  }
}
