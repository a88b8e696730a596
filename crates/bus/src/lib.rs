//! In-process publish/subscribe message bus.
//!
//! Producers dispatch typed messages onto the process-wide [`MessageQueue`];
//! a loop thread drains them in FIFO order through the filter chain to the
//! listeners registered for each message type. Messages may instead be routed
//! as tasks to the [`TaskScheduler`] of their [`RoutingContext`].

pub mod error;
pub mod filter;
pub mod listener;
pub mod message;
pub mod queue;
pub mod routing;
pub mod task;
mod worker;

pub use error::{BusError, Result};
pub use filter::{CoalesceFilter, MessageBuffer, MessageFilter};
pub use listener::{ListenerId, MessageListener};
pub use message::{Envelope, Message, MessageMeta};
pub use queue::MessageQueue;
pub use routing::RoutingContext;
pub use task::{LambdaTask, RepeatTask, SequenceTask, Task, TaskId, TaskManager, TaskScheduler, TaskState};
