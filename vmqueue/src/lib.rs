//! Bounded blocking queue of variable-length byte messages.
//!
//! Producers block in [`Queue::put`] while the backing region is full and
//! consumers block in [`Queue::get`] while it is empty. A consumer whose limit
//! is smaller than the message at the head waits for another consumer to take
//! it, so messages are never truncated, dropped or reordered.
//!
//! The region is either a [`PlainStore`](store::PlainStore) with modulo
//! cursors or, on unix, a [`MirroredStore`](store::MirroredStore) mapped twice
//! so that no frame ever needs a split copy.

mod core;
mod errors;
mod reader;
pub mod store;
mod writer;

#[cfg(test)]
mod tests;

pub use crate::core::{AnyQueue, FrameHeader, Queue, QueueConfig, QueueStats, StoreKind, HEADER_SIZE};
pub use crate::errors::{QueueError, Result};
