use std::fmt;
use std::mem;
use std::str::FromStr;
use std::sync::{Condvar, Mutex, MutexGuard};

use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{QueueError, Result};
#[cfg(unix)]
use crate::store::MirroredStore;
use crate::store::{PlainStore, Store};

pub const HEADER_SIZE: usize = mem::size_of::<FrameHeader>();

/// Metadata written in front of every payload.
///
/// The layout is two native-endian `u64`s, so a writer and a reader sharing a
/// region must come from the same build.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct FrameHeader {
    pub len: u64,
    pub seq: u64,
}

impl FrameHeader {
    pub fn new(len: usize, seq: u64) -> FrameHeader {
        FrameHeader {
            len: len as u64,
            seq,
        }
    }

    #[inline]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buff = [0u8; HEADER_SIZE];
        buff[..8].copy_from_slice(&self.len.to_ne_bytes());
        buff[8..].copy_from_slice(&self.seq.to_ne_bytes());
        buff
    }

    #[inline]
    pub fn decode(buff: &[u8; HEADER_SIZE]) -> FrameHeader {
        let mut len = [0u8; 8];
        let mut seq = [0u8; 8];
        len.copy_from_slice(&buff[..8]);
        seq.copy_from_slice(&buff[8..]);
        FrameHeader {
            len: u64::from_ne_bytes(len),
            seq: u64::from_ne_bytes(seq),
        }
    }

    /// Bytes the frame occupies in the store, header included.
    #[inline]
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.len as usize
    }

    pub(crate) fn read_from<S: Store>(store: &S, offset: usize) -> FrameHeader {
        let mut buff = [0u8; HEADER_SIZE];
        store.read(offset, &mut buff);
        FrameHeader::decode(&buff)
    }

    pub(crate) fn write_to<S: Store>(&self, store: &mut S, offset: usize) {
        store.write(offset, &self.encode());
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[serde(alias = "basic_queue")]
    Plain,
    #[serde(alias = "vm_queue")]
    Mirrored,
}

impl Default for StoreKind {
    fn default() -> Self {
        if cfg!(unix) {
            StoreKind::Mirrored
        } else {
            StoreKind::Plain
        }
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plain" | "basic_queue" => Ok(StoreKind::Plain),
            "mirrored" | "vm_queue" => Ok(StoreKind::Mirrored),
            _ => Err(format!("invalid queue type '{}'", s)),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Plain => write!(f, "plain"),
            StoreKind::Mirrored => write!(f, "mirrored"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub strategy: StoreKind,
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            strategy: StoreKind::default(),
            capacity: 1 << 20,
        }
    }
}

/// Point-in-time view of the queue bookkeeping.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueStats {
    pub capacity: usize,
    pub occupancy: usize,
    pub head: usize,
    pub tail: usize,
    pub head_seq: u64,
    pub tail_seq: u64,
}

impl QueueStats {
    /// Complete frames currently resident.
    pub fn frames(&self) -> u64 {
        self.tail_seq - self.head_seq
    }
}

pub(crate) struct QueueState<S> {
    pub(crate) store: S,
    pub(crate) head: usize,
    pub(crate) tail: usize,
    pub(crate) head_seq: u64,
    pub(crate) tail_seq: u64,
    pub(crate) occupancy: usize,
}

impl<S: Store> QueueState<S> {
    #[inline]
    pub(crate) fn free(&self) -> usize {
        self.store.capacity() - self.occupancy
    }
}

/// Bounded blocking queue of variable-length byte messages.
///
/// One mutex guards every cursor, counter and the store itself. Producers
/// sleep on `space_available` until their frame fits; consumers sleep on
/// `data_available` until a frame is resident, and on `space_available` while
/// the head frame is larger than they can receive.
///
/// Share it between threads with an `Arc`.
pub struct Queue<S: Store> {
    pub(crate) state: Mutex<QueueState<S>>,
    pub(crate) space_available: Condvar,
    pub(crate) data_available: Condvar,
    capacity: usize,
}

impl<S: Store> Queue<S> {
    pub fn new(store: S) -> Result<Queue<S>> {
        let capacity = store.capacity();
        if capacity <= HEADER_SIZE {
            return Err(QueueError::CapacityTooSmall {
                capacity,
                header_size: HEADER_SIZE,
            });
        }
        debug!(capacity, "created queue");
        Ok(Queue {
            state: Mutex::new(QueueState {
                store,
                head: 0,
                tail: 0,
                head_seq: 0,
                tail_seq: 0,
                occupancy: 0,
            }),
            space_available: Condvar::new(),
            data_available: Condvar::new(),
            capacity,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload a single `put` can ever enqueue.
    #[inline]
    pub fn max_message_size(&self) -> usize {
        self.capacity - HEADER_SIZE
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let state = self.lock()?;
        Ok(QueueStats {
            capacity: self.capacity,
            occupancy: state.occupancy,
            head: state.head,
            tail: state.tail,
            head_seq: state.head_seq,
            tail_seq: state.tail_seq,
        })
    }

    /// Releases the queue and its backing region. Same as dropping it.
    pub fn close(self) {
        drop(self)
    }

    #[inline]
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, QueueState<S>>> {
        Ok(self.state.lock()?)
    }
}

impl<S: Store> Drop for Queue<S> {
    fn drop(&mut self) {
        debug!(capacity = self.capacity, "destroying queue");
    }
}

impl Queue<PlainStore> {
    pub fn plain(capacity: usize) -> Result<Queue<PlainStore>> {
        Queue::new(PlainStore::new(capacity)?)
    }
}

#[cfg(unix)]
impl Queue<MirroredStore> {
    pub fn mirrored(capacity: usize) -> Result<Queue<MirroredStore>> {
        // Report a tiny capacity as such rather than as a page misalignment.
        if capacity <= HEADER_SIZE {
            return Err(QueueError::CapacityTooSmall {
                capacity,
                header_size: HEADER_SIZE,
            });
        }
        Queue::new(MirroredStore::new(capacity)?)
    }
}

/// Queue whose backing store was picked from a [`QueueConfig`].
pub enum AnyQueue {
    Plain(Queue<PlainStore>),
    #[cfg(unix)]
    Mirrored(Queue<MirroredStore>),
}

impl AnyQueue {
    pub fn open(cfg: &QueueConfig) -> Result<AnyQueue> {
        match cfg.strategy {
            StoreKind::Plain => Ok(AnyQueue::Plain(Queue::plain(cfg.capacity)?)),
            #[cfg(unix)]
            StoreKind::Mirrored => Ok(AnyQueue::Mirrored(Queue::mirrored(cfg.capacity)?)),
            #[cfg(not(unix))]
            StoreKind::Mirrored => Err(QueueError::Unsupported(
                "the mirrored store needs a unix target",
            )),
        }
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            AnyQueue::Plain(_) => StoreKind::Plain,
            #[cfg(unix)]
            AnyQueue::Mirrored(_) => StoreKind::Mirrored,
        }
    }

    pub fn put(&self, data: &[u8]) -> Result<()> {
        match self {
            AnyQueue::Plain(q) => q.put(data),
            #[cfg(unix)]
            AnyQueue::Mirrored(q) => q.put(data),
        }
    }

    pub fn get(&self, max: usize) -> Result<Vec<u8>> {
        match self {
            AnyQueue::Plain(q) => q.get(max),
            #[cfg(unix)]
            AnyQueue::Mirrored(q) => q.get(max),
        }
    }

    pub fn get_into(&self, buff: &mut [u8]) -> Result<usize> {
        match self {
            AnyQueue::Plain(q) => q.get_into(buff),
            #[cfg(unix)]
            AnyQueue::Mirrored(q) => q.get_into(buff),
        }
    }

    pub fn stats(&self) -> Result<QueueStats> {
        match self {
            AnyQueue::Plain(q) => q.stats(),
            #[cfg(unix)]
            AnyQueue::Mirrored(q) => q.stats(),
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            AnyQueue::Plain(q) => q.capacity(),
            #[cfg(unix)]
            AnyQueue::Mirrored(q) => q.capacity(),
        }
    }
}
