use std::cmp;

use super::Store;
use crate::errors::{QueueError, Result};

/// Heap buffer with modulo cursor arithmetic.
///
/// Portable fallback for targets without the double mapping. Accesses that
/// run past the physical end are split into two copies.
pub struct PlainStore {
    data: Box<[u8]>,
}

impl PlainStore {
    /// Allocates a zeroed buffer. An empty buffer has no cursor arithmetic,
    /// so `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Result<PlainStore> {
        if capacity == 0 {
            return Err(QueueError::CapacityTooSmall {
                capacity,
                header_size: crate::HEADER_SIZE,
            });
        }
        Ok(PlainStore {
            data: vec![0u8; capacity].into_boxed_slice(),
        })
    }

    /// Splits an access of `len` bytes at `offset` into the part before the
    /// physical end and the part that wraps to the start.
    #[inline]
    fn split(&self, offset: usize, len: usize) -> (usize, usize, usize) {
        let capacity = self.data.len();
        let start = offset % capacity;
        let first = cmp::min(len, capacity - start);
        (start, first, len - first)
    }
}

impl Store for PlainStore {
    #[inline]
    fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn advance(&self, cursor: usize, by: usize) -> usize {
        (cursor + by) % self.data.len()
    }

    #[inline]
    fn rebase(&self, _head: &mut usize, _tail: &mut usize) -> bool {
        false
    }

    fn read(&self, offset: usize, dst: &mut [u8]) {
        let (start, first, rest) = self.split(offset, dst.len());
        dst[..first].copy_from_slice(&self.data[start..start + first]);
        dst[first..].copy_from_slice(&self.data[..rest]);
    }

    fn write(&mut self, offset: usize, src: &[u8]) {
        let (start, first, rest) = self.split(offset, src.len());
        self.data[start..start + first].copy_from_slice(&src[..first]);
        self.data[..rest].copy_from_slice(&src[first..]);
    }
}
