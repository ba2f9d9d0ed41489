use tracing::trace;

use crate::core::{FrameHeader, Queue, HEADER_SIZE};
use crate::errors::Result;
use crate::store::Store;

impl<S: Store> Queue<S> {
    /// Dequeues the next message of at most `max` bytes.
    ///
    /// Blocks while the queue is empty. If the frame at the head is longer
    /// than `max`, the caller waits for a consumer with a larger limit to take
    /// it and then looks at the new head; frames are never skipped or
    /// reordered.
    pub fn get(&self, max: usize) -> Result<Vec<u8>> {
        self.consume(max, |store, offset, len| {
            let mut message = vec![0u8; len];
            store.read(offset, &mut message);
            message
        })
    }

    /// Like [`get`](Queue::get), receiving into `buff` with
    /// `max = buff.len()`. Returns the message length.
    pub fn get_into(&self, buff: &mut [u8]) -> Result<usize> {
        let max = buff.len();
        self.consume(max, |store, offset, len| {
            store.read(offset, &mut buff[..len]);
            len
        })
    }

    /// Waits for a head frame of at most `max` payload bytes, hands its payload
    /// location to `copy_out` and then releases the frame.
    fn consume<R, F>(&self, max: usize, copy_out: F) -> Result<R>
    where
        F: FnOnce(&S, usize, usize) -> R,
    {
        let mut guard = self.lock()?;
        let header = loop {
            while guard.occupancy == 0 {
                guard = self.data_available.wait(guard)?;
            }

            let header = FrameHeader::read_from(&guard.store, guard.head);
            debug_assert_eq!(header.seq, guard.head_seq);
            if header.len <= max as u64 {
                break header;
            }

            trace!(seq = header.seq, len = header.len, max, "head frame too large, deferring");
            // Whoever woke us for this frame may have been the only consumer
            // able to take it; pass the wakeup on before going to sleep.
            self.data_available.notify_one();
            while guard.head_seq == header.seq {
                guard = self.space_available.wait(guard)?;
            }
        };

        let state = &mut *guard;
        let len = header.len as usize;
        let result = copy_out(&state.store, state.head + HEADER_SIZE, len);

        state.head = state.store.advance(state.head, header.frame_size());
        state.occupancy -= header.frame_size();
        state.head_seq += 1;
        if state.store.rebase(&mut state.head, &mut state.tail) {
            trace!(head = state.head, tail = state.tail, "rebased cursors");
        }
        trace!(seq = header.seq, len, head = state.head, "get");

        // Producers and deferred consumers share this condition and each of
        // them needs to re-check after any head movement.
        self.space_available.notify_all();
        Ok(result)
    }
}
