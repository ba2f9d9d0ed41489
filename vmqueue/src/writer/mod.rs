use tracing::trace;

use crate::core::{FrameHeader, Queue, HEADER_SIZE};
use crate::errors::{QueueError, Result};
use crate::store::Store;

impl<S: Store> Queue<S> {
    /// Enqueues `data` as one frame, blocking until the whole frame fits.
    ///
    /// A payload larger than [`max_message_size`](Queue::max_message_size)
    /// could never fit and is rejected instead of blocking forever.
    pub fn put(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_message_size() {
            return Err(QueueError::MessageTooLarge {
                len: data.len(),
                max: self.max_message_size(),
            });
        }
        let frame_size = HEADER_SIZE + data.len();

        let mut guard = self.lock()?;
        while guard.free() < frame_size {
            guard = self.space_available.wait(guard)?;
        }

        let state = &mut *guard;
        let header = FrameHeader::new(data.len(), state.tail_seq);
        state.tail_seq += 1;
        header.write_to(&mut state.store, state.tail);
        state.store.write(state.tail + HEADER_SIZE, data);
        state.tail = state.store.advance(state.tail, frame_size);
        state.occupancy += frame_size;
        debug_assert!(state.occupancy <= state.store.capacity());
        trace!(seq = header.seq, len = data.len(), tail = state.tail, "put");

        self.data_available.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn put_advances_tail_and_occupancy() -> Result<()> {
        let queue = Queue::plain(64)?;
        queue.put(&[1u8; 10])?;
        let stats = queue.stats()?;
        assert_eq!(stats.tail, 26);
        assert_eq!(stats.occupancy, 26);
        assert_eq!(stats.tail_seq, 1);
        assert_eq!(stats.head_seq, 0);
        assert_eq!(stats.frames(), 1);
        Ok(())
    }

    #[test]
    fn empty_payload_still_takes_a_header() -> Result<()> {
        let queue = Queue::plain(HEADER_SIZE + 1)?;
        queue.put(&[])?;
        assert_eq!(queue.stats()?.occupancy, HEADER_SIZE);
        Ok(())
    }

    #[test]
    fn rejects_payload_that_can_never_fit() -> Result<()> {
        let queue = Queue::plain(64)?;
        match queue.put(&[0u8; 49]) {
            Err(QueueError::MessageTooLarge { len, max }) => {
                assert_eq!(len, 49);
                assert_eq!(max, 48);
            }
            other => panic!("expected MessageTooLarge, got {:?}", other),
        }
        // The largest payload fills the queue exactly.
        queue.put(&[0u8; 48])?;
        assert_eq!(queue.stats()?.occupancy, 64);
        Ok(())
    }

    #[test]
    fn put_blocks_until_a_get_frees_space() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let queue = Arc::new(Queue::plain(64)?);
        queue.put(&[7u8; 30])?; // 46 of 64 bytes used

        let done = Arc::new(AtomicBool::new(false));
        let producer = thread::spawn({
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            move || {
                queue.put(&[8u8; 10]).expect("blocked put failed");
                done.store(true, Ordering::SeqCst);
            }
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst), "put returned without space");
        assert!(queue.stats()?.occupancy <= 64);

        assert_eq!(queue.get(64)?, vec![7u8; 30]);
        producer.join().expect("producer panicked");
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(queue.get(64)?, vec![8u8; 10]);
        Ok(())
    }
}
