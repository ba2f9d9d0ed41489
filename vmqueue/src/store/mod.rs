//! Backing stores for the queue.
//!
//! A store owns the fixed-capacity byte region frames live in and knows how
//! logical cursors map onto it. [`PlainStore`] keeps cursors inside
//! `[0, capacity)` and splits accesses that cross the end of the buffer.
//! [`MirroredStore`] maps the same pages twice back to back, so every access
//! is one contiguous copy and cursors only need an occasional rebase.

use once_cell::sync::Lazy;
use tracing::warn;

mod plain;
#[cfg(unix)]
mod mirrored;

pub use plain::PlainStore;
#[cfg(unix)]
pub use mirrored::MirroredStore;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Size in bytes of a virtual memory page on this host.
pub static PAGE_SIZE: Lazy<usize> = Lazy::new(read_page_size);

#[cfg(unix)]
fn read_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    checked_page_size(size as i64, std::io::Error::last_os_error)
}

#[cfg(not(unix))]
fn read_page_size() -> usize {
    FALLBACK_PAGE_SIZE
}

/// Accepts what `sysconf(_SC_PAGESIZE)` returned, falling back to 4 KiB with a
/// warning when the call failed.
#[cfg_attr(not(unix), allow(dead_code))]
fn checked_page_size(size: i64, os_error: impl FnOnce() -> std::io::Error) -> usize {
    if size > 0 {
        return size as usize;
    }
    warn!(
        call = "sysconf",
        error = %os_error(),
        fallback = FALLBACK_PAGE_SIZE,
        "could not read the page size"
    );
    FALLBACK_PAGE_SIZE
}

/// Byte region plus the cursor arithmetic that goes with it.
///
/// All methods are called with the queue lock held. Offsets passed to
/// [`read`](Store::read) and [`write`](Store::write) are logical: they may lie
/// past `capacity` and the store resolves them to physical bytes.
pub trait Store: Send {
    fn capacity(&self) -> usize;

    /// Moves a cursor forward by `by` bytes.
    fn advance(&self, cursor: usize, by: usize) -> usize;

    /// Pulls both cursors back into range once the head has run past the
    /// physical end. Returns true when the cursors were changed.
    fn rebase(&self, head: &mut usize, tail: &mut usize) -> bool;

    fn read(&self, offset: usize, dst: &mut [u8]);

    fn write(&mut self, offset: usize, src: &[u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(PAGE_SIZE.is_power_of_two());
    }

    #[test]
    fn failed_page_size_query_falls_back() {
        assert_eq!(checked_page_size(16384, || unreachable!()), 16384);

        let error = || std::io::Error::new(std::io::ErrorKind::Other, "sysconf failed");
        assert_eq!(checked_page_size(-1, error), FALLBACK_PAGE_SIZE);
        assert_eq!(checked_page_size(0, error), FALLBACK_PAGE_SIZE);
    }
}
