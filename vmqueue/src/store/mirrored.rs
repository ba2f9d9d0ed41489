use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};

use tracing::{debug, warn};

use super::{Store, PAGE_SIZE};
use crate::errors::{QueueError, Result};

/// Shared anonymous region of `capacity` bytes mapped twice, back to back.
///
/// Byte `i` and byte `capacity + i` of the view are the same physical byte, so
/// any frame starting below `capacity` can be read or written with a single
/// copy even when it runs past the physical end. Cursors grow past `capacity`
/// and are rebased once the head does.
///
/// The region is only ever touched under the queue lock, so the raw pointer is
/// never aliased mutably from two threads.
///
/// Although the pages are `MAP_SHARED`, the region is private to this process.
/// The backing descriptor is closed once both halves are mapped, and the
/// cursors and lock live in a process-local [`Queue`](crate::Queue), so no
/// other process can attach to it.
pub struct MirroredStore {
    base: NonNull<u8>,
    capacity: usize,
}

// Access is serialized by the owning queue's mutex.
unsafe impl Send for MirroredStore {}

impl MirroredStore {
    /// Maps a new region. `capacity` must be a non-zero multiple of the page
    /// size.
    pub fn new(capacity: usize) -> Result<MirroredStore> {
        let page_size = *PAGE_SIZE;
        if capacity == 0 || capacity % page_size != 0 {
            return Err(QueueError::Misaligned {
                capacity,
                page_size,
            });
        }
        let view_len = capacity
            .checked_mul(2)
            .ok_or(QueueError::Unsupported("capacity too large to map twice"))?;

        let fd = anonymous_fd(capacity)?;
        let base = unsafe {
            // Reserve the whole view first so the two halves are guaranteed
            // to be adjacent, then replace each half with the shared pages.
            let reserved = libc::mmap(
                ptr::null_mut(),
                view_len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if reserved == libc::MAP_FAILED {
                return Err(QueueError::last_os_error("mmap"));
            }
            for half in 0..2 {
                let addr = (reserved as *mut u8).add(half * capacity);
                let mapped = libc::mmap(
                    addr.cast(),
                    capacity,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_FIXED,
                    fd.as_raw_fd(),
                    0,
                );
                if mapped == libc::MAP_FAILED {
                    let err = QueueError::last_os_error("mmap");
                    libc::munmap(reserved, view_len);
                    return Err(err);
                }
            }
            reserved as *mut u8
        };
        // The mappings keep the pages alive; the descriptor closes here.
        drop(fd);

        debug!(capacity, base = ?base, "mapped mirrored queue region");
        Ok(MirroredStore {
            // mmap never hands back a null mapping on success.
            base: NonNull::new(base).ok_or(QueueError::Unsupported("mmap returned null"))?,
            capacity,
        })
    }

    #[inline]
    fn check_range(&self, offset: usize, len: usize) {
        debug_assert!(
            offset + len <= 2 * self.capacity,
            "access {}+{} outside the mirrored view of {} bytes",
            offset,
            len,
            2 * self.capacity
        );
    }
}

#[cfg(target_os = "linux")]
fn anonymous_fd(size: usize) -> Result<OwnedFd> {
    const NAME: &[u8] = b"vmqueue\0";
    let fd = unsafe {
        let raw = libc::memfd_create(NAME.as_ptr().cast(), libc::MFD_CLOEXEC);
        if raw == -1 {
            return Err(QueueError::last_os_error("memfd_create"));
        }
        OwnedFd::from_raw_fd(raw)
    };
    truncate(&fd, size)?;
    Ok(fd)
}

#[cfg(not(target_os = "linux"))]
fn anonymous_fd(size: usize) -> Result<OwnedFd> {
    use std::ffi::CString;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static REGION_COUNTER: AtomicUsize = AtomicUsize::new(0);
    let name = CString::new(format!(
        "/vmqueue-{}-{}",
        std::process::id(),
        REGION_COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
    .map_err(std::io::Error::from)?;

    let fd = unsafe {
        let raw = libc::shm_open(
            name.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            0o600,
        );
        if raw == -1 {
            return Err(QueueError::last_os_error("shm_open"));
        }
        // Anonymous from here on: only the descriptor refers to the object.
        libc::shm_unlink(name.as_ptr());
        OwnedFd::from_raw_fd(raw)
    };
    truncate(&fd, size)?;
    Ok(fd)
}

fn truncate(fd: &OwnedFd, size: usize) -> Result<()> {
    if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } == -1 {
        return Err(QueueError::last_os_error("ftruncate"));
    }
    Ok(())
}

impl Store for MirroredStore {
    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn advance(&self, cursor: usize, by: usize) -> usize {
        cursor + by
    }

    #[inline]
    fn rebase(&self, head: &mut usize, tail: &mut usize) -> bool {
        if *head < self.capacity {
            return false;
        }
        *head -= self.capacity;
        *tail -= self.capacity;
        true
    }

    fn read(&self, offset: usize, dst: &mut [u8]) {
        self.check_range(offset, dst.len());
        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
    }

    fn write(&mut self, offset: usize, src: &[u8]) {
        self.check_range(offset, src.len());
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.base.as_ptr().add(offset), src.len());
        }
    }
}

impl Drop for MirroredStore {
    fn drop(&mut self) {
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), 2 * self.capacity) };
        if rc == -1 {
            warn!(
                error = %std::io::Error::last_os_error(),
                "failed to unmap mirrored queue region"
            );
        } else {
            debug!(capacity = self.capacity, "unmapped mirrored queue region");
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn both_halves_alias_the_same_pages() -> Result<()> {
        let capacity = *PAGE_SIZE;
        let mut store = MirroredStore::new(capacity)?;

        store.write(1, b"z");
        let mut out = [0u8; 1];
        store.read(capacity + 1, &mut out);
        assert_eq!(&out, b"z");

        store.write(capacity + 7, b"m");
        store.read(7, &mut out);
        assert_eq!(&out, b"m");
        Ok(())
    }

    #[test]
    fn write_across_the_seam_is_contiguous() -> Result<()> {
        let capacity = *PAGE_SIZE;
        let mut store = MirroredStore::new(capacity)?;

        store.write(capacity - 2, b"abcd");
        let mut tail = [0u8; 2];
        store.read(0, &mut tail);
        assert_eq!(&tail, b"cd");

        let mut whole = [0u8; 4];
        store.read(capacity - 2, &mut whole);
        assert_eq!(&whole, b"abcd");
        Ok(())
    }

    #[test]
    fn rejects_capacity_that_is_not_page_aligned() {
        let page = *PAGE_SIZE;
        for capacity in [0, 64, page + 1] {
            match MirroredStore::new(capacity) {
                Err(QueueError::Misaligned { capacity: c, page_size }) => {
                    assert_eq!(c, capacity);
                    assert_eq!(page_size, page);
                }
                Err(e) => panic!("unexpected error for {}: {}", capacity, e),
                Ok(_) => panic!("capacity {} should be rejected", capacity),
            }
        }
    }

    #[test]
    fn rebase_only_once_head_passes_capacity() -> Result<()> {
        let capacity = *PAGE_SIZE;
        let store = MirroredStore::new(capacity)?;

        let (mut head, mut tail) = (capacity - 1, capacity + 10);
        assert!(!store.rebase(&mut head, &mut tail));
        assert_eq!((head, tail), (capacity - 1, capacity + 10));

        let (mut head, mut tail) = (capacity + 3, capacity + 40);
        assert!(store.rebase(&mut head, &mut tail));
        assert_eq!((head, tail), (3, 40));
        Ok(())
    }
}
