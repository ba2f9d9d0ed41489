use std::{fmt, io};

#[derive(Debug)]
pub enum QueueError {
    /// The backing region cannot hold even an empty-body frame.
    CapacityTooSmall { capacity: usize, header_size: usize },
    /// The mirrored store needs a whole number of pages.
    Misaligned { capacity: usize, page_size: usize },
    /// An OS call used to set up the backing region failed.
    Os { call: &'static str, source: io::Error },
    /// The payload would not fit even into an empty queue.
    MessageTooLarge { len: usize, max: usize },
    Unsupported(&'static str),
    PoisonedLock,
    Io(io::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

impl QueueError {
    pub(crate) fn last_os_error(call: &'static str) -> QueueError {
        QueueError::Os {
            call,
            source: io::Error::last_os_error(),
        }
    }
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::CapacityTooSmall { capacity, header_size } => write!(
                f,
                "queue capacity of {} bytes is too small, more than {} bytes are needed",
                capacity, header_size
            ),
            QueueError::Misaligned { capacity, page_size } => write!(
                f,
                "queue capacity of {} bytes is not a multiple of the page size ({} bytes)",
                capacity, page_size
            ),
            QueueError::Os { call, source } => write!(f, "{} failed: {}", call, source),
            QueueError::MessageTooLarge { len, max } => write!(
                f,
                "message of {} bytes exceeds the largest message the queue can hold ({} bytes)",
                len, max
            ),
            QueueError::Unsupported(s) => write!(f, "Unsupported: {}", s),
            QueueError::PoisonedLock => write!(f, "Mutex was poisoned"),
            QueueError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::Os { source, .. } => Some(source),
            QueueError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for QueueError {
    fn from(err: io::Error) -> Self {
        QueueError::Io(err)
    }
}

// A panic while the queue lock was held leaves the cursors in an unknown state.
impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        QueueError::PoisonedLock
    }
}
