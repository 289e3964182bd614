use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

/// Cloneable request to stop a running server.
///
/// `request()` raises a flag that server loops check between iterations and
/// shuts down the registered listener so a blocked `accept` returns at once.
///
/// The flag stays raised until [`reset`](Self::reset): a request made before
/// a server is opened still stops it, and a server reopened with the same
/// handle returns from `handle()` immediately unless the handle was reset.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    // guarded so the descriptor cannot be closed and reused while being shut down
    listener: Mutex<Option<RawFd>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Repeated calls are no-ops.
    pub fn request(&self) {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(fd) = *self.listener() {
            debug!(fd, "shutting down listener");
            unsafe {
                libc::shutdown(fd, libc::SHUT_RDWR);
            }
        }
    }

    /// Clears a previous request so the handle can drive another server run.
    pub fn reset(&self) {
        self.inner.requested.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn register(&self, fd: RawFd) {
        *self.listener() = Some(fd);
    }

    /// Must run before the registered descriptor is closed.
    pub(crate) fn unregister(&self) {
        self.listener().take();
    }

    fn listener(&self) -> MutexGuard<'_, Option<RawFd>> {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
