use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Errors raised by socket operations.
///
/// Every variant carries the name of the operation that failed so log lines
/// read as `accept failed: [11] Resource temporarily unavailable`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// The handle was already closed when `op` was attempted.
    #[error("{op} failed: socket is closed")]
    Closed { op: &'static str },

    /// The operating system rejected the call.
    #[error("{op} failed: [{code}] {message}")]
    Os {
        op: &'static str,
        code: i32,
        message: String,
    },

    /// A write made no progress, the peer is not draining its buffer.
    #[error("{op} failed: zero bytes written")]
    Stalled { op: &'static str },
}

impl SocketError {
    /// Builds an error from a raw `errno` value.
    pub fn from_code(op: &'static str, code: i32) -> Self {
        let message = if code == 0 {
            "Success".to_string()
        } else {
            Errno::from_raw(code).desc().to_string()
        };
        SocketError::Os { op, code, message }
    }

    /// Builds an error from the current thread's `errno`.
    pub fn last_os_error(op: &'static str) -> Self {
        Self::from_io(op, io::Error::last_os_error())
    }

    pub fn from_io(op: &'static str, err: io::Error) -> Self {
        let code = err.raw_os_error().unwrap_or(match err.kind() {
            io::ErrorKind::Interrupted => libc::EINTR,
            io::ErrorKind::WouldBlock => libc::EAGAIN,
            _ => libc::EIO,
        });
        Self::from_code(op, code)
    }

    /// The OS error code, `None` for errors that did not come from the OS.
    pub fn code(&self) -> Option<i32> {
        match self {
            SocketError::Os { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            SocketError::Closed { op } | SocketError::Stalled { op } => op,
            SocketError::Os { op, .. } => op,
        }
    }

    /// True when the caller should re-poll instead of abandoning the operation.
    pub fn is_retryable(&self) -> bool {
        self.code().is_some_and(is_retryable_code)
    }

    /// True for the benign zero code some calls surface on success.
    pub fn is_not_error(&self) -> bool {
        self.code() == Some(0)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SocketError::Closed { .. })
    }

    /// Compact `[code] message` form used in log fields.
    pub fn to_log_string(&self) -> String {
        match self {
            SocketError::Os { code, message, .. } => format!("[{code}] {message}"),
            SocketError::Closed { .. } => "[-] socket is closed".to_string(),
            SocketError::Stalled { .. } => "[-] zero bytes written".to_string(),
        }
    }
}

/// Interrupted, would-block and try-again are transient; everything else is terminal.
pub fn is_retryable_code(code: i32) -> bool {
    code == libc::EINTR || code == libc::EAGAIN || code == libc::EWOULDBLOCK
}
