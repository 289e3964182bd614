//! Readiness wait over a set of socket handles.
//!
//! The wait never rewrites its arguments. Results come back as indices into the
//! slices that were passed in, so a caller can map a ready descriptor back to
//! its handle without any aliasing between distinct handles.

use std::time::Duration;

use crate::net::error::SocketError;
use crate::net::socket::SocketHandle;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR;
const WRITE_EVENTS: libc::c_short = libc::POLLOUT | libc::POLLHUP | libc::POLLERR;
const EXCEPT_EVENTS: libc::c_short = libc::POLLPRI;

/// Handles that became ready, as positions in the caller's candidate slices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    pub read: Vec<usize>,
    pub write: Vec<usize>,
    pub except: Vec<usize>,
}

impl Readiness {
    /// Number of ready handles across all three sets.
    pub fn count(&self) -> usize {
        self.read.len() + self.write.len() + self.except.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_readable(&self, index: usize) -> bool {
        self.read.contains(&index)
    }
}

#[derive(Clone, Copy)]
enum Interest {
    Read,
    Write,
    Except,
}

impl Interest {
    fn requested(self) -> libc::c_short {
        match self {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
            Interest::Except => libc::POLLPRI,
        }
    }

    fn ready(self, revents: libc::c_short) -> bool {
        let mask = match self {
            Interest::Read => READ_EVENTS,
            Interest::Write => WRITE_EVENTS,
            Interest::Except => EXCEPT_EVENTS,
        };
        revents & mask != 0
    }
}

/// Waits until at least one candidate is ready or `timeout` elapses.
///
/// `Some(Duration::ZERO)` polls without blocking, `None` waits indefinitely.
/// A closed handle in any set fails the whole call.
pub fn select(
    read: &[&SocketHandle],
    write: &[&SocketHandle],
    except: &[&SocketHandle],
    timeout: Option<Duration>,
) -> Result<Readiness, SocketError> {
    let mut slots = Vec::with_capacity(read.len() + write.len() + except.len());
    let mut fds = Vec::with_capacity(slots.capacity());

    for (interest, handles) in [
        (Interest::Read, read),
        (Interest::Write, write),
        (Interest::Except, except),
    ] {
        for (index, handle) in handles.iter().enumerate() {
            let fd = handle.raw_fd().map_err(|_| SocketError::Closed { op: "select" })?;
            fds.push(libc::pollfd {
                fd,
                events: interest.requested(),
                revents: 0,
            });
            slots.push((interest, index));
        }
    }

    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_millis(timeout)) };
    if rc < 0 {
        return Err(SocketError::last_os_error("select"));
    }

    let mut readiness = Readiness::default();
    if rc == 0 {
        return Ok(readiness);
    }

    for (pollfd, (interest, index)) in fds.iter().zip(slots) {
        if pollfd.revents & libc::POLLNVAL != 0 {
            return Err(SocketError::from_code("select", libc::EBADF));
        }
        if !interest.ready(pollfd.revents) {
            continue;
        }
        match interest {
            Interest::Read => readiness.read.push(index),
            Interest::Write => readiness.write.push(index),
            Interest::Except => readiness.except.push(index),
        }
    }

    Ok(readiness)
}

fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) if t.is_zero() => 0,
        // round up so a sub-millisecond wait does not degrade into a busy poll
        Some(t) => t
            .as_nanos()
            .div_ceil(1_000_000)
            .min(libc::c_int::MAX as u128) as libc::c_int,
    }
}
