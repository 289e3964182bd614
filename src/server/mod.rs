//! TCP servers built on [`SocketHandle`](crate::net::SocketHandle).
//!
//! Two concurrency models are provided and never mixed in one server:
//!
//! - **`reactor`**: one thread, one readiness wait over the listener and every
//!   open connection, application logic supplied through [`ConnectionHandler`]
//! - **`forking`**: a blocking accept loop that hands each connection to an
//!   isolated worker (a forked process or a thread) implementing [`ConnectionWorker`]
//!
//! Both servers share the same lifecycle:
//!
//! ```text
//!   ┌────────┐  open(listener)  ┌────────┐
//!   │ Closed │ ───────────────▶ │  Open  │ ──┐ handle(): accept / dispatch
//!   └────────┘                  └────────┘ ◀─┘ errors are queued, loop goes on
//!        ▲                          │
//!        └──── close() / shutdown ──┘
//! ```
//!
//! Failures inside the loop never stop it; they are appended to a
//! [`PendingErrors`] queue that the caller drains with `pop_last_error`.

pub mod forking;
pub mod listener;
pub mod reactor;
pub mod shutdown;

use thiserror::Error;

use crate::net::error::SocketError;

pub use forking::{ConnectionWorker, ForkingServer, Isolation};
pub use reactor::{ConnectionHandler, ConnectionId, DataOptions, ReactorServer};
pub use shutdown::ShutdownHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Closed,
    Open,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is not open")]
    NotOpen,

    #[error("server is already open")]
    AlreadyOpen,

    #[error("unavailable listener: {0}")]
    Unavailable(#[source] SocketError),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("connection {conn}: {source}")]
    Connection {
        conn: ConnectionId,
        #[source]
        source: SocketError,
    },

    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("worker failed: {0:#}")]
    Worker(anyhow::Error),
}

/// Ordered queue of errors observed while a server loop was running.
#[derive(Debug, Default)]
pub struct PendingErrors {
    errors: Vec<ServerError>,
}

impl PendingErrors {
    pub fn push(&mut self, error: ServerError) {
        self.errors.push(error);
    }

    /// Removes and returns the most recent error.
    pub fn pop_last(&mut self) -> Option<ServerError> {
        self.errors.pop()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerError> {
        self.errors.iter()
    }
}
