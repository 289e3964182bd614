use std::fmt;
use std::mem;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::net::error::SocketError;
use crate::net::select::{self, Readiness};
use crate::net::socket::{DEFAULT_READ_LENGTH, SocketHandle, SocketName};
use crate::server::shutdown::ShutdownHandle;
use crate::server::{PendingErrors, ServerError, ServerState};

/// Stable identifier assigned to a connection when it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-message delivery options a handler may change in `on_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataOptions {
    /// Keep the connection open after this message.
    pub keep_alive: bool,
    /// Also send the reply to every other open connection.
    pub broadcast: bool,
    /// Send the reply back to the connection that produced the message.
    pub reply_to_sender: bool,
}

impl Default for DataOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            broadcast: false,
            reply_to_sender: true,
        }
    }
}

/// Application logic plugged into a [`ReactorServer`].
///
/// All methods run on the server thread, between two readiness waits.
pub trait ConnectionHandler {
    /// Called once per accepted connection. The returned bytes are written to it.
    fn on_accept(&mut self, _id: ConnectionId, _peer: &SocketName) -> Option<Vec<u8>> {
        None
    }

    /// Called for every non-empty read.
    fn on_data(
        &mut self,
        data: &[u8],
        id: ConnectionId,
        peer: &SocketName,
        options: &mut DataOptions,
    ) -> Option<Vec<u8>>;

    /// Called after a connection has been closed and deregistered.
    fn on_close(&mut self, _id: ConnectionId, _peer: &SocketName) {}
}

#[derive(Debug)]
struct Connection {
    id: ConnectionId,
    peer: SocketName,
    socket: SocketHandle,
}

/// Single-threaded readiness-driven TCP server.
///
/// Each pass waits (bounded by the select timeout) on the listener and every
/// tracked connection, services the listener first, then the ready
/// connections in registration order.
#[derive(Debug)]
pub struct ReactorServer {
    listener: Option<SocketHandle>,
    connections: Vec<Connection>,
    errors: PendingErrors,
    state: ServerState,
    next_id: u64,
    shutdown: ShutdownHandle,
    select_timeout: Duration,
    read_size: usize,
}

impl Default for ReactorServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorServer {
    pub fn new() -> Self {
        Self {
            listener: None,
            connections: Vec::new(),
            errors: PendingErrors::default(),
            state: ServerState::Closed,
            next_id: 1,
            shutdown: ShutdownHandle::new(),
            select_timeout: select::DEFAULT_TIMEOUT,
            read_size: DEFAULT_READ_LENGTH,
        }
    }

    pub fn with_select_timeout(mut self, timeout: Duration) -> Self {
        self.select_timeout = timeout;
        self
    }

    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Puts `listener` into listening mode and takes ownership of it.
    pub fn open(&mut self, listener: SocketHandle, backlog: i32) -> Result<(), ServerError> {
        if !self.is_closed() {
            return Err(ServerError::AlreadyOpen);
        }
        // non-blocking so a ready listener can be drained until it would block
        let ready = listener
            .listen(backlog)
            .and_then(|()| listener.set_nonblocking(true));
        if let Err(e) = ready {
            self.reset();
            return Err(ServerError::Unavailable(e));
        }
        if let Ok(fd) = listener.raw_fd() {
            self.shutdown.register(fd);
        }
        if let Ok(name) = listener.local_name() {
            info!(addr = %name, "reactor server listening");
        }

        self.listener = Some(listener);
        self.errors.clear();
        self.state = ServerState::Open;
        Ok(())
    }

    /// Runs passes until the server is closed or shutdown is requested, then closes it.
    pub fn handle<H: ConnectionHandler>(&mut self, handler: &mut H) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::NotOpen);
        }

        let mut result = Ok(());
        while !self.is_closed() && !self.shutdown.is_requested() {
            if let Err(e) = self.run_once(handler) {
                result = Err(e);
                break;
            }
        }

        // errors queued by the loop stay readable through `pop_last_error`
        self.release();
        result
    }

    /// Performs exactly one readiness wait and services whatever became ready.
    ///
    /// Connection and accept failures are queued. Only the loss of the
    /// listener is returned, since the server cannot continue without it.
    pub fn run_once<H: ConnectionHandler>(&mut self, handler: &mut H) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::NotOpen);
        }

        let readiness = match self.wait() {
            Ok(readiness) => readiness,
            Err(e) if e.is_retryable() => {
                trace!(error = %e.to_log_string(), "readiness wait interrupted");
                return Ok(());
            }
            Err(e) if self.listener.as_ref().is_none_or(SocketHandle::is_closed) => {
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, "readiness wait failed");
                self.errors.push(e.into());
                return Ok(());
            }
        };

        if readiness.is_empty() {
            return Ok(());
        }

        // candidates were [listener, connections...]
        let tracked = self.connections.len();
        if readiness.is_readable(0) {
            self.accept_pending(handler);
        }
        for index in 0..tracked {
            if readiness.is_readable(index + 1) {
                self.service(index, handler);
            }
        }

        self.remove_closed(handler);
        Ok(())
    }

    fn wait(&self) -> Result<Readiness, SocketError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or(SocketError::Closed { op: "select" })?;

        let mut candidates = Vec::with_capacity(self.connections.len() + 1);
        candidates.push(listener);
        candidates.extend(self.connections.iter().map(|conn| &conn.socket));

        select::select(&candidates, &[], &[], Some(self.select_timeout))
    }

    /// Accepts every pending connection. The listener is non-blocking, so the
    /// drain ends on a retryable error once the backlog is empty.
    fn accept_pending<H: ConnectionHandler>(&mut self, handler: &mut H) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };

            match listener.accept() {
                Ok(socket) => self.register(socket, handler),
                Err(e) if e.is_retryable() => {
                    trace!(error = %e.to_log_string(), "no more pending connections");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    self.errors.push(e.into());
                    return;
                }
            }
        }
    }

    fn register<H: ConnectionHandler>(&mut self, socket: SocketHandle, handler: &mut H) {
        // some platforms copy O_NONBLOCK from the listener
        if let Err(e) = socket.set_nonblocking(false) {
            warn!(error = %e, "dropping connection that cannot block");
            self.errors.push(e.into());
            return;
        }

        let peer = match socket.peer_name() {
            Ok(peer) => peer,
            Err(e) => {
                warn!(error = %e, "dropping connection without peer name");
                self.errors.push(e.into());
                return;
            }
        };

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        info!(conn = %id, peer = %peer, "connection accepted");

        let mut conn = Connection { id, peer, socket };
        if let Some(greeting) = handler.on_accept(id, &peer) {
            if let Err(e) = conn.socket.write(&greeting) {
                conn.socket.close();
                self.errors.push(ServerError::Connection { conn: id, source: e });
            }
        }
        self.connections.push(conn);
    }

    fn service<H: ConnectionHandler>(&mut self, index: usize, handler: &mut H) {
        let conn = &mut self.connections[index];
        // a failed broadcast earlier in this pass may already have closed it
        if conn.socket.is_closed() {
            return;
        }

        let data = match conn.socket.read(self.read_size) {
            Ok(data) => data,
            Err(e) if e.is_retryable() => return,
            Err(e) => {
                warn!(conn = %conn.id, error = %e, "read failed");
                conn.socket.close();
                self.errors.push(ServerError::Connection { conn: conn.id, source: e });
                return;
            }
        };

        if data.is_empty() {
            debug!(conn = %conn.id, peer = %conn.peer, "peer closed connection");
            conn.socket.close();
            return;
        }

        let (id, peer) = (conn.id, conn.peer);
        let mut options = DataOptions::default();
        let reply = handler.on_data(&data, id, &peer, &mut options);

        if let Some(payload) = reply {
            if options.reply_to_sender {
                self.send(index, &payload);
            }
            if options.broadcast {
                self.broadcast(index, &payload);
            }
        }

        if !options.keep_alive {
            debug!(conn = %id, "closing connection on handler request");
            self.connections[index].socket.close();
        }
    }

    fn send(&mut self, index: usize, payload: &[u8]) {
        let conn = &mut self.connections[index];
        if conn.socket.is_closed() {
            return;
        }
        if let Err(e) = conn.socket.write(payload) {
            warn!(conn = %conn.id, error = %e, "write failed");
            conn.socket.close();
            self.errors.push(ServerError::Connection { conn: conn.id, source: e });
        }
    }

    fn broadcast(&mut self, sender: usize, payload: &[u8]) {
        for index in 0..self.connections.len() {
            if index != sender {
                self.send(index, payload);
            }
        }
    }

    fn remove_closed<H: ConnectionHandler>(&mut self, handler: &mut H) {
        if self.connections.iter().all(|conn| !conn.socket.is_closed()) {
            return;
        }

        let (closed, open): (Vec<_>, Vec<_>) = mem::take(&mut self.connections)
            .into_iter()
            .partition(|conn| conn.socket.is_closed());
        self.connections = open;

        for conn in closed {
            debug!(conn = %conn.id, "connection deregistered");
            handler.on_close(conn.id, &conn.peer);
        }
    }

    /// Closes every tracked connection and the listener, and drops queued
    /// errors. Safe to call twice.
    pub fn close(&mut self) {
        self.release();
        self.errors.clear();
    }

    fn release(&mut self) {
        self.shutdown.unregister();
        for conn in &mut self.connections {
            conn.socket.close();
        }
        if let Some(mut listener) = self.listener.take() {
            listener.close();
            info!("reactor server closed");
        }
        self.connections.clear();
        self.state = ServerState::Closed;
    }

    fn reset(&mut self) {
        self.listener = None;
        self.connections.clear();
        self.errors.clear();
        self.state = ServerState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == ServerState::Closed
    }

    pub fn local_name(&self) -> Result<SocketName, ServerError> {
        let listener = self.listener.as_ref().ok_or(ServerError::NotOpen)?;
        Ok(listener.local_name()?)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Ids of the tracked connections, in registration order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|conn| conn.id).collect()
    }

    pub fn pop_last_error(&mut self) -> Option<ServerError> {
        self.errors.pop_last()
    }

    pub fn errors(&self) -> &PendingErrors {
        &self.errors
    }
}

impl Drop for ReactorServer {
    fn drop(&mut self) {
        self.close();
    }
}
