use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use nix::unistd::{ForkResult, fork};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::net::socket::{SocketHandle, SocketName};
use crate::server::shutdown::ShutdownHandle;
use crate::server::{PendingErrors, ServerError, ServerState};

/// How an accepted connection is isolated from the acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// A forked child process owns the connection.
    #[default]
    Process,
    /// A dedicated OS thread owns the connection.
    Thread,
}

/// Work done for one accepted connection, in isolation.
///
/// The worker owns the client exclusively; dropping it closes the connection.
pub trait ConnectionWorker: Send + Sync + 'static {
    fn on_accept(&self, client: SocketHandle) -> anyhow::Result<()>;
}

impl<F> ConnectionWorker for F
where
    F: Fn(SocketHandle) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_accept(&self, client: SocketHandle) -> anyhow::Result<()> {
        self(client)
    }
}

/// Blocking accept loop with one isolated worker per connection.
#[derive(Debug)]
pub struct ForkingServer {
    listener: Option<SocketHandle>,
    errors: PendingErrors,
    state: ServerState,
    isolation: Isolation,
    shutdown: ShutdownHandle,
    worker_tx: Sender<ServerError>,
    worker_rx: Receiver<ServerError>,
    dispatched: u64,
}

impl Default for ForkingServer {
    fn default() -> Self {
        Self::new(Isolation::default())
    }
}

impl ForkingServer {
    pub fn new(isolation: Isolation) -> Self {
        let (worker_tx, worker_rx) = mpsc::channel();
        Self {
            listener: None,
            errors: PendingErrors::default(),
            state: ServerState::Closed,
            isolation,
            shutdown: ShutdownHandle::new(),
            worker_tx,
            worker_rx,
            dispatched: 0,
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    pub fn open(&mut self, listener: SocketHandle, backlog: i32) -> Result<(), ServerError> {
        if !self.is_closed() {
            return Err(ServerError::AlreadyOpen);
        }
        if let Err(e) = listener.listen(backlog) {
            self.reset();
            return Err(ServerError::Unavailable(e));
        }
        if let Ok(fd) = listener.raw_fd() {
            self.shutdown.register(fd);
        }
        if let Ok(name) = listener.local_name() {
            info!(addr = %name, isolation = ?self.isolation, "forking server listening");
        }

        self.listener = Some(listener);
        self.errors.clear();
        self.state = ServerState::Open;
        Ok(())
    }

    /// Accepts and dispatches connections until closed or shutdown is requested.
    pub fn handle<W: ConnectionWorker>(&mut self, worker: W) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::NotOpen);
        }

        let worker = Arc::new(worker);
        let mut result = Ok(());
        while !self.is_closed() && !self.shutdown.is_requested() {
            if let Err(e) = self.accept_once(&worker) {
                result = Err(e);
                break;
            }
        }

        // errors queued by the loop stay readable through `pop_last_error`
        self.release();
        result
    }

    /// One blocking accept. Returns whether a connection was handed to a worker.
    ///
    /// Retryable accept errors are swallowed, other accept and spawn failures
    /// are queued. Only a missing listener is returned.
    pub fn accept_once<W: ConnectionWorker>(&mut self, worker: &Arc<W>) -> Result<bool, ServerError> {
        self.collect_worker_errors();

        let listener = self.listener.as_ref().ok_or(ServerError::NotOpen)?;
        let client = match listener.accept() {
            Ok(client) => client,
            Err(_) if self.shutdown.is_requested() => return Ok(false),
            Err(e) if e.is_retryable() => return Ok(false),
            Err(e) => {
                warn!(error = %e, "accept failed");
                self.errors.push(e.into());
                return Ok(false);
            }
        };

        let peer = client.peer_name().ok();
        self.dispatched += 1;
        let result = match self.isolation {
            Isolation::Process => self.fork_worker(client, peer, Arc::as_ref(worker)),
            Isolation::Thread => self.thread_worker(client, peer, Arc::clone(worker)),
        };

        if let Err(e) = result {
            error!(error = %e, "failed to dispatch connection");
            self.errors.push(e);
            return Ok(false);
        }
        Ok(true)
    }

    fn fork_worker<W: ConnectionWorker>(
        &mut self,
        client: SocketHandle,
        peer: Option<SocketName>,
        worker: &W,
    ) -> Result<(), ServerError> {
        // SAFETY: the child only runs the worker on its own copies of the
        // descriptors and exits without returning into the accept loop.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                // the child must not keep the listening socket open
                if let Some(mut listener) = self.listener.take() {
                    listener.close();
                }
                // a panic must end the child here, never unwind into its copy of the accept loop
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.on_accept(client)));
                let status = match outcome {
                    Ok(Ok(())) => 0,
                    Ok(Err(e)) => {
                        error!(peer = ?peer, error = %format!("{e:#}"), "worker failed");
                        1
                    }
                    Err(_) => {
                        error!(peer = ?peer, "worker panicked");
                        1
                    }
                };
                std::process::exit(status);
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = child.as_raw(), peer = ?peer, "handling connection in child process");
                drop(client);
                Ok(())
            }
            Err(errno) => Err(ServerError::Spawn(errno.to_string())),
        }
    }

    fn thread_worker<W: ConnectionWorker>(
        &mut self,
        client: SocketHandle,
        peer: Option<SocketName>,
        worker: Arc<W>,
    ) -> Result<(), ServerError> {
        let errors = self.worker_tx.clone();
        thread::Builder::new()
            .name(format!("worker-{}", self.dispatched))
            .spawn(move || {
                if let Err(e) = worker.on_accept(client) {
                    error!(peer = ?peer, error = %format!("{e:#}"), "worker failed");
                    let _ = errors.send(ServerError::Worker(e));
                }
            })
            .map_err(|e| ServerError::Spawn(e.to_string()))?;

        debug!(peer = ?peer, "handling connection in worker thread");
        Ok(())
    }

    fn collect_worker_errors(&mut self) {
        while let Ok(e) = self.worker_rx.try_recv() {
            self.errors.push(e);
        }
    }

    /// Closes the listener and drops queued errors. Safe to call twice.
    pub fn close(&mut self) {
        self.release();
        self.reset();
    }

    fn release(&mut self) {
        self.shutdown.unregister();
        if let Some(mut listener) = self.listener.take() {
            listener.close();
            info!("forking server closed");
        }
        self.state = ServerState::Closed;
    }

    fn reset(&mut self) {
        self.listener = None;
        self.errors.clear();
        while self.worker_rx.try_recv().is_ok() {}
        self.state = ServerState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == ServerState::Closed
    }

    pub fn local_name(&self) -> Result<SocketName, ServerError> {
        let listener = self.listener.as_ref().ok_or(ServerError::NotOpen)?;
        Ok(listener.local_name()?)
    }

    /// Connections handed to workers since the server was created.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Most recent queued error, including failures reported by worker threads.
    pub fn pop_last_error(&mut self) -> Option<ServerError> {
        self.collect_worker_errors();
        self.errors.pop_last()
    }

    pub fn error_count(&mut self) -> usize {
        self.collect_worker_errors();
        self.errors.len()
    }
}

impl Drop for ForkingServer {
    fn drop(&mut self) {
        self.close();
    }
}
