use std::net::SocketAddr;

use anyhow::Context;
use tracing::info;

use crate::app::chat::ChatHandler;
use crate::app::echo::EchoWorker;
use crate::app::file_server::FileServer;
use crate::config::{App, Config, ServerConfig, SocketConfig};
use crate::net::socket::{Family, SocketHandle};
use crate::resource::file::FileResolver;
use crate::server::forking::{ConnectionWorker, ForkingServer};
use crate::server::reactor::ReactorServer;
use crate::server::shutdown::ShutdownHandle;

/// Creates a socket for `server.listen_addr`, applies the socket options and binds it.
pub fn bind_listener(server: &ServerConfig, socket: &SocketConfig) -> anyhow::Result<SocketHandle> {
    let addr: SocketAddr = server
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {:?}", server.listen_addr))?;

    let handle = SocketHandle::create(Family::of(&addr)).context("failed to create socket")?;
    for option in socket.options() {
        handle
            .set_option(option)
            .with_context(|| format!("failed to set {option:?}"))?;
    }
    handle
        .bind(addr.ip(), addr.port())
        .with_context(|| format!("failed to bind {addr}"))?;
    Ok(handle)
}

/// Serves the configured application until `shutdown` is requested.
pub fn run(cfg: &Config, shutdown: ShutdownHandle) -> anyhow::Result<()> {
    let listener = bind_listener(&cfg.server, &cfg.socket)?;
    info!("Listening on {}", cfg.server.listen_addr);

    match cfg.server.app {
        App::Chat => {
            let mut server = ReactorServer::new()
                .with_select_timeout(cfg.server.select_timeout())
                .with_read_size(cfg.server.read_size)
                .with_shutdown(shutdown);
            server.open(listener, cfg.server.backlog)?;
            server.handle(&mut ChatHandler::new())?;
        }
        App::Files => {
            let resolver = match &cfg.files.root {
                Some(root) => FileResolver::sandboxed(root)
                    .with_context(|| format!("invalid serving root {}", root.display()))?,
                None => FileResolver::unrestricted(),
            };
            let worker = FileServer::new(resolver)
                .with_chunk_size(cfg.files.chunk_size)
                .with_max_request_line(cfg.files.max_request_line);
            run_forking(cfg, listener, shutdown, worker)?;
        }
        App::Echo => {
            run_forking(cfg, listener, shutdown, EchoWorker::new(cfg.server.read_size))?;
        }
    }

    Ok(())
}

fn run_forking<W: ConnectionWorker>(
    cfg: &Config,
    listener: SocketHandle,
    shutdown: ShutdownHandle,
    worker: W,
) -> anyhow::Result<()> {
    let mut server = ForkingServer::new(cfg.server.isolation).with_shutdown(shutdown);
    server.open(listener, cfg.server.backlog)?;
    server.handle(worker)?;
    Ok(())
}
