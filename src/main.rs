use sockline::config::Config;
use sockline::server::forking::Isolation;
use sockline::server::listener;
use sockline::server::shutdown::ShutdownHandle;
use sockline::signal;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let shutdown = ShutdownHandle::new();

    if cfg.server.app.is_forking() && cfg.server.isolation == Isolation::Process {
        signal::ignore_child_exits()?;
    }

    let mut server = tokio::task::spawn_blocking({
        let cfg = cfg.clone();
        let shutdown = shutdown.clone();
        move || listener::run(&cfg, shutdown)
    });

    tokio::select! {
        res = &mut server => {
            return res?;
        }

        res = signal::shutdown_on_interrupt(shutdown) => {
            res?;
        }
    }

    // the server closes its listener and connections before returning
    server.await?
}
