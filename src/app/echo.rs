use tracing::info;

use crate::net::socket::{DEFAULT_READ_LENGTH, SocketHandle};
use crate::server::forking::ConnectionWorker;

/// Reads once and reports how many bytes arrived.
#[derive(Debug, Clone)]
pub struct EchoWorker {
    read_size: usize,
}

impl Default for EchoWorker {
    fn default() -> Self {
        Self::new(DEFAULT_READ_LENGTH)
    }
}

impl EchoWorker {
    pub fn new(read_size: usize) -> Self {
        Self {
            read_size: read_size.max(1),
        }
    }
}

impl ConnectionWorker for EchoWorker {
    fn on_accept(&self, mut client: SocketHandle) -> anyhow::Result<()> {
        let data = client.read(self.read_size)?;
        info!(peer = %client.peer_name()?, bytes = data.len(), "data received");

        client.write(format!("{} bytes received.\r\n", data.len()).as_bytes())?;
        client.close();
        Ok(())
    }
}
