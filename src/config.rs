use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::net::socket::{DEFAULT_BACKLOG, DEFAULT_READ_LENGTH, SocketOption};
use crate::resource::file::DEFAULT_CHUNK_SIZE;
use crate::server::forking::Isolation;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5001";

/// Which application the binary serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum App {
    /// Multi-user chat on the reactor server.
    #[default]
    Chat,
    /// Line-protocol file server on the forking server.
    Files,
    /// Byte-count echo on the forking server.
    Echo,
}

impl App {
    pub fn is_forking(&self) -> bool {
        matches!(self, App::Files | App::Echo)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub socket: SocketConfig,
    pub files: FilesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub backlog: i32,
    pub select_timeout_ms: u64,
    pub read_size: usize,
    pub app: App,
    pub isolation: Isolation,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            backlog: DEFAULT_BACKLOG,
            select_timeout_ms: 1000,
            read_size: DEFAULT_READ_LENGTH,
            app: App::default(),
            isolation: Isolation::default(),
        }
    }
}

impl ServerConfig {
    pub fn select_timeout(&self) -> Duration {
        Duration::from_millis(self.select_timeout_ms)
    }
}

/// Options applied to the listening socket before `listen`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub reuse_address: bool,
    pub reuse_port: bool,
    pub keep_alive: bool,
    /// `None` disables the timeout.
    pub recv_timeout_secs: Option<u64>,
    pub send_timeout_secs: Option<u64>,
    pub no_delay: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reuse_address: true,
            reuse_port: true,
            keep_alive: true,
            recv_timeout_secs: Some(10),
            send_timeout_secs: Some(10),
            no_delay: true,
        }
    }
}

impl SocketConfig {
    pub fn options(&self) -> Vec<SocketOption> {
        vec![
            SocketOption::ReuseAddress(self.reuse_address),
            SocketOption::ReusePort(self.reuse_port),
            SocketOption::KeepAlive(self.keep_alive),
            SocketOption::RecvTimeout(self.recv_timeout_secs.map(Duration::from_secs)),
            SocketOption::SendTimeout(self.send_timeout_secs.map(Duration::from_secs)),
            SocketOption::NoDelay(self.no_delay),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Serving root. `None` takes request paths literally.
    pub root: Option<PathBuf>,
    pub chunk_size: usize,
    pub max_request_line: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: Some(PathBuf::from(".")),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_request_line: 8192,
        }
    }
}

impl Config {
    /// Loads the file named by `SOCKLINE_CONFIG` (defaults when unset), then
    /// applies the `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("SOCKLINE_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen_addr;
        }
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("failed to parse YAML configuration")
    }
}
