//! Sockline - TCP servers over raw sockets
//!
//! Core library: socket handles, a reactor and a forking server, and the
//! line protocol used to transfer files.

pub mod app;
pub mod config;
pub mod net;
pub mod protocol;
pub mod resource;
pub mod server;
pub mod signal;
