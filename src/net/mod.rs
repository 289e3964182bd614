//! Raw TCP socket layer.
//!
//! - **`socket`**: [`SocketHandle`], an owned descriptor with an explicit open/closed state
//! - **`select`**: readiness wait across many handles
//! - **`error`**: [`SocketError`] and the retryable/terminal classification

pub mod error;
pub mod select;
pub mod socket;

pub use error::{SocketError, is_retryable_code};
pub use select::{Readiness, select};
pub use socket::{Family, SocketHandle, SocketName, SocketOption, SocketOptionKind};
