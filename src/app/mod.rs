//! Applications served by the binary.
//!
//! - **`chat`**: [`ChatHandler`](chat::ChatHandler), a reactor handler relaying lines between users
//! - **`file_server`**: [`FileServer`](file_server::FileServer), a forking worker answering one `GET`
//! - **`echo`**: [`EchoWorker`](echo::EchoWorker), a forking worker reporting received byte counts

pub mod chat;
pub mod echo;
pub mod file_server;
