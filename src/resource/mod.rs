//! Files served over the line protocol.
//!
//! - **`file`**: path resolution, metadata and chunked reads under a shared lock
//! - **`mime`**: MIME type detection based on file extensions

pub mod file;
pub mod mime;

pub use file::{Chunks, File, FileResolver, ResourceError};
pub use mime::MimeType;
