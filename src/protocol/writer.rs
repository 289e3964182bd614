use thiserror::Error;

use crate::net::error::SocketError;
use crate::net::socket::SocketHandle;
use crate::protocol::response::{EncodeError, Response};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Streams a [`Response`] to a socket, chunk by chunk.
///
/// `written()` tells the caller whether the status line already went out,
/// i.e. whether an `ERR` line can still be sent after a failure.
pub struct ResponseWriter<'a> {
    response: &'a Response,
    chunk_size: usize,
    written: u64,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(response: &'a Response, chunk_size: usize) -> Self {
        Self {
            response,
            chunk_size,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn write_to_socket(&mut self, socket: &SocketHandle) -> Result<u64, WriteError> {
        let header = self.response.encode_header();
        let Some(file) = self.response.payload() else {
            self.written += socket.write(header.as_bytes())? as u64;
            return Ok(self.written);
        };

        let declared = file.size();
        if let Some(content) = file.content() {
            if content.len() as u64 != declared {
                return Err(EncodeError::SizeMismatch {
                    declared,
                    actual: content.len() as u64,
                }
                .into());
            }
        }

        // open before the status line so a vanished file can still be reported
        let chunks = file.chunks(self.chunk_size).map_err(EncodeError::from)?;
        self.written += socket.write(header.as_bytes())? as u64;

        let mut sent = 0u64;
        for chunk in chunks {
            let chunk = chunk.map_err(EncodeError::from)?;
            if sent + chunk.len() as u64 > declared {
                return Err(EncodeError::SizeMismatch {
                    declared,
                    actual: sent + chunk.len() as u64,
                }
                .into());
            }
            let n = socket.write(&chunk)? as u64;
            sent += n;
            self.written += n;
        }

        if sent != declared {
            return Err(EncodeError::SizeMismatch {
                declared,
                actual: sent,
            }
            .into());
        }
        Ok(self.written)
    }
}
