use anyhow::Context;
use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::net::error::SocketError;
use crate::net::socket::SocketHandle;
use crate::protocol::parser::{ParseError, parse_line, parse_request_line};
use crate::protocol::request::{Method, RequestHeader};
use crate::protocol::response::{Response, ResponseCode};
use crate::protocol::writer::{ResponseWriter, WriteError};
use crate::resource::file::{DEFAULT_CHUNK_SIZE, FileResolver};
use crate::server::forking::ConnectionWorker;

const DEFAULT_MAX_REQUEST_LINE: usize = 8192;

enum Incoming {
    Request(RequestHeader),
    Malformed(ParseError),
    Closed,
}

/// One-shot worker: read a request line, answer it, close the connection.
#[derive(Debug, Clone)]
pub struct FileServer {
    resolver: FileResolver,
    chunk_size: usize,
    max_request_line: usize,
}

impl FileServer {
    pub fn new(resolver: FileResolver) -> Self {
        Self {
            resolver,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_request_line: DEFAULT_MAX_REQUEST_LINE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_request_line(mut self, max: usize) -> Self {
        self.max_request_line = max.max(1);
        self
    }

    /// Answers a single request on `client`.
    pub fn serve(&self, client: &SocketHandle) -> anyhow::Result<()> {
        let request = match self.read_request(client).context("failed to read request")? {
            Incoming::Request(request) => request,
            Incoming::Malformed(e) => {
                info!(error = %e, "bad request");
                return self.respond(client, &Response::error(ResponseCode::BadRequest));
            }
            Incoming::Closed => {
                debug!("peer closed before sending a request");
                return Ok(());
            }
        };

        match request.method {
            Method::GET => self.get(client, &request),
        }
    }

    fn get(&self, client: &SocketHandle, request: &RequestHeader) -> anyhow::Result<()> {
        let file = match self.resolver.resolve(&request.path) {
            Ok(file) => file,
            Err(e) => {
                let code = ResponseCode::from(&e);
                info!(path = %request.path, code = code.as_u16(), error = %e, "request rejected");
                self.respond(client, &Response::error(code))?;
                if code == ResponseCode::InternalServerError {
                    return Err(e).context("failed to resolve file");
                }
                return Ok(());
            }
        };

        let response = Response::ok(file);
        let mut writer = ResponseWriter::new(&response, self.chunk_size);
        match writer.write_to_socket(client) {
            Ok(written) => {
                info!(path = %request.path, bytes = written, "file sent");
                Ok(())
            }
            Err(WriteError::Encode(e)) if writer.written() == 0 => {
                warn!(path = %request.path, error = %e, "failed to encode response");
                self.respond(client, &Response::error(ResponseCode::InternalServerError))?;
                Err(e).context("failed to encode response")
            }
            Err(e) => Err(e).context("failed to send file"),
        }
    }

    fn respond(&self, client: &SocketHandle, response: &Response) -> anyhow::Result<()> {
        ResponseWriter::new(response, self.chunk_size)
            .write_to_socket(client)
            .context("failed to send response")?;
        Ok(())
    }

    fn read_request(&self, client: &SocketHandle) -> Result<Incoming, SocketError> {
        let mut buffer = BytesMut::with_capacity(1024);
        loop {
            match parse_request_line(&buffer) {
                Ok((request, _)) => return Ok(Incoming::Request(request)),
                Err(ParseError::Incomplete) => {}
                Err(e) => return Ok(Incoming::Malformed(e)),
            }

            if buffer.len() >= self.max_request_line {
                return Ok(Incoming::Malformed(ParseError::TooLong {
                    max: self.max_request_line,
                }));
            }

            let data = client.read(self.max_request_line - buffer.len())?;
            if data.is_empty() {
                // peer shut down its write side; whatever arrived is the request
                if buffer.is_empty() {
                    return Ok(Incoming::Closed);
                }
                return Ok(match parse_line(&buffer) {
                    Ok(request) => Incoming::Request(request),
                    Err(e) => Incoming::Malformed(e),
                });
            }
            buffer.extend_from_slice(&data);
        }
    }
}

impl ConnectionWorker for FileServer {
    fn on_accept(&self, mut client: SocketHandle) -> anyhow::Result<()> {
        let peer = client.peer_name()?;
        debug!(peer = %peer, "serving file request");

        let result = self.serve(&client);
        client.close();
        result.with_context(|| format!("request from {peer}"))
    }
}
