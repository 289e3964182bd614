use thiserror::Error;

use crate::resource::file::{File, ResourceError};

/// Status codes of the line protocol.
///
/// - `Ok` (200): the file follows
/// - `NoContent` (204): nothing to send
/// - `BadRequest` (400): the request line could not be decoded
/// - `Forbidden` (403): the path exists but may not be served
/// - `NotFound` (404): no such file
/// - `InternalServerError` (500): the server failed while answering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    NoContent,
    BadRequest,
    Forbidden,
    NotFound,
    InternalServerError,
}

impl ResponseCode {
    /// # Example
    ///
    /// ```
    /// # use sockline::protocol::response::ResponseCode;
    /// assert_eq!(ResponseCode::Ok.as_u16(), 200);
    /// assert_eq!(ResponseCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            ResponseCode::Ok => 200,
            ResponseCode::NoContent => 204,
            ResponseCode::BadRequest => 400,
            ResponseCode::Forbidden => 403,
            ResponseCode::NotFound => 404,
            ResponseCode::InternalServerError => 500,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::NoContent => "No Content",
            ResponseCode::BadRequest => "Bad Request",
            ResponseCode::Forbidden => "Forbidden",
            ResponseCode::NotFound => "Not Found",
            ResponseCode::InternalServerError => "Internal Server Error",
        }
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            200 => Some(ResponseCode::Ok),
            204 => Some(ResponseCode::NoContent),
            400 => Some(ResponseCode::BadRequest),
            403 => Some(ResponseCode::Forbidden),
            404 => Some(ResponseCode::NotFound),
            500 => Some(ResponseCode::InternalServerError),
            _ => None,
        }
    }
}

impl From<&ResourceError> for ResponseCode {
    fn from(err: &ResourceError) -> Self {
        match err {
            ResourceError::NotFound { .. } => ResponseCode::NotFound,
            ResourceError::Forbidden { .. } => ResponseCode::Forbidden,
            _ => ResponseCode::InternalServerError,
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload produced {actual} bytes but {declared} were declared")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("failed to read payload: {0}")]
    Payload(#[from] ResourceError),
}

/// A response ready to be written to a client.
///
/// Only `OK` responses carry a payload; the constructors make any other
/// combination unrepresentable.
#[derive(Debug, Clone)]
pub struct Response {
    code: ResponseCode,
    payload: Option<File>,
}

impl Response {
    pub fn ok(file: File) -> Self {
        Self {
            code: ResponseCode::Ok,
            payload: Some(file),
        }
    }

    /// An `ERR` response. Passing `ResponseCode::Ok` yields `InternalServerError`,
    /// since an `OK` line without a payload would misstate its length.
    pub fn error(code: ResponseCode) -> Self {
        let code = match code {
            ResponseCode::Ok => ResponseCode::InternalServerError,
            other => other,
        };
        Self { code, payload: None }
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    pub fn payload(&self) -> Option<&File> {
        self.payload.as_ref()
    }

    /// The status line, CRLF included.
    pub fn encode_header(&self) -> String {
        match &self.payload {
            Some(file) => format!("OK {}\r\n", file.size()),
            None => format!("ERR {} {}\r\n", self.code.as_u16(), self.code.reason_phrase()),
        }
    }

    /// Encodes the status line and the whole payload into one buffer.
    ///
    /// Fails if the payload does not produce exactly the advertised number of bytes.
    pub fn encode(&self, chunk_size: usize) -> Result<Vec<u8>, EncodeError> {
        let mut buf = self.encode_header().into_bytes();
        let Some(file) = &self.payload else {
            return Ok(buf);
        };

        let mut actual = 0u64;
        for chunk in file.chunks(chunk_size)? {
            let chunk = chunk?;
            actual += chunk.len() as u64;
            buf.extend_from_slice(&chunk);
        }

        if actual != file.size() {
            return Err(EncodeError::SizeMismatch {
                declared: file.size(),
                actual,
            });
        }
        Ok(buf)
    }
}
