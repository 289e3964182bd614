//! Line-oriented file transfer protocol.
//!
//! # Wire format
//!
//! ```text
//! request   = METHOD SP path CRLF
//! response  = "OK" SP size CRLF payload
//!           / "ERR" SP code SP reason CRLF
//! ```
//!
//! The `size` of an `OK` line is always the exact number of payload bytes that
//! follow it. `ERR` lines never carry a payload.
//!
//! # Modules
//!
//! - **`request`**: [`Method`](request::Method) and the decoded [`RequestHeader`](request::RequestHeader)
//! - **`parser`**: finds and decodes a request line in a byte buffer
//! - **`response`**: response codes and the [`Response`](response::Response) type
//! - **`writer`**: streams a response to a socket
//!
//! # Example
//!
//! ```
//! use sockline::protocol::parser::parse_request_line;
//! use sockline::protocol::response::{Response, ResponseCode};
//!
//! let (request, consumed) = parse_request_line(b"GET /readme.txt\r\n").unwrap();
//! assert_eq!(request.path, "/readme.txt");
//! assert_eq!(consumed, 17);
//!
//! let response = Response::error(ResponseCode::NotFound);
//! assert_eq!(response.encode_header(), "ERR 404 Not Found\r\n");
//! ```

pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
