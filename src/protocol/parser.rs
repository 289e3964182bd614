use thiserror::Error;

use crate::protocol::request::RequestHeader;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid request method")]
    InvalidMethod,
    #[error("empty request path")]
    EmptyPath,
    #[error("request line is not valid UTF-8")]
    InvalidEncoding,
    #[error("request line exceeds {max} bytes")]
    TooLong { max: usize },
    #[error("request line is incomplete")]
    Incomplete,
}

/// Parses one request line from the front of `buf`.
///
/// Returns the header and the number of bytes consumed, including the line
/// terminator. `Incomplete` means no `\n` has arrived yet.
pub fn parse_request_line(buf: &[u8]) -> Result<(RequestHeader, usize), ParseError> {
    let line_end = find_line_end(buf).ok_or(ParseError::Incomplete)?;
    let header = parse_line(&buf[..line_end])?;
    Ok((header, line_end + 1))
}

/// Parses a complete line with no terminator requirement, e.g. what is left
/// in the buffer when the peer shuts down its write side.
pub fn parse_line(line: &[u8]) -> Result<RequestHeader, ParseError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidEncoding)?;
    RequestHeader::decode(line)
}

fn find_line_end(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}
