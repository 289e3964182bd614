use crate::protocol::parser::ParseError;

/// Request methods understood by the line protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve the contents of a file
    GET,
}

impl Method {
    /// Parses a method token.
    ///
    /// The token is matched case-insensitively and surrounding whitespace is ignored.
    ///
    /// # Example
    ///
    /// ```
    /// # use sockline::protocol::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str(" get "), Some(Method::GET));
    /// assert_eq!(Method::from_str("FOO"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Method::GET),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
        }
    }
}

/// A decoded request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub method: Method,
    /// Everything after the first space, trimmed. Never empty.
    pub path: String,
}

impl RequestHeader {
    /// Decodes `"METHOD path"`; a trailing CRLF is tolerated.
    ///
    /// The line is split at the first space. An empty path is reported before an
    /// unknown method.
    pub fn decode(line: &str) -> Result<Self, ParseError> {
        let (raw_method, raw_path) = line.split_once(' ').unwrap_or((line, ""));

        let path = raw_path.trim();
        if path.is_empty() {
            return Err(ParseError::EmptyPath);
        }

        let method = Method::from_str(raw_method).ok_or(ParseError::InvalidMethod)?;

        Ok(Self {
            method,
            path: path.to_string(),
        })
    }

    /// Renders the request as it travels on the wire.
    pub fn encode(&self) -> String {
        encode_request_line(self.method, &self.path)
    }
}

pub fn encode_request_line(method: Method, path: &str) -> String {
    format!("{} {}\r\n", method.as_str(), path)
}
