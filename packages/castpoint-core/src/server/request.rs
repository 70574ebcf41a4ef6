//! HTTP request parsing for the listener handshake.
//!
//! The listener only needs the request line and a single header, so the
//! contract is small: feed bytes as they arrive, check completion, then query
//! method, path and headers.

use thiserror::Error;

use crate::protocol_constants::MAX_REQUEST_SIZE;

/// Why a request could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("request exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("request is not valid UTF-8")]
    NotUtf8,
}

/// Incremental request parser used by a listener.
pub trait RequestParser {
    /// Feeds bytes read from the client.
    ///
    /// Returns how many bytes were consumed. A well-formed request consumes
    /// every byte fed to it; bytes after the end of the header block are not
    /// consumed.
    fn feed(&mut self, data: &[u8]) -> Result<usize, ParseError>;

    /// True once the full header block has been parsed.
    fn is_complete(&self) -> bool;

    fn method(&self) -> Option<&str>;

    /// Request path without the query string.
    fn path(&self) -> Option<&str>;

    /// Value of the first header with this name (ASCII case-insensitive).
    fn header(&self, name: &str) -> Option<&str>;
}

#[derive(Debug)]
struct ParsedRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

/// Minimal HTTP/1.x request-head parser.
#[derive(Debug, Default)]
pub struct HttpRequestParser {
    buf: Vec<u8>,
    request: Option<ParsedRequest>,
}

impl HttpRequestParser {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Finds the end of the header block (index just past the blank line).
///
/// Accepts both CRLF and bare LF line endings.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn parse_head(head: &str) -> Result<ParsedRequest, ParseError> {
    let mut lines = head
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line));

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) if v.starts_with("HTTP/") => (m, t, v),
        _ => return Err(ParseError::MalformedRequestLine(request_line.to_string())),
    };
    log::trace!("[Request] {} {} {}", method, target, version);

    let path = target.split('?').next().unwrap_or(target);

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ParseError::MalformedHeader(line.to_string()));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(ParsedRequest {
        method: method.to_string(),
        path: path.to_string(),
        headers,
    })
}

impl RequestParser for HttpRequestParser {
    fn feed(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        if self.request.is_some() {
            return Ok(0);
        }

        let previous = self.buf.len();
        self.buf.extend_from_slice(data);

        let Some(end) = find_head_end(&self.buf) else {
            if self.buf.len() > MAX_REQUEST_SIZE {
                return Err(ParseError::TooLarge(MAX_REQUEST_SIZE));
            }
            return Ok(data.len());
        };
        if end > MAX_REQUEST_SIZE {
            return Err(ParseError::TooLarge(MAX_REQUEST_SIZE));
        }

        let head = std::str::from_utf8(self.buf.get(..end).unwrap_or_default())
            .map_err(|_| ParseError::NotUtf8)?;
        self.request = Some(parse_head(head)?);
        self.buf.clear();

        Ok(end.saturating_sub(previous))
    }

    fn is_complete(&self) -> bool {
        self.request.is_some()
    }

    fn method(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.method.as_str())
    }

    fn path(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.path.as_str())
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.request.as_ref().and_then(|r| {
            r.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ICY_REQUEST: &[u8] = b"GET /?x=1 HTTP/1.1\r\nHost: radio\r\nicy-metadata: 1\r\nUser-Agent: VLC\r\n\r\n";

    #[test]
    fn parses_full_request() {
        let mut parser = HttpRequestParser::new();
        assert_eq!(parser.feed(ICY_REQUEST), Ok(ICY_REQUEST.len()));
        assert!(parser.is_complete());
        assert_eq!(parser.method(), Some("GET"));
        assert_eq!(parser.path(), Some("/"));
        assert_eq!(parser.header("Icy-MetaData"), Some("1"));
        assert_eq!(parser.header("user-agent"), Some("VLC"));
        assert_eq!(parser.header("Accept"), None);
    }

    #[test]
    fn parses_across_reads() {
        let mut parser = HttpRequestParser::new();
        let (first, rest) = ICY_REQUEST.split_at(10);
        assert_eq!(parser.feed(first), Ok(first.len()));
        assert!(!parser.is_complete());
        assert_eq!(parser.feed(rest), Ok(rest.len()));
        assert!(parser.is_complete());
        assert_eq!(parser.path(), Some("/"));
    }

    #[test]
    fn accepts_bare_lf() {
        let mut parser = HttpRequestParser::new();
        let request = b"GET / HTTP/1.0\nIcy-MetaData:1\n\n";
        assert_eq!(parser.feed(request), Ok(request.len()));
        assert_eq!(parser.header("icy-metadata"), Some("1"));
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let mut parser = HttpRequestParser::new();
        let mut request = b"GET / HTTP/1.0\r\n\r\n".to_vec();
        request.extend_from_slice(b"junk");
        assert_eq!(parser.feed(&request), Ok(request.len() - 4));
    }

    #[test]
    fn rejects_bad_request_line() {
        let mut parser = HttpRequestParser::new();
        assert!(matches!(
            parser.feed(b"HELLO\r\n\r\n"),
            Err(ParseError::MalformedRequestLine(_))
        ));

        let mut parser = HttpRequestParser::new();
        assert!(matches!(
            parser.feed(b"GET / FTP/1.0\r\n\r\n"),
            Err(ParseError::MalformedRequestLine(_))
        ));
    }

    #[test]
    fn rejects_header_without_colon() {
        let mut parser = HttpRequestParser::new();
        assert!(matches!(
            parser.feed(b"GET / HTTP/1.1\r\nbroken header\r\n\r\n"),
            Err(ParseError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_oversized_request() {
        let mut parser = HttpRequestParser::new();
        let mut request = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        request.resize(MAX_REQUEST_SIZE + 10, b'a');
        assert_eq!(
            parser.feed(&request),
            Err(ParseError::TooLarge(MAX_REQUEST_SIZE))
        );
    }

    #[test]
    fn keeps_non_get_methods_for_the_caller() {
        let mut parser = HttpRequestParser::new();
        parser.feed(b"SOURCE /live HTTP/1.0\r\n\r\n").expect("parses");
        assert_eq!(parser.method(), Some("SOURCE"));
        assert_eq!(parser.path(), Some("/live"));
    }
}
