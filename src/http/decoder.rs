//! Incremental HTTP request decoder
//!
//! State machine `ExpectRequestLine -> ExpectHeaders -> ExpectBody ->
//! Complete`, operating in place on a connection's read buffer. The decoder
//! consumes only the bytes it has fully parsed; anything after the body stays
//! in the buffer and belongs to the next request on a keep-alive connection.

use super::message::{Method, Request, Version};
use super::query::{parse_query, url_decode};
use super::Headers;
use crate::buffer::Buffer;
use std::time::SystemTime;
use tracing::debug;

/// Outcome of feeding bytes to the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedResult {
    /// The buffer holds no complete unit of work yet; wait for more data.
    NeedMore,
    /// A full request has been decoded and can be dispatched.
    Complete,
    /// The bytes do not form a valid request; the connection must close.
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    ExpectRequestLine,
    ExpectHeaders,
    ExpectBody,
    Complete,
}

/// Incremental request decoder
///
/// One decoder lives on each connection and is reset between requests.
#[derive(Debug)]
pub struct RequestDecoder {
    state: DecodeState,
    request: Request,
}

impl RequestDecoder {
    /// Create a decoder with a fresh empty request
    pub fn new() -> Self {
        RequestDecoder {
            state: DecodeState::ExpectRequestLine,
            request: Request::new(),
        }
    }

    /// Feed the readable region of `buffer` to the state machine.
    ///
    /// Parsed bytes are retrieved from the buffer; on `NeedMore` nothing
    /// beyond the already-parsed prefix is consumed.
    pub fn feed(&mut self, buffer: &mut Buffer, receive_time: SystemTime) -> FeedResult {
        loop {
            match self.state {
                DecodeState::ExpectRequestLine => {
                    let Some(pos) = buffer.find_crlf() else {
                        return FeedResult::NeedMore;
                    };
                    let line = String::from_utf8_lossy(&buffer.peek()[..pos]).into_owned();
                    buffer.retrieve(pos + 2);

                    if !self.parse_request_line(&line, receive_time) {
                        return FeedResult::Malformed;
                    }
                    self.state = DecodeState::ExpectHeaders;
                }
                DecodeState::ExpectHeaders => {
                    let Some(pos) = buffer.find_crlf() else {
                        return FeedResult::NeedMore;
                    };

                    if pos == 0 {
                        // Empty line terminates the header block.
                        buffer.retrieve(2);
                        match self.finish_headers() {
                            Some(next) => self.state = next,
                            None => return FeedResult::Malformed,
                        }
                        if self.state == DecodeState::Complete {
                            return FeedResult::Complete;
                        }
                    } else {
                        let line = String::from_utf8_lossy(&buffer.peek()[..pos]).into_owned();
                        buffer.retrieve(pos + 2);

                        match Headers::parse_header_line(&line) {
                            Ok((name, value)) => self.request.headers_mut().insert(name, value),
                            Err(err) => {
                                debug!(%err, "rejecting header line");
                                return FeedResult::Malformed;
                            }
                        }
                    }
                }
                DecodeState::ExpectBody => {
                    let need = self.request.content_length() as usize;
                    if buffer.len() < need {
                        return FeedResult::NeedMore;
                    }
                    let body = buffer.peek()[..need].to_vec();
                    buffer.retrieve(need);
                    self.request.set_body(body);
                    self.state = DecodeState::Complete;
                    return FeedResult::Complete;
                }
                DecodeState::Complete => return FeedResult::Complete,
            }
        }
    }

    /// True once a full request has been decoded
    pub fn is_complete(&self) -> bool {
        self.state == DecodeState::Complete
    }

    /// The request decoded so far
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Move the decoded request out, leaving an empty one in place.
    pub fn take_request(&mut self) -> Request {
        std::mem::take(&mut self.request)
    }

    /// Restart the decoder with a fresh empty request.
    pub fn reset(&mut self) {
        self.state = DecodeState::ExpectRequestLine;
        self.request = Request::new();
    }

    fn parse_request_line(&mut self, line: &str, receive_time: SystemTime) -> bool {
        // METHOD SP TARGET SP VERSION
        let mut parts = line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            debug!(line, "malformed request line");
            return false;
        };

        let Ok(method) = Method::from_str(method) else {
            debug!(method, "unknown request method");
            return false;
        };
        self.request.set_method(method);

        // The target splits into path and query at the first '?'. The path
        // keeps '+' literal; the query is form-encoded.
        match target.split_once('?') {
            Some((path, query)) => {
                self.request.set_path(url_decode(path, false));
                self.request.set_query_parameters(parse_query(query));
            }
            None => self.request.set_path(url_decode(target, false)),
        }

        let Ok(version) = Version::from_str(version) else {
            debug!(version, "unsupported protocol version");
            return false;
        };
        self.request.set_version(version);
        self.request.set_receive_time(receive_time);
        true
    }

    /// Decide the state that follows the header terminator.
    ///
    /// Returns `None` when `Content-Length` does not parse as an unsigned
    /// decimal (overflow included).
    fn finish_headers(&mut self) -> Option<DecodeState> {
        match self.request.headers().get("Content-Length") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => Some(DecodeState::Complete),
                Ok(length) => {
                    self.request.set_content_length(length);
                    Some(DecodeState::ExpectBody)
                }
                Err(_) => {
                    debug!(raw, "invalid Content-Length");
                    None
                }
            },
            None => Some(DecodeState::Complete),
        }
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(input: &[u8]) -> (RequestDecoder, Buffer, FeedResult) {
        let mut decoder = RequestDecoder::new();
        let mut buffer = Buffer::from(input);
        let result = decoder.feed(&mut buffer, SystemTime::now());
        (decoder, buffer, result)
    }

    #[test]
    fn test_get_without_body() {
        let (decoder, buffer, result) = feed_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(result, FeedResult::Complete);
        assert!(buffer.is_empty());

        let req = decoder.request();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/hello");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.header("Host"), Some("x"));
        assert!(req.body().is_empty());
    }

    #[test]
    fn test_post_with_body() {
        let (decoder, _, result) =
            feed_all(b"POST /submit HTTP/1.1\r\nContent-Length: 4\r\n\r\ndata");
        assert_eq!(result, FeedResult::Complete);

        let req = decoder.request();
        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.body(), b"data");
        assert_eq!(req.content_length(), 4);
    }

    #[test]
    fn test_fragmented_feed_matches_single_feed() {
        let input: &[u8] =
            b"POST /a?x=1 HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello";
        let (whole, _, result) = feed_all(input);
        assert_eq!(result, FeedResult::Complete);

        // Feed the same bytes one at a time.
        let mut decoder = RequestDecoder::new();
        let mut buffer = Buffer::new();
        let mut result = FeedResult::NeedMore;
        for byte in input {
            buffer.append(&[*byte]);
            result = decoder.feed(&mut buffer, SystemTime::now());
        }
        assert_eq!(result, FeedResult::Complete);

        let a = whole.request();
        let b = decoder.request();
        assert_eq!(a.method(), b.method());
        assert_eq!(a.path(), b.path());
        assert_eq!(a.version(), b.version());
        assert_eq!(a.body(), b.body());
        assert_eq!(a.query_parameter("x"), b.query_parameter("x"));
        assert_eq!(a.header("Host"), b.header("Host"));
    }

    #[test]
    fn test_query_parameters_decoded() {
        let (decoder, _, result) =
            feed_all(b"GET /search?q=a+b&lang=en%2DUS&flag HTTP/1.1\r\n\r\n");
        assert_eq!(result, FeedResult::Complete);

        let req = decoder.request();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_parameter("q"), Some("a b"));
        assert_eq!(req.query_parameter("lang"), Some("en-US"));
        assert_eq!(req.query_parameter("flag"), Some(""));
    }

    #[test]
    fn test_path_keeps_plus_literal() {
        let (decoder, _, result) = feed_all(b"GET /a+b%20c HTTP/1.1\r\n\r\n");
        assert_eq!(result, FeedResult::Complete);
        assert_eq!(decoder.request().path(), "/a+b c");
    }

    #[test]
    fn test_unknown_method_is_malformed() {
        let (_, _, result) = feed_all(b"BADMETHOD / HTTP/1.1\r\n\r\n");
        assert_eq!(result, FeedResult::Malformed);
    }

    #[test]
    fn test_bad_version_is_malformed() {
        let (_, _, result) = feed_all(b"GET / HTTP/2.0\r\n\r\n");
        assert_eq!(result, FeedResult::Malformed);
    }

    #[test]
    fn test_header_without_colon_is_malformed() {
        let (_, _, result) = feed_all(b"GET / HTTP/1.1\r\nBadHeader\r\n\r\n");
        assert_eq!(result, FeedResult::Malformed);
    }

    #[test]
    fn test_content_length_overflow_is_malformed() {
        let (_, _, result) =
            feed_all(b"POST / HTTP/1.1\r\nContent-Length: 99999999999999999999999\r\n\r\n");
        assert_eq!(result, FeedResult::Malformed);
    }

    #[test]
    fn test_content_length_not_numeric_is_malformed() {
        let (_, _, result) = feed_all(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n");
        assert_eq!(result, FeedResult::Malformed);
    }

    #[test]
    fn test_partial_line_needs_more() {
        let (_, buffer, result) = feed_all(b"GET /hello HTT");
        assert_eq!(result, FeedResult::NeedMore);
        // Nothing consumed while the line is incomplete.
        assert_eq!(buffer.len(), 14);
    }

    #[test]
    fn test_partial_body_needs_more() {
        let mut decoder = RequestDecoder::new();
        let mut buffer = Buffer::from(&b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nhalf"[..]);
        assert_eq!(
            decoder.feed(&mut buffer, SystemTime::now()),
            FeedResult::NeedMore
        );

        buffer.append(b"-body!");
        assert_eq!(
            decoder.feed(&mut buffer, SystemTime::now()),
            FeedResult::Complete
        );
        assert_eq!(decoder.request().body(), b"half-body!");
    }

    #[test]
    fn test_pipelined_bytes_stay_in_buffer() {
        let mut decoder = RequestDecoder::new();
        let mut buffer =
            Buffer::from(&b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n"[..]);

        assert_eq!(
            decoder.feed(&mut buffer, SystemTime::now()),
            FeedResult::Complete
        );
        assert_eq!(decoder.request().path(), "/a");
        assert_eq!(buffer.peek(), b"GET /b HTTP/1.1\r\n\r\n");

        decoder.reset();
        assert_eq!(
            decoder.feed(&mut buffer, SystemTime::now()),
            FeedResult::Complete
        );
        assert_eq!(decoder.request().path(), "/b");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_reset_produces_fresh_request() {
        let (mut decoder, _, result) = feed_all(b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(result, FeedResult::Complete);

        decoder.reset();
        assert!(!decoder.is_complete());
        assert_eq!(decoder.request().method(), Method::Invalid);
        assert_eq!(decoder.request().path(), "");
    }

    #[test]
    fn test_extra_spaces_in_request_line_malformed() {
        let (_, _, result) = feed_all(b"GET  /x HTTP/1.1\r\n\r\n");
        assert_eq!(result, FeedResult::Malformed);
    }
}
