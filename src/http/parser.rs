//! Per-connection input buffer and the request parser state machine.
//!
//! The parser walks the buffer strictly forward, one byte per step, and
//! mutates it in place: header names are lowercased where they lie and URI
//! percent-escapes are compacted by a write cursor that trails the read
//! cursor. Every slice stored into [`Request`] is a view of this buffer.

use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        types::{from_hex_digit, is_char, is_ctl, is_digit, is_sp, is_tspecial, to_lower},
    },
};
use std::{io, mem};
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Clone)]
pub(crate) struct RequestBuffer {
    buf: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
}

impl RequestBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        RequestBuffer {
            buf: vec![0; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(capacity: usize, value: V) -> Self {
        let mut buffer = Self::new(capacity);
        let value = value.as_ref();

        buffer.buf[..value.len()].copy_from_slice(value);
        buffer.write_pos = value.len();
        buffer
    }

    /// Restores the invariant that a maximum-size header block fits between
    /// `read_pos` and the buffer end.
    pub(crate) fn prepare_for_next_request(&mut self, max_header_size: usize) {
        if self.read_pos == self.write_pos {
            // If possible, start reading from the buffer beginning
            self.read_pos = 0;
            self.write_pos = 0;
        } else if self.read_pos + max_header_size > self.buf.len() {
            // In-place fragments cannot be circular; when in doubt, defragment
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
            self.write_pos -= self.read_pos;
            self.read_pos = 0;
        }
    }

    /// Always <= capacity after [`prepare_for_next_request`](Self::prepare_for_next_request).
    #[inline(always)]
    pub(crate) fn header_limit(&self, max_header_size: usize) -> usize {
        self.read_pos + max_header_size
    }

    pub(crate) async fn fill_from<R>(&mut self, reader: &mut R) -> Result<usize, ErrorKind>
    where
        R: AsyncRead + Unpin,
    {
        debug_assert!(self.write_pos < self.buf.len());

        let n = reader.read(&mut self.buf[self.write_pos..]).await?;
        if n == 0 {
            // A zero-length read on free buffer space is end-of-stream
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream").into());
        }
        self.write_pos += n;
        Ok(n)
    }

    /// Received but unconsumed bytes, `[read_pos, write_pos)`.
    #[inline(always)]
    pub(crate) fn unconsumed(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    #[inline(always)]
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    #[inline(always)]
    pub(crate) fn read_pos(&self) -> usize {
        self.read_pos
    }

    #[inline(always)]
    pub(crate) fn is_drained(&self) -> bool {
        self.read_pos == self.write_pos
    }

    #[inline(always)]
    pub(crate) fn consume_byte(&mut self) {
        self.read_pos += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseState {
    MethodStart,
    MethodStartLf,
    Method,
    UriStart,
    Uri,
    // After the first '%' the remaining uri bytes shift down to uri_write_pos
    UriShifted,
    UriPercent1,
    UriPercent2,
    UriQueryString,
    // Empty '#' is allowed by the standard; the anchor itself is discarded
    UriAnchor,
    VersionH,
    VersionHt,
    VersionHtt,
    VersionHttp,
    VersionSlash,
    VersionMajorStart,
    VersionMajor,
    VersionMinorStart,
    VersionMinor,
    StatusLineCr,
    StatusLineLf,
    FirstHeaderLineStart,
    HeaderLineStart,
    HeaderName,
    HeaderColon,
    SpaceBeforeHeaderValue,
    HeaderValue,
    HeaderValueContinuation,
    HeaderLf,
    FinalLf,
    Good,
    Bad,
}

/// The state machine's cursors. One instance per connection, reset before
/// each request.
#[derive(Debug)]
pub(crate) struct Parser {
    state: ParseState,
    pub(crate) parse_error: &'static str,

    method_start: usize,
    uri_start: usize,
    // Due to percent encoding, decoded uri bytes shift down to this cursor
    uri_write_pos: usize,
    percent1: u8,
    query_string_start: usize,
    header_key_start: usize,
    header_key_finish: usize,
    header_value_start: usize,
    // Due to continuations, value bytes shift down to this cursor
    header_value_write_pos: usize,
    header_cms_list: bool,
}

impl Parser {
    pub(crate) fn new() -> Self {
        Parser {
            state: ParseState::MethodStart,
            parse_error: "",

            method_start: 0,
            uri_start: 0,
            uri_write_pos: 0,
            percent1: 0,
            query_string_start: 0,
            header_key_start: 0,
            header_key_finish: 0,
            header_value_start: 0,
            header_value_write_pos: 0,
            header_cms_list: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Parser::new();
    }

    // SAFETY: detach erases the borrow of the connection's input buffer so
    // Request can hold slices across await points. The buffer is a Box<[u8]>
    // owned by the Client for the whole connection lifetime and never
    // reallocates; Request::reset drops every detached slice before the
    // buffer is reused for the next request. Handlers that retain values
    // MUST copy.
    pub(crate) const unsafe fn detach(src: &[u8]) -> &'static [u8] {
        unsafe { mem::transmute(src) }
    }

    #[inline(always)]
    fn fail(&mut self, reason: &'static str) -> ParseState {
        self.parse_error = reason;
        ParseState::Bad
    }

    /// Feeds the byte at `pos` to the machine and returns the new state.
    ///
    /// `Good` and `Bad` are terminal; the caller must not feed further bytes.
    pub(crate) fn consume(
        &mut self,
        buf: &mut [u8],
        pos: usize,
        request: &mut Request,
    ) -> ParseState {
        let input = buf[pos];

        let next = match self.state {
            ParseState::MethodStart => {
                // Skip empty lines before the request-line, RFC 2616 §4.1
                if input == b'\r' {
                    ParseState::MethodStartLf
                } else if input == b'\n' {
                    ParseState::MethodStart
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    self.fail("invalid character at method start")
                } else {
                    self.method_start = pos;
                    ParseState::Method
                }
            }
            ParseState::MethodStartLf => {
                if input != b'\n' {
                    self.fail("invalid LF at method start")
                } else {
                    ParseState::MethodStart
                }
            }
            ParseState::Method => {
                if is_sp(input) {
                    request.method = unsafe { Self::detach(&buf[self.method_start..pos]) };
                    ParseState::UriStart
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    self.fail("invalid character in method")
                } else {
                    ParseState::Method
                }
            }
            ParseState::UriStart => {
                if is_sp(input) {
                    ParseState::UriStart
                } else if is_ctl(input) {
                    self.fail("invalid (control) character at uri start")
                } else if input == b'#' {
                    self.fail("invalid '#' character at uri start")
                } else if input == b'?' {
                    self.fail("invalid '?' character at uri start")
                } else {
                    self.uri_start = pos;
                    if input == b'%' {
                        self.uri_write_pos = pos;
                        ParseState::UriPercent1
                    } else {
                        ParseState::Uri
                    }
                }
            }
            ParseState::Uri => {
                if is_sp(input) {
                    request.path = unsafe { Self::detach(&buf[self.uri_start..pos]) };
                    ParseState::VersionH
                } else if is_ctl(input) {
                    self.fail("invalid (control) character in uri")
                } else if input == b'#' {
                    request.path = unsafe { Self::detach(&buf[self.uri_start..pos]) };
                    ParseState::UriAnchor
                } else if input == b'?' {
                    request.path = unsafe { Self::detach(&buf[self.uri_start..pos]) };
                    self.query_string_start = pos + 1;
                    ParseState::UriQueryString
                } else if input == b'%' {
                    self.uri_write_pos = pos;
                    ParseState::UriPercent1
                } else {
                    ParseState::Uri
                }
            }
            ParseState::UriShifted => {
                if is_sp(input) {
                    request.path = unsafe { Self::detach(&buf[self.uri_start..self.uri_write_pos]) };
                    ParseState::VersionH
                } else if is_ctl(input) {
                    self.fail("invalid (control) character in uri")
                } else if input == b'#' {
                    request.path = unsafe { Self::detach(&buf[self.uri_start..self.uri_write_pos]) };
                    ParseState::UriAnchor
                } else if input == b'?' {
                    request.path = unsafe { Self::detach(&buf[self.uri_start..self.uri_write_pos]) };
                    self.query_string_start = pos + 1;
                    ParseState::UriQueryString
                } else if input == b'%' {
                    ParseState::UriPercent1
                } else {
                    buf[self.uri_write_pos] = input;
                    self.uri_write_pos += 1;
                    ParseState::UriShifted
                }
            }
            ParseState::UriPercent1 => match from_hex_digit(input) {
                Some(digit) => {
                    self.percent1 = digit;
                    ParseState::UriPercent2
                }
                None => self.fail("uri percent-encoding invalid first hex digit"),
            },
            ParseState::UriPercent2 => match from_hex_digit(input) {
                Some(digit2) => {
                    buf[self.uri_write_pos] = self.percent1 * 16 + digit2;
                    self.uri_write_pos += 1;
                    ParseState::UriShifted
                }
                None => self.fail("uri percent-encoding invalid second hex digit"),
            },
            ParseState::UriQueryString => {
                if is_sp(input) {
                    request.query_string =
                        unsafe { Self::detach(&buf[self.query_string_start..pos]) };
                    ParseState::VersionH
                } else if is_ctl(input) {
                    self.fail("invalid (control) character in uri")
                } else if input == b'#' {
                    request.query_string =
                        unsafe { Self::detach(&buf[self.query_string_start..pos]) };
                    ParseState::UriAnchor
                } else {
                    ParseState::UriQueryString
                }
            }
            ParseState::UriAnchor => {
                if is_sp(input) {
                    ParseState::VersionH
                } else if is_ctl(input) {
                    self.fail("invalid (control) character in uri")
                } else {
                    ParseState::UriAnchor
                }
            }
            ParseState::VersionH => {
                if is_sp(input) {
                    ParseState::VersionH
                } else if input != b'H' {
                    self.fail("invalid http version, 'H' is expected")
                } else {
                    ParseState::VersionHt
                }
            }
            ParseState::VersionHt => {
                if input != b'T' {
                    self.fail("invalid http version, 'T' is expected")
                } else {
                    ParseState::VersionHtt
                }
            }
            ParseState::VersionHtt => {
                if input != b'T' {
                    self.fail("invalid http version, 'T' is expected")
                } else {
                    ParseState::VersionHttp
                }
            }
            ParseState::VersionHttp => {
                if input != b'P' {
                    self.fail("invalid http version, 'P' is expected")
                } else {
                    ParseState::VersionSlash
                }
            }
            ParseState::VersionSlash => {
                if input != b'/' {
                    self.fail("invalid http version, '/' is expected")
                } else {
                    ParseState::VersionMajorStart
                }
            }
            ParseState::VersionMajorStart => {
                if !is_digit(input) {
                    self.fail("invalid http version major start, must be digit")
                } else {
                    request.version_major = (input - b'0') as u32;
                    if request.version_major > 1 {
                        self.fail("unsupported http version")
                    } else {
                        ParseState::VersionMajor
                    }
                }
            }
            ParseState::VersionMajor => {
                if input == b'.' {
                    ParseState::VersionMinorStart
                } else if !is_digit(input) {
                    self.fail("invalid http version major, must be digit")
                } else {
                    request.version_major = request.version_major * 10 + (input - b'0') as u32;
                    if request.version_major > 1 {
                        self.fail("unsupported http version")
                    } else {
                        ParseState::VersionMajor
                    }
                }
            }
            ParseState::VersionMinorStart => {
                if !is_digit(input) {
                    self.fail("invalid http version minor start, must be digit")
                } else {
                    request.version_minor = (input - b'0') as u32;
                    ParseState::VersionMinor
                }
            }
            ParseState::VersionMinor => {
                if input == b'\r' {
                    ParseState::StatusLineLf
                } else if input == b'\n' {
                    ParseState::FirstHeaderLineStart
                } else if is_sp(input) {
                    ParseState::StatusLineCr
                } else if !is_digit(input) {
                    self.fail("invalid http version minor, must be digit")
                } else {
                    request.version_minor = request.version_minor * 10 + (input - b'0') as u32;
                    if request.version_minor > 99 {
                        self.fail("invalid http version minor, too big")
                    } else {
                        ParseState::VersionMinor
                    }
                }
            }
            ParseState::StatusLineCr => {
                if is_sp(input) {
                    ParseState::StatusLineCr
                } else if input == b'\r' {
                    ParseState::StatusLineLf
                } else if input == b'\n' {
                    ParseState::FirstHeaderLineStart
                } else {
                    self.fail("newline is expected")
                }
            }
            ParseState::StatusLineLf => {
                if input != b'\n' {
                    self.fail("newline is expected")
                } else {
                    ParseState::FirstHeaderLineStart
                }
            }
            // The first header line cannot be a continuation
            ParseState::FirstHeaderLineStart => {
                request.keep_alive = request.version_major == 1 && request.version_minor >= 1;
                if input == b'\r' {
                    ParseState::FinalLf
                } else if input == b'\n' {
                    ParseState::Good
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    self.fail("invalid character at header line start")
                } else {
                    self.header_key_start = pos;
                    buf[pos] = to_lower(input);
                    ParseState::HeaderName
                }
            }
            ParseState::HeaderLineStart => {
                if is_sp(input) {
                    // Continuation: the next line extends the previous value
                    buf[self.header_value_write_pos] = input;
                    self.header_value_write_pos += 1;
                    ParseState::HeaderValueContinuation
                } else if let Err(reason) = self.process_ready_header(buf, request) {
                    self.fail(reason)
                } else if input == b'\r' {
                    ParseState::FinalLf
                } else if input == b'\n' {
                    ParseState::Good
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    self.fail("invalid character at header line start")
                } else {
                    self.header_key_start = pos;
                    buf[pos] = to_lower(input);
                    ParseState::HeaderName
                }
            }
            ParseState::HeaderName => {
                // Relaxed per RFC 7230 §3.2.4: whitespace may precede the colon
                if is_sp(input) {
                    self.header_key_finish = pos;
                    ParseState::HeaderColon
                } else if input == b':' {
                    self.header_key_finish = pos;
                    self.mark_cms_list(buf);
                    ParseState::SpaceBeforeHeaderValue
                } else if !is_char(input) || is_ctl(input) || is_tspecial(input) {
                    self.fail("invalid character at header name")
                } else {
                    buf[pos] = to_lower(input);
                    ParseState::HeaderName
                }
            }
            ParseState::HeaderColon => {
                if is_sp(input) {
                    ParseState::HeaderColon
                } else if input != b':' {
                    self.fail("':' expected")
                } else {
                    self.mark_cms_list(buf);
                    ParseState::SpaceBeforeHeaderValue
                }
            }
            ParseState::SpaceBeforeHeaderValue => {
                if is_sp(input) {
                    ParseState::SpaceBeforeHeaderValue
                } else {
                    self.header_value_start = pos;
                    self.header_value_write_pos = pos;
                    self.header_value_byte(buf, pos, request)
                }
            }
            ParseState::HeaderValue => self.header_value_byte(buf, pos, request),
            ParseState::HeaderValueContinuation => {
                if input == b'\r' {
                    ParseState::HeaderLf
                } else if input == b'\n' {
                    ParseState::HeaderLineStart
                } else if is_ctl(input) {
                    self.fail("invalid character (control) in header value")
                } else if self.header_cms_list && input == b',' {
                    if let Err(reason) = self.process_ready_header(buf, request) {
                        self.fail(reason)
                    } else {
                        self.header_value_start = pos + 1;
                        ParseState::SpaceBeforeHeaderValue
                    }
                } else {
                    buf[self.header_value_write_pos] = input;
                    self.header_value_write_pos += 1;
                    ParseState::HeaderValueContinuation
                }
            }
            ParseState::HeaderLf => {
                if input != b'\n' {
                    self.fail("expecting newline")
                } else {
                    ParseState::HeaderLineStart
                }
            }
            ParseState::FinalLf => {
                if input != b'\n' {
                    self.fail("expecting final newline")
                } else {
                    ParseState::Good
                }
            }
            ParseState::Good | ParseState::Bad => self.fail("invalid request parser state"),
        };

        self.state = next;
        next
    }

    fn header_value_byte(&mut self, buf: &mut [u8], pos: usize, request: &mut Request) -> ParseState {
        let input = buf[pos];

        if input == b'\r' {
            self.header_value_write_pos = pos;
            ParseState::HeaderLf
        } else if input == b'\n' {
            self.header_value_write_pos = pos;
            ParseState::HeaderLineStart
        } else if is_ctl(input) {
            self.fail("invalid character (control) in header value")
        } else if self.header_cms_list && input == b',' {
            self.header_value_write_pos = pos;
            if let Err(reason) = self.process_ready_header(buf, request) {
                return self.fail(reason);
            }
            self.header_value_start = pos + 1;
            ParseState::SpaceBeforeHeaderValue
        } else {
            ParseState::HeaderValue
        }
    }

    fn mark_cms_list(&mut self, buf: &[u8]) {
        // Other comma-separated headers can be added here when needed
        let key = &buf[self.header_key_start..self.header_key_finish];
        self.header_cms_list = key == b"connection" || key == b"transfer-encoding";
    }

    fn process_ready_header(
        &mut self,
        buf: &mut [u8],
        request: &mut Request,
    ) -> Result<(), &'static str> {
        // The machine never backtracks, so trailing whitespace is trimmed here
        let mut finish = self.header_value_write_pos;
        while finish > self.header_value_start && is_sp(buf[finish - 1]) {
            finish -= 1;
        }

        if self.header_cms_list && finish == self.header_value_start {
            // Empty is a NOP in a CMS list, like "  ,,keep-alive"
            return Ok(());
        }

        request.process_header(
            buf,
            self.header_key_start..self.header_key_finish,
            self.header_value_start..finish,
        )
    }
}

#[cfg(test)]
pub(crate) mod harness {
    use super::*;

    /// Synchronous stand-in for a connection: a pre-filled buffer and the
    /// parse phase of the connection loop, without any I/O.
    pub(crate) struct TestClient {
        pub(crate) buffer: RequestBuffer,
        pub(crate) parser: Parser,
        pub(crate) request: Request,
        max_header_size: usize,
    }

    impl TestClient {
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            Self::with_limits(4096, 2048, value)
        }

        pub(crate) fn with_limits<V: AsRef<[u8]>>(
            capacity: usize,
            max_header_size: usize,
            value: V,
        ) -> Self {
            TestClient {
                buffer: RequestBuffer::from(capacity, value),
                parser: Parser::new(),
                request: Request::new(),
                max_header_size,
            }
        }

        pub(crate) fn parse(&mut self) -> Result<(), ErrorKind> {
            self.parser.reset();
            self.request.reset();
            let header_limit = self.buffer.header_limit(self.max_header_size);

            loop {
                if self.buffer.read_pos() == header_limit {
                    return Err(ErrorKind::HeaderBlockTooLarge);
                }
                if self.buffer.is_drained() {
                    return Err(ErrorKind::Parse("unexpected end of input"));
                }

                let pos = self.buffer.read_pos();
                let state = self.parser.consume(self.buffer.bytes_mut(), pos, &mut self.request);
                self.buffer.consume_byte();

                match state {
                    ParseState::Good => return Ok(()),
                    ParseState::Bad => return Err(ErrorKind::Parse(self.parser.parse_error)),
                    _ => {}
                }
            }
        }
    }
}
