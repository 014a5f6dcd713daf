//! Staged HTTP response writer.
//!
//! The writer enforces the only legal emission order: status line, then
//! headers, then body. Output accumulates in a per-connection buffer that is
//! flushed when it fills and at the end of request handling.

use crate::{
    errors::WriteError,
    http::types::reason_phrase,
};
use std::{io, sync::Arc};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Result of every [`ResponseWriter`] operation.
pub type WriteResult = Result<(), WriteError>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum WriterState {
    /// Handler not active or already finished.
    NoWrite,
    ExpectStatus,
    ExpectHeaders,
    ExpectBody,
}

/// Builds one HTTP response for the current request.
///
/// Created by the connection loop and handed to the
/// [`Handler`](crate::Handler). Calling an operation in a state that does
/// not admit it leaves the output untouched and returns the failure
/// indicator.
///
/// `write_date`, `write_server`, `write_content_length`,
/// `write_other_header` and `write` all promote an untouched writer through
/// `write_status(200)` first. The first body write closes the header block,
/// injecting `server: crab` and the cached `date:` unless the handler wrote
/// its own.
///
/// # Examples
/// ```no_run
/// # async fn handle(wr: &mut crab_web::ResponseWriter<'_>) -> crab_web::WriteResult {
/// wr.write_status(200)?;
/// wr.write_other_header(b"content-type", b"text/plain; charset=utf-8")?;
/// wr.write_content_length(12)?;
/// wr.write(b"Hello, Crab!").await
/// # }
/// ```
pub struct ResponseWriter<'a> {
    stream: &'a mut (dyn AsyncWrite + Unpin + Send),
    out: &'a mut Vec<u8>,
    capacity: usize,
    version_major: u32,
    version_minor: u32,
    date: Arc<String>,

    state: WriterState,
    date_written: bool,
    server_written: bool,
    // -1 means not declared
    content_length_declared: i64,
    body_bytes_written: i64,
}

impl<'a> ResponseWriter<'a> {
    pub(crate) fn new(
        stream: &'a mut (dyn AsyncWrite + Unpin + Send),
        out: &'a mut Vec<u8>,
        capacity: usize,
        version: (u32, u32),
        date: Arc<String>,
    ) -> Self {
        out.clear();

        ResponseWriter {
            stream,
            out,
            capacity,
            version_major: version.0,
            version_minor: version.1,
            date,

            state: WriterState::ExpectStatus,
            date_written: false,
            server_written: false,
            content_length_declared: -1,
            body_bytes_written: 0,
        }
    }

    /// Emits `HTTP/<major>.<minor> <code> <reason>\r\n`.
    ///
    /// Valid exactly once, before any other operation.
    pub fn write_status(&mut self, code: u16) -> WriteResult {
        if self.state != WriterState::ExpectStatus {
            return Err(WriteError::InvalidState);
        }

        self.out.extend_from_slice(b"HTTP/");
        write_decimal(self.out, self.version_major as u64);
        self.out.push(b'.');
        write_decimal(self.out, self.version_minor as u64);
        self.out.push(b' ');
        write_decimal(self.out, code as u64);
        self.out.push(b' ');
        self.out.extend_from_slice(reason_phrase(code).as_bytes());
        self.out.extend_from_slice(b"\r\n");

        self.state = WriterState::ExpectHeaders;
        Ok(())
    }

    /// Emits a `date:` header. Legal once; suppresses the defaulted date.
    pub fn write_date(&mut self, date: &[u8]) -> WriteResult {
        if self.state == WriterState::ExpectStatus {
            self.write_status(200)?;
        }
        if self.state != WriterState::ExpectHeaders {
            return Err(WriteError::InvalidState);
        }
        if self.date_written {
            return Err(WriteError::DuplicateHeader);
        }

        self.date_written = true;
        self.out.extend_from_slice(b"date: ");
        self.out.extend_from_slice(date);
        self.out.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Emits a `server:` header. Legal once; suppresses the defaulted server.
    pub fn write_server(&mut self, server: &[u8]) -> WriteResult {
        if self.state == WriterState::ExpectStatus {
            self.write_status(200)?;
        }
        if self.state != WriterState::ExpectHeaders {
            return Err(WriteError::InvalidState);
        }
        if self.server_written {
            return Err(WriteError::DuplicateHeader);
        }

        self.server_written = true;
        self.out.extend_from_slice(b"server: ");
        self.out.extend_from_slice(server);
        self.out.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Declares the body length and emits `content-length:`. Legal once.
    pub fn write_content_length(&mut self, length: i64) -> WriteResult {
        if self.state == WriterState::ExpectStatus {
            self.write_status(200)?;
        }
        if self.state != WriterState::ExpectHeaders {
            return Err(WriteError::InvalidState);
        }
        if length < 0 {
            return Err(WriteError::InvalidContentLength);
        }
        if self.content_length_declared >= 0 {
            return Err(WriteError::DuplicateHeader);
        }

        self.content_length_declared = length;
        self.out.extend_from_slice(b"content-length: ");
        write_decimal(self.out, length as u64);
        self.out.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Emits an arbitrary header line. No deduplication.
    pub fn write_other_header(&mut self, key: &[u8], value: &[u8]) -> WriteResult {
        if self.state == WriterState::ExpectStatus {
            self.write_status(200)?;
        }
        if self.state != WriterState::ExpectHeaders {
            return Err(WriteError::InvalidState);
        }

        self.out.extend_from_slice(key);
        self.out.extend_from_slice(b": ");
        self.out.extend_from_slice(value);
        self.out.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Appends body bytes.
    ///
    /// The first call closes the header block: `server: crab` and the cached
    /// `date:` are injected unless already written, then the blank line. A
    /// body without a declared content length fails with
    /// [`WriteError::ContentLengthRequired`]; bytes beyond the declared
    /// length fail with [`WriteError::BodyOverflow`]. Flushes to the socket
    /// whenever the output buffer is full.
    pub async fn write(&mut self, data: &[u8]) -> WriteResult {
        if self.state == WriterState::ExpectStatus {
            self.write_status(200)?;
        }
        if self.state == WriterState::ExpectHeaders {
            if !self.server_written {
                self.out.extend_from_slice(b"server: crab\r\n");
                self.server_written = true;
            }
            if !self.date_written {
                self.out.extend_from_slice(b"date: ");
                self.out.extend_from_slice(self.date.as_bytes());
                self.out.extend_from_slice(b"\r\n");
                self.date_written = true;
            }
            if self.content_length_declared < 0 {
                // Chunked response framing is not supported
                return Err(WriteError::ContentLengthRequired);
            }
            self.out.extend_from_slice(b"\r\n");
            self.state = WriterState::ExpectBody;
        }
        if self.state != WriterState::ExpectBody {
            return Err(WriteError::InvalidState);
        }

        if self.body_bytes_written + data.len() as i64 > self.content_length_declared {
            return Err(WriteError::BodyOverflow);
        }
        self.out.extend_from_slice(data);
        self.body_bytes_written += data.len() as i64;

        if self.out.len() >= self.capacity {
            self.flush_out().await?;
        }
        Ok(())
    }

    /// Drains the output buffer and retires the writer. Called by the
    /// connection loop after the handler returns.
    pub(crate) async fn finish(&mut self) -> io::Result<()> {
        self.state = WriterState::NoWrite;
        self.flush_out().await
    }

    async fn flush_out(&mut self) -> io::Result<()> {
        if !self.out.is_empty() {
            self.stream.write_all(self.out).await?;
            self.out.clear();
        }
        Ok(())
    }
}

// Fills a scratch array from the end, then copies the used span. No heap.
const fn number_to_bytes(mut n: u64) -> ([u8; 20], usize) {
    let mut buffer = [b'0'; 20];
    let mut i = 20;

    if n == 0 {
        return (buffer, 19);
    }

    while n > 0 {
        i -= 1;
        buffer[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }

    (buffer, i)
}

#[inline(always)]
fn write_decimal(out: &mut Vec<u8>, n: u64) {
    let (buffer, start) = number_to_bytes(n);
    out.extend_from_slice(&buffer[start..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::str_op;

    const TEST_DATE: &str = "Tue, 15 Nov 2020 12:45:26 GMT";

    fn test_date() -> Arc<String> {
        Arc::new(TEST_DATE.to_string())
    }

    struct Fixture {
        sink: Vec<u8>,
        out: Vec<u8>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture { sink: Vec::new(), out: Vec::with_capacity(4096) }
        }

        fn writer(&mut self) -> ResponseWriter<'_> {
            Self::writer_with(&mut self.sink, &mut self.out, 4096, (1, 1))
        }

        fn writer_with<'a>(
            sink: &'a mut Vec<u8>,
            out: &'a mut Vec<u8>,
            capacity: usize,
            version: (u32, u32),
        ) -> ResponseWriter<'a> {
            ResponseWriter::new(sink, out, capacity, version, test_date())
        }
    }

    #[test]
    fn number_formatting() {
        #[rustfmt::skip]
        let cases: [(u64, &str); 5] = [
            (0, "0"),
            (7, "7"),
            (200, "200"),
            (4096, "4096"),
            (u64::MAX, "18446744073709551615"),
        ];

        for (n, expected) in cases {
            let mut out = Vec::new();
            write_decimal(&mut out, n);
            assert_eq!(str_op(&out), expected);
        }
    }

    #[tokio::test]
    async fn status_line() {
        #[rustfmt::skip]
        let cases = [
            ((1, 1), 200, "HTTP/1.1 200 OK\r\n"),
            ((1, 0), 200, "HTTP/1.0 200 OK\r\n"),
            ((1, 1), 404, "HTTP/1.1 404 Not Found\r\n"),
            ((1, 1), 299, "HTTP/1.1 299 OK\r\n"),
        ];

        for (version, code, expected) in cases {
            let mut sink = Vec::new();
            let mut out = Vec::new();
            let mut wr = Fixture::writer_with(&mut sink, &mut out, 4096, version);

            wr.write_status(code).unwrap();
            wr.finish().await.unwrap();
            assert_eq!(str_op(&sink), expected);
        }
    }

    #[tokio::test]
    async fn scenario_hello_crab() {
        let mut f = Fixture::new();
        {
            let mut wr = f.writer();
            wr.write_status(200).unwrap();
            wr.write_content_length(12).unwrap();
            wr.write(b"Hello, Crab!").await.unwrap();
            wr.finish().await.unwrap();
        }

        // Defaults are injected when the body starts, after the handler's
        // own header lines
        assert_eq!(
            str_op(&f.sink),
            format!(
                "HTTP/1.1 200 OK\r\ncontent-length: 12\r\nserver: crab\r\n\
                 date: {TEST_DATE}\r\n\r\nHello, Crab!"
            )
        );
    }

    #[tokio::test]
    async fn custom_server_and_date_suppress_defaults() {
        let mut f = Fixture::new();
        {
            let mut wr = f.writer();
            wr.write_status(200).unwrap();
            wr.write_server(b"custom").unwrap();
            wr.write_date(b"Thu, 26 Nov 2020 19:32:13 GMT").unwrap();
            wr.write_content_length(2).unwrap();
            wr.write(b"ok").await.unwrap();
            wr.finish().await.unwrap();
        }

        assert_eq!(
            str_op(&f.sink),
            "HTTP/1.1 200 OK\r\nserver: custom\r\ndate: Thu, 26 Nov 2020 19:32:13 GMT\r\n\
             content-length: 2\r\n\r\nok"
        );
    }

    #[tokio::test]
    async fn auto_promotes_to_status_200() {
        let mut f = Fixture::new();
        {
            let mut wr = f.writer();
            // No explicit status; the first header call promotes
            wr.write_server(b"crab").unwrap();
            wr.write_content_length(0).unwrap();
            wr.write(b"").await.unwrap();
            wr.finish().await.unwrap();
        }

        let text = str_op(&f.sink);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\nserver: crab\r\n"));
        assert!(text.contains("content-length: 0\r\n"));
        assert!(text.contains(&format!("date: {TEST_DATE}\r\n")));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn other_headers_in_handler_order() {
        let mut f = Fixture::new();
        {
            let mut wr = f.writer();
            wr.write_status(200).unwrap();
            wr.write_other_header(b"x-first", b"1").unwrap();
            wr.write_other_header(b"x-second", b"2").unwrap();
            // No deduplication
            wr.write_other_header(b"x-first", b"3").unwrap();
            wr.finish().await.unwrap();
        }

        assert_eq!(
            str_op(&f.sink),
            "HTTP/1.1 200 OK\r\nx-first: 1\r\nx-second: 2\r\nx-first: 3\r\n"
        );
    }

    #[tokio::test]
    async fn misuse_indicators() {
        let mut f = Fixture::new();
        let mut wr = f.writer();

        wr.write_status(200).unwrap();
        assert_eq!(wr.write_status(200), Err(WriteError::InvalidState));

        wr.write_date(TEST_DATE.as_bytes()).unwrap();
        assert_eq!(
            wr.write_date(TEST_DATE.as_bytes()),
            Err(WriteError::DuplicateHeader)
        );

        wr.write_server(b"crab").unwrap();
        assert_eq!(wr.write_server(b"crab"), Err(WriteError::DuplicateHeader));

        assert_eq!(wr.write_content_length(-1), Err(WriteError::InvalidContentLength));
        wr.write_content_length(1).unwrap();
        assert_eq!(wr.write_content_length(1), Err(WriteError::DuplicateHeader));

        wr.write(b"x").await.unwrap();
        // The header block is closed once the body starts
        assert_eq!(wr.write_status(200), Err(WriteError::InvalidState));
        assert_eq!(wr.write_other_header(b"late", b"1"), Err(WriteError::InvalidState));
        assert_eq!(wr.write_date(b"d"), Err(WriteError::InvalidState));
    }

    #[tokio::test]
    async fn content_length_policing() {
        let mut f = Fixture::new();
        let mut wr = f.writer();

        wr.write_content_length(5).unwrap();
        wr.write(b"ab").await.unwrap();
        wr.write(b"cde").await.unwrap();
        // The declared length is exhausted
        assert_eq!(wr.write(b"f").await, Err(WriteError::BodyOverflow));
        // Zero-length appends stay legal
        assert_eq!(wr.write(b"").await, Ok(()));
    }

    #[tokio::test]
    async fn body_requires_declared_length() {
        let mut f = Fixture::new();
        let mut wr = f.writer();

        wr.write_status(200).unwrap();
        assert_eq!(wr.write(b"data").await, Err(WriteError::ContentLengthRequired));
    }

    #[tokio::test]
    async fn flushes_when_buffer_fills() {
        let mut sink = Vec::new();
        let mut out = Vec::with_capacity(64);
        {
            let mut wr = Fixture::writer_with(&mut sink, &mut out, 64, (1, 1));
            wr.write_content_length(200).unwrap();

            // Headers alone exceed the tiny buffer, so the first body write
            // pushes everything to the socket
            wr.write(&[b'a'; 100]).await.unwrap();
            assert!(staging_drained(&wr));
            wr.write(&[b'b'; 100]).await.unwrap();
            wr.finish().await.unwrap();
        }

        let text = str_op(&sink);
        assert!(text.contains("content-length: 200\r\n"));
        assert!(text.ends_with(&format!("{}{}", "a".repeat(100), "b".repeat(100))));
    }

    fn staging_drained(wr: &ResponseWriter<'_>) -> bool {
        // A forced flush leaves the staging buffer empty
        wr.out.is_empty()
    }

    #[tokio::test]
    async fn finish_retires_writer() {
        let mut f = Fixture::new();
        let mut wr = f.writer();

        wr.write_status(204).unwrap();
        wr.finish().await.unwrap();
        assert_eq!(wr.write_other_header(b"x", b"y"), Err(WriteError::InvalidState));
        assert_eq!(wr.write(b"z").await, Err(WriteError::InvalidState));
    }
}
