//! Per-connection request loop.
//!
//! Each accepted connection gets its own [`Client`]: an input buffer the
//! parser works in, an outgoing buffer the writer fills, and a single
//! [`Request`] reused across keep-alive requests.

use crate::{
    errors::ErrorKind,
    http::{
        date::DateService,
        parser::{ParseState, Parser, RequestBuffer},
        request::Request,
        response::ResponseWriter,
    },
    limits::ServerLimits,
    server::server_impl::Handler,
};
use memchr::memchr_iter;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub(crate) struct Client<H, S> {
    handler: Arc<H>,
    stream: S,
    buffer: RequestBuffer,
    parser: Parser,
    request: Request,
    out: Vec<u8>,
    date: Arc<DateService>,
    limits: ServerLimits,
}

impl<H, S> Client<H, S>
where
    H: Handler,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(
        handler: Arc<H>,
        stream: S,
        date: Arc<DateService>,
        limits: ServerLimits,
    ) -> Self {
        Client {
            handler,
            stream,
            buffer: RequestBuffer::new(limits.incoming_buffer_size),
            parser: Parser::new(),
            request: Request::new(),
            out: Vec::with_capacity(limits.outgoing_buffer_size),
            date,
            limits,
        }
    }

    /// Read, parse, handle and flush until the connection ends.
    ///
    /// Any parse, completeness or transport error ends the loop; so does an
    /// error returned from the handler, since a partially-written response
    /// cannot be followed by another one.
    pub(crate) async fn routine(&mut self) -> Result<(), ErrorKind> {
        loop {
            self.read_request().await?;

            let date = self.date.current();
            let mut writer = ResponseWriter::new(
                &mut self.stream,
                &mut self.out,
                self.limits.outgoing_buffer_size,
                (self.request.version_major(), self.request.version_minor()),
                date,
            );

            let handled = self.handler.handle(&mut writer, &self.request).await;
            writer.finish().await?;

            if let Err(err) = handled {
                tracing::debug!(error = %err, "handler failed, closing connection");
                return Ok(());
            }
            if !self.request.keep_alive() {
                return Ok(());
            }
        }
    }

    /// Parses one request: completeness pre-check, reset, then the byte loop
    /// to a terminal parser state. On success the read cursor rests past the
    /// final LF of the header block.
    async fn read_request(&mut self) -> Result<(), ErrorKind> {
        self.read_complete().await?;

        self.parser.reset();
        self.request.reset();
        let header_limit = self.buffer.header_limit(self.limits.max_header_size);

        loop {
            if self.buffer.read_pos() == header_limit {
                return Err(ErrorKind::HeaderBlockTooLarge);
            }
            if self.buffer.is_drained() {
                self.buffer.fill_from(&mut self.stream).await?;
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

    /// Refills until the unconsumed window holds a header-block terminator,
    /// or fails once the window reaches `max_header_size` without one.
    async fn read_complete(&mut self) -> Result<(), ErrorKind> {
        self.buffer.prepare_for_next_request(self.limits.max_header_size);

        let mut scanned: usize = 0;
        loop {
            {
                let window = self.buffer.unconsumed();
                // Restart slightly before the fresh bytes to catch a
                // terminator spanning the previous tail
                if contains_block_terminator(window, scanned.saturating_sub(3)) {
                    return Ok(());
                }
                if window.len() >= self.limits.max_header_size {
                    return Err(ErrorKind::HeaderBlockTooLarge);
                }
                scanned = window.len();
            }

            self.buffer.fill_from(&mut self.stream).await?;
        }
    }
}

/// Whether `window[from..]` holds a CRLF-CRLF or LF-LF sequence, the two
/// terminators the parser accepts.
fn contains_block_terminator(window: &[u8], from: usize) -> bool {
    for lf in memchr_iter(b'\n', &window[from..]) {
        let lf = from + lf;
        if lf >= 1 && window[lf - 1] == b'\n' {
            return true;
        }
        if lf >= 3 && window[lf - 1] == b'\r' && window[lf - 2] == b'\n' && window[lf - 3] == b'\r'
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IoError;
    use crate::http::response::WriteResult;
    use crate::tools::str_op;
    use std::{io, time::Duration};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    #[test]
    fn block_terminator_scan() {
        #[rustfmt::skip]
        let cases = [
            (&b"GET / HTTP/1.1\r\n\r\n"[..], 0, true),
            (b"GET / HTTP/1.1\n\n",         0, true),
            (b"GET / HTTP/1.1\r\n",         0, false),
            (b"GET / HTTP/1.1\r\nHost: x",  0, false),
            (b"",                           0, false),
            (b"\r\n\r\n",                   0, true),
            // Scan resumed after a refill still sees a spanning terminator
            (b"GET / HTTP/1.1\r\n\r\n",     17, true),
        ];

        for (window, from, expected) in cases {
            assert_eq!(
                contains_block_terminator(window, from),
                expected,
                "window {:?} from {from}",
                str_op(window)
            );
        }
    }

    struct EchoPath;

    impl Handler for EchoPath {
        async fn handle(&self, wr: &mut ResponseWriter<'_>, req: &Request) -> WriteResult {
            wr.write_status(200)?;
            wr.write_content_length(req.path().len() as i64)?;
            wr.write(req.path()).await
        }
    }

    fn client(stream: DuplexStream) -> Client<EchoPath, DuplexStream> {
        Client::new(
            Arc::new(EchoPath),
            stream,
            Arc::new(DateService::start(Duration::from_millis(500))),
            ServerLimits::default(),
        )
    }

    async fn drive(requests: &[u8]) -> (Result<(), ErrorKind>, String) {
        let (mut peer, server_side) = tokio::io::duplex(16 * 1024);
        let mut client = client(server_side);

        peer.write_all(requests).await.unwrap();
        peer.shutdown().await.unwrap();

        let result = client.routine().await;
        drop(client);

        let mut collected = Vec::new();
        peer.read_to_end(&mut collected).await.unwrap();
        (result, String::from_utf8(collected).unwrap())
    }

    #[tokio::test]
    async fn keep_alive_serves_requests_in_order() {
        let (result, output) = drive(
            b"GET /first HTTP/1.1\r\nHost: x\r\n\r\n\
              GET /second HTTP/1.1\r\nHost: x\r\n\r\n\
              GET /third HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;

        // The third request asked for teardown, so the loop ends cleanly
        assert_eq!(result, Ok(()));

        let first = output.find("/first").unwrap();
        let second = output.find("/second").unwrap();
        let third = output.find("/third").unwrap();
        assert!(first < second && second < third);
        assert_eq!(output.matches("HTTP/1.1 200 OK\r\n").count(), 3);
    }

    #[tokio::test]
    async fn peer_close_ends_idle_connection() {
        let (result, output) = drive(b"GET /only HTTP/1.1\r\n\r\n").await;

        // Keep-alive connection waits for the next request and observes EOF
        assert_eq!(
            result,
            Err(ErrorKind::Io(IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "end of stream",
            ))))
        );
        assert!(output.contains("/only"));
    }

    #[tokio::test]
    async fn parse_error_terminates_without_response() {
        let (result, output) = drive(b"\x01GET / HTTP/1.1\r\n\r\n").await;

        assert_eq!(
            result,
            Err(ErrorKind::Parse("invalid character at method start"))
        );
        assert_eq!(output, "");
    }

    #[tokio::test]
    async fn oversize_header_block_terminates() {
        let mut request = b"GET / HTTP/1.1\r\nx-big: ".to_vec();
        request.extend_from_slice(&vec![b'a'; 3000]);
        request.extend_from_slice(b"\r\n\r\n");

        let (result, output) = drive(&request).await;
        assert_eq!(result, Err(ErrorKind::HeaderBlockTooLarge));
        assert_eq!(output, "");
    }

    #[tokio::test]
    async fn request_split_across_reads() {
        let (mut peer, server_side) = tokio::io::duplex(16 * 1024);
        let mut client = client(server_side);

        let routine = tokio::spawn(async move { client.routine().await });

        peer.write_all(b"GET /sp").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        peer.write_all(b"lit HTTP/1.1\r\nConnection:").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        peer.write_all(b" close\r\n\r\n").await.unwrap();

        assert_eq!(routine.await.unwrap(), Ok(()));

        let mut response = Vec::new();
        peer.read_to_end(&mut response).await.unwrap();
        assert!(str_op(&response).contains("/split"));
    }
}
