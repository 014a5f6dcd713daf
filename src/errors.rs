use std::{error, fmt, io, mem};

/// Connection-fatal errors observed by the connection loop.
///
/// None of these produce a response; the specific reason is surfaced through
/// tracing and the connection is closed.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    /// The parser reached its `Bad` state; carries the `parse_error` text.
    Parse(&'static str),
    /// The header block exceeded `max_header_size` before its terminator.
    HeaderBlockTooLarge,
    /// Read/write/EOF on the underlying socket.
    Io(IoError),
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Parse(reason) => f.write_str(reason),
            ErrorKind::HeaderBlockTooLarge => f.write_str("header block too large"),
            ErrorKind::Io(err) => write!(f, "{}", err.0),
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Failure indicator returned by [`ResponseWriter`](crate::ResponseWriter)
/// operations.
///
/// A writer operation invoked in a state that does not admit it is a no-op
/// that returns the indicator; the output buffer is never corrupted. The
/// connection loop escalates an error returned from the handler by closing
/// the connection after the flush, since a partially-written body breaks
/// keep-alive framing.
#[derive(Debug)]
pub enum WriteError {
    /// Operation called in a writer state that does not admit it.
    InvalidState,
    /// A second `date:`, `server:` or `content-length:` for one response.
    DuplicateHeader,
    /// Declared content length was negative.
    InvalidContentLength,
    /// Body write without a declared content length; chunked responses are
    /// not supported.
    ContentLengthRequired,
    /// Body bytes would exceed the declared content length.
    BodyOverflow,
    /// Flushing the output buffer to the socket failed.
    Io(io::Error),
}

impl error::Error for WriteError {}
impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::InvalidState => f.write_str("write in unexpected response state"),
            WriteError::DuplicateHeader => f.write_str("exclusive header written more than once"),
            WriteError::InvalidContentLength => f.write_str("content length must not be negative"),
            WriteError::ContentLengthRequired => {
                f.write_str("body requires a declared content length")
            }
            WriteError::BodyOverflow => f.write_str("body overflow"),
            WriteError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl PartialEq for WriteError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WriteError::Io(a), WriteError::Io(b)) => a.kind() == b.kind(),
            _ => mem::discriminant(self) == mem::discriminant(other),
        }
    }
}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        WriteError::Io(err)
    }
}
