//! The parsed request and the recognised-header post-processor.

use crate::http::{
    parser::Parser,
    types::{is_sp, parse_decimal, to_lower_slice},
};
use memchr::memchr;
use std::ops::Range;

/// A parsed HTTP request.
///
/// All byte-slice fields are zero-copy views of the connection's input
/// buffer and stay valid until the next request on that connection. Handlers
/// that retain values must copy them.
///
/// One instance per connection is reused: scalars are reset and the header
/// sequences are truncated to length zero without releasing their capacity.
#[derive(Debug, PartialEq)]
pub struct Request {
    pub(crate) method: &'static [u8],
    pub(crate) path: &'static [u8],
    pub(crate) query_string: &'static [u8],
    pub(crate) version_major: u32,
    pub(crate) version_minor: u32,
    pub(crate) keep_alive: bool,
    pub(crate) content_length: i64,
    pub(crate) host: Option<&'static [u8]>,
    pub(crate) origin: Option<&'static [u8]>,
    pub(crate) content_type_mime: Option<&'static [u8]>,
    pub(crate) content_type_suffix: Option<&'static [u8]>,
    pub(crate) basic_authorization: Option<&'static [u8]>,

    pub(crate) transfer_encodings: Vec<&'static [u8]>,
    pub(crate) transfer_encoding_chunked: bool,
    pub(crate) headers: Vec<Header>,

    pub(crate) connection_upgrade: bool,
    pub(crate) upgrade_websocket: bool,
    pub(crate) sec_websocket_key: Option<&'static [u8]>,
    pub(crate) sec_websocket_version: Option<&'static [u8]>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct Header {
    pub(crate) name: &'static [u8],
    pub(crate) value: &'static [u8],
}

impl Request {
    pub(crate) fn new() -> Self {
        Request {
            method: b"",
            path: b"",
            query_string: b"",
            version_major: 0,
            version_minor: 0,
            keep_alive: false,
            content_length: -1,
            host: None,
            origin: None,
            content_type_mime: None,
            content_type_suffix: None,
            basic_authorization: None,

            transfer_encodings: Vec::new(),
            transfer_encoding_chunked: false,
            headers: Vec::new(),

            connection_upgrade: false,
            upgrade_websocket: false,
            sec_websocket_key: None,
            sec_websocket_version: None,
        }
    }

    /// Truncates the reusable sequences and clears every scalar.
    pub(crate) fn reset(&mut self) {
        let transfer_encodings = std::mem::take(&mut self.transfer_encodings);
        let headers = std::mem::take(&mut self.headers);

        *self = Request::new();

        self.transfer_encodings = transfer_encodings;
        self.headers = headers;
        self.transfer_encodings.clear();
        self.headers.clear();
    }
}

// Public API
impl Request {
    /// Request method token, case preserved.
    #[inline(always)]
    pub const fn method(&self) -> &[u8] {
        self.method
    }

    /// Percent-decoded path.
    #[inline(always)]
    pub const fn path(&self) -> &[u8] {
        self.path
    }

    /// Raw bytes between `?` and `#`/space; empty when absent, never decoded.
    #[inline(always)]
    pub const fn query_string(&self) -> &[u8] {
        self.query_string
    }

    #[inline(always)]
    pub const fn version_major(&self) -> u32 {
        self.version_major
    }

    #[inline(always)]
    pub const fn version_minor(&self) -> u32 {
        self.version_minor
    }

    /// Whether the connection stays open after the response. Defaults from
    /// the version, overridden by the `connection` header.
    #[inline(always)]
    pub const fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Value of `content-length`; `-1` when the header is absent.
    #[inline(always)]
    pub const fn content_length(&self) -> i64 {
        self.content_length
    }

    #[inline(always)]
    pub const fn host(&self) -> Option<&[u8]> {
        self.host
    }

    #[inline(always)]
    pub const fn origin(&self) -> Option<&[u8]> {
        self.origin
    }

    /// Lowercased MIME part of `content-type`.
    #[inline(always)]
    pub const fn content_type_mime(&self) -> Option<&[u8]> {
        self.content_type_mime
    }

    /// `content-type` parameters after the first `;`, case preserved.
    #[inline(always)]
    pub const fn content_type_suffix(&self) -> Option<&[u8]> {
        self.content_type_suffix
    }

    /// Payload of an `authorization` header using the `Basic` scheme;
    /// `None` for any other scheme.
    #[inline(always)]
    pub const fn basic_authorization(&self) -> Option<&[u8]> {
        self.basic_authorization
    }

    /// Transfer codings other than `identity` and `chunked`, in order.
    #[inline(always)]
    pub fn transfer_encodings(&self) -> &[&[u8]] {
        self.transfer_encodings.as_slice()
    }

    /// True iff `chunked` appeared in `transfer-encoding`.
    #[inline(always)]
    pub const fn transfer_encoding_chunked(&self) -> bool {
        self.transfer_encoding_chunked
    }

    /// `connection: upgrade` was present.
    #[inline(always)]
    pub const fn connection_upgrade(&self) -> bool {
        self.connection_upgrade
    }

    /// `upgrade: websocket` was present.
    #[inline(always)]
    pub const fn upgrade_websocket(&self) -> bool {
        self.upgrade_websocket
    }

    #[inline(always)]
    pub const fn sec_websocket_key(&self) -> Option<&[u8]> {
        self.sec_websocket_key
    }

    #[inline(always)]
    pub const fn sec_websocket_version(&self) -> Option<&[u8]> {
        self.sec_websocket_version
    }

    /// Unrecognised headers as (name, value) pairs in insertion order.
    /// Names are lowercase; recognised headers are not repeated here.
    #[inline]
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers.iter().map(|h| (h.name, h.value))
    }

    /// First unrecognised header with a matching name, case-insensitive.
    /// Linear search.
    #[inline]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }
}

// Header post-processing, invoked by the parser once per complete header
// field or per segment of a comma-separated list header.
impl Request {
    pub(crate) fn process_header(
        &mut self,
        buf: &mut [u8],
        key: Range<usize>,
        value: Range<usize>,
    ) -> Result<(), &'static str> {
        // Keys are already lowercase; these comparisons are by size first
        let key = unsafe { Parser::detach(&buf[key]) };
        let (vs, ve) = (value.start, value.end);

        match key {
            b"content-length" => {
                if self.content_length >= 0 {
                    return Err("content length specified more than once");
                }
                self.content_length =
                    parse_decimal(&buf[vs..ve]).ok_or("content length is not a number")?;
            }
            b"transfer-encoding" => {
                to_lower_slice(&mut buf[vs..ve]);
                match &buf[vs..ve] {
                    b"chunked" => {
                        if self.transfer_encoding_chunked || !self.transfer_encodings.is_empty() {
                            return Err("chunk encoding must be applied last");
                        }
                        self.transfer_encoding_chunked = true;
                    }
                    // Identity is transparent to the user, like chunked
                    b"identity" => {}
                    _ => {
                        if self.transfer_encoding_chunked {
                            return Err("chunk encoding must be applied last");
                        }
                        self.transfer_encodings
                            .push(unsafe { Parser::detach(&buf[vs..ve]) });
                    }
                }
            }
            b"host" => self.host = Some(unsafe { Parser::detach(&buf[vs..ve]) }),
            b"origin" => self.origin = Some(unsafe { Parser::detach(&buf[vs..ve]) }),
            b"content-type" => {
                let (mime, suffix) = parse_content_type_value(buf, vs..ve);
                self.content_type_mime = Some(mime);
                self.content_type_suffix = suffix;
            }
            b"connection" => {
                to_lower_slice(&mut buf[vs..ve]);
                match &buf[vs..ve] {
                    b"close" => self.keep_alive = false,
                    b"keep-alive" => self.keep_alive = true,
                    b"upgrade" => self.connection_upgrade = true,
                    _ => return Err("invalid 'connection' header value"),
                }
            }
            b"authorization" => {
                self.basic_authorization =
                    parse_authorization_basic(unsafe { Parser::detach(&buf[vs..ve]) });
            }
            b"upgrade" => {
                to_lower_slice(&mut buf[vs..ve]);
                match &buf[vs..ve] {
                    b"websocket" => self.upgrade_websocket = true,
                    _ => return Err("invalid 'upgrade' header value"),
                }
            }
            b"sec-websocket-key" => {
                self.sec_websocket_key = Some(unsafe { Parser::detach(&buf[vs..ve]) });
            }
            b"sec-websocket-version" => {
                self.sec_websocket_version = Some(unsafe { Parser::detach(&buf[vs..ve]) });
            }
            _ => {
                let value = unsafe { Parser::detach(&buf[vs..ve]) };
                self.headers.push(Header { name: key, value });
            }
        }

        Ok(())
    }
}

/// `"Text/Html; charset=UTF-8"` -> `(b"text/html", Some(b"charset=UTF-8"))`.
///
/// Splits on the first `;` only; whitespace around the split is trimmed. The
/// MIME part is lowercased in place, the suffix keeps its case.
fn parse_content_type_value(
    buf: &mut [u8],
    value: Range<usize>,
) -> (&'static [u8], Option<&'static [u8]>) {
    let (vs, ve) = (value.start, value.end);

    match memchr(b';', &buf[vs..ve]) {
        None => {
            to_lower_slice(&mut buf[vs..ve]);
            (unsafe { Parser::detach(&buf[vs..ve]) }, None)
        }
        Some(split) => {
            let mut mime_end = vs + split;
            while mime_end > vs && is_sp(buf[mime_end - 1]) {
                mime_end -= 1;
            }
            to_lower_slice(&mut buf[vs..mime_end]);

            let mut suffix_start = vs + split + 1;
            while suffix_start < ve && is_sp(buf[suffix_start]) {
                suffix_start += 1;
            }

            (
                unsafe { Parser::detach(&buf[vs..mime_end]) },
                Some(unsafe { Parser::detach(&buf[suffix_start..ve]) }),
            )
        }
    }
}

/// `"Basic dXNlcjpwYXNz"` -> `Some(b"dXNlcjpwYXNz")`; `None` for any other
/// scheme. The scheme match is case-insensitive.
fn parse_authorization_basic(value: &'static [u8]) -> Option<&'static [u8]> {
    if value.len() < 6 || !value[..5].eq_ignore_ascii_case(b"basic") || !is_sp(value[5]) {
        return None;
    }

    let mut start = 6;
    while start < value.len() && is_sp(value[start]) {
        start += 1;
    }
    Some(&value[start..])
}
