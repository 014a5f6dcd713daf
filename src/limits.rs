//! Server configuration limits
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Memory overflows
//! - Header flooding
//! - Unbounded buffering of slow or malicious clients
//!
//! # Memory Consumption
//!
//! Each active connection pre-allocates exactly
//! [`incoming_buffer_size`](ServerLimits::incoming_buffer_size) +
//! [`outgoing_buffer_size`](ServerLimits::outgoing_buffer_size) bytes plus a
//! small fixed overhead for the parser and request structures. Scaling is
//! linear and transparent.
//!
//! # Examples
//!
//! ```no_run
//! # crab_web::impt_default_handler! {MyHandler}
//! use crab_web::{limits::ServerLimits, Server};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .limits(ServerLimits {
//!             max_header_size: 4 * 1024, // Larger header blocks for cookie-heavy APIs
//!             incoming_buffer_size: 8 * 1024,
//!             ..ServerLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Buffer sizes and protocol limits applied to every connection.
///
/// The input buffer is a working region, not a pure read buffer: the parser
/// lowercases header names and decodes URI percent-escapes directly in it.
/// [`max_header_size`](Self::max_header_size) must therefore fit into
/// [`incoming_buffer_size`](Self::incoming_buffer_size); the builder checks
/// this at startup.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Per-connection input buffer capacity in bytes (default: `4096`).
    ///
    /// Holds the unconsumed tail of the TCP stream. Unconsumed bytes are
    /// shifted back to the buffer start between requests whenever the
    /// remaining window could not fit another maximum-size header block.
    pub incoming_buffer_size: usize,

    /// Per-connection output buffer capacity in bytes (default: `4096`).
    ///
    /// Response bytes accumulate here and are flushed to the socket when the
    /// buffer fills and at the end of each request.
    pub outgoing_buffer_size: usize,

    /// Maximum size of a single request's header block in bytes
    /// (default: `2048`).
    ///
    /// The header block is the request-line plus all header lines up to and
    /// including the terminating blank line. Exceeding the limit is fatal for
    /// the connection.
    pub max_header_size: usize,

    /// Refresh cadence of the shared `date:` header value
    /// (default: `500 ms`).
    ///
    /// A single background task re-formats the RFC 1123 date on this
    /// interval; response writers copy the cached bytes instead of formatting
    /// per request.
    pub date_refresh_interval: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            incoming_buffer_size: 4096,
            outgoing_buffer_size: 4096,
            max_header_size: 2048,
            date_refresh_interval: Duration::from_millis(500),

            _priv: (),
        }
    }
}
