//! crab_web - minimal, performance-oriented HTTP/1.x request server
//!
//! A byte-stream-driven request parser coupled to a staged response writer,
//! built around one reusable input buffer per connection. The parser stores
//! zero-copy slice views of the request fields directly into that buffer,
//! lowercasing header names and decoding URI percent-escapes in place.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections by default
//! - **HTTP/1.0**: keep-alive opt-in via the `connection` header
//!
//! Chunked transfer encoding, WebSocket upgrade completion and request body
//! streaming are recognised on the wire but intentionally not implemented.
//!
//! # Design
//!
//! - **Zero-copy parsing** - request fields borrow the connection's input
//!   buffer and stay valid until the next request on that connection.
//! - **Pre-allocated per-connection memory** - fixed input and output
//!   buffers, one reusable request object, no per-request allocations.
//! - **Staged response writer** - status line, headers and body can only be
//!   emitted in the legal order; `server:`, `date:` and content-length
//!   discipline are enforced for you.
//! - **Shared date cell** - a single background task refreshes the `date:`
//!   header value for all connections.
//!
//! # Quick Start
//!
//! ```no_run
//! use crab_web::{Handler, Request, ResponseWriter, Server, WriteResult};
//! use tokio::net::TcpListener;
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     async fn handle(&self, wr: &mut ResponseWriter<'_>, _: &Request) -> WriteResult {
//!         wr.write_status(200)?;
//!         wr.write_content_length(12)?;
//!         wr.write(b"Hello, Crab!").await
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
pub(crate) mod http {
    pub(crate) mod date;
    pub(crate) mod parser;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::WriteError,
    http::{
        request::Request,
        response::{ResponseWriter, WriteResult},
    },
    server::server_impl::{Handler, Server, ServerBuilder},
};

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use crab_web::{Handler, Request, ResponseWriter, WriteResult};
        struct $name;

        impl Handler for $name {
            async fn handle(&self, wr: &mut ResponseWriter<'_>, _: &Request) -> WriteResult {
                wr.write_status(200)?;
                wr.write_content_length(12)?;
                wr.write(b"Hello world!").await
            }
        }
    };
}
