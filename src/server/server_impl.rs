use crate::{
    http::date::DateService,
    limits::ServerLimits,
    server::connection::Client,
    Request, ResponseWriter, WriteResult,
};
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;

/// Processes one request and writes the response.
///
/// The request borrows the connection's input buffer and is only valid for
/// the duration of the call; copy anything you need to keep. The writer's
/// state machine is described on [`ResponseWriter`].
///
/// # Examples
///
/// ```
/// use crab_web::{Handler, Request, ResponseWriter, WriteResult};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, wr: &mut ResponseWriter<'_>, req: &Request) -> WriteResult {
///         if req.path() == b"/ping" {
///             wr.write_status(200)?;
///             wr.write_content_length(4)?;
///             wr.write(b"pong").await
///         } else {
///             wr.write_status(404)?;
///             wr.write_content_length(0)?;
///             wr.write(b"").await
///         }
///     }
/// }
/// ```
pub trait Handler: Sync + Send + 'static {
    /// Handles a parsed request.
    ///
    /// Returning an error closes the connection after the flush; a
    /// partially-written response cannot be followed by another request.
    fn handle(
        &self,
        writer: &mut ResponseWriter<'_>,
        request: &Request,
    ) -> impl Future<Output = WriteResult> + Send;
}

/// An HTTP/1.x server: one accept loop, one independent task per connection.
///
/// # Examples
///
/// ```no_run
/// # crab_web::impt_default_handler! {MyHandler}
/// use crab_web::Server;
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .handler(MyHandler)
///         .build()
///         .launch()
///         .await;
/// }
/// ```
pub struct Server<H: Handler> {
    listener: TcpListener,
    handler: Arc<H>,
    limits: ServerLimits,
}

impl<H: Handler> Server<H> {
    /// Creates a builder for configuring the server.
    pub fn builder() -> ServerBuilder<H> {
        ServerBuilder {
            listener: None,
            handler: None,
            limits: None,
        }
    }

    /// Accepts connections forever, spawning a worker task for each.
    pub async fn launch(self) {
        let date = Arc::new(DateService::start(self.limits.date_refresh_interval));

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(error = %err, "accept failed");
                    continue;
                }
            };

            let handler = self.handler.clone();
            let date = date.clone();
            let limits = self.limits.clone();

            tokio::spawn(async move {
                let mut client = Client::new(handler, stream, date, limits);
                if let Err(err) = client.routine().await {
                    tracing::debug!(%peer, error = %err, "connection closed");
                }
            });
        }
    }
}

/// Builder for [`Server`]. `listener` and `handler` are required.
pub struct ServerBuilder<H: Handler> {
    listener: Option<TcpListener>,
    handler: Option<Arc<H>>,
    limits: Option<ServerLimits>,
}

impl<H: Handler> ServerBuilder<H> {
    /// Sets the TCP listener that accepts connections.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the request handler.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Overrides the default [`ServerLimits`].
    #[inline(always)]
    pub fn limits(mut self, limits: ServerLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Finalizes the builder.
    ///
    /// # Panics
    ///
    /// Panics when:
    /// - The `listener` method was not called.
    /// - The `handler` method was not called.
    /// - `max_header_size` exceeds `incoming_buffer_size`; a header block
    ///   must fit into the input buffer.
    #[track_caller]
    pub fn build(self) -> Server<H> {
        let limits = self.limits.unwrap_or_default();
        assert!(
            limits.max_header_size <= limits.incoming_buffer_size,
            "max_header_size must fit into incoming_buffer_size"
        );

        Server {
            listener: self
                .listener
                .expect("The `listener` method must be called to create"),
            handler: self
                .handler
                .expect("The `handler` method must be called to create"),
            limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::str_op;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    struct Hello;

    impl Handler for Hello {
        async fn handle(&self, wr: &mut ResponseWriter<'_>, req: &Request) -> WriteResult {
            wr.write_status(200)?;
            wr.write_other_header(b"content-type", b"text/plain; charset=utf-8")?;
            wr.write_content_length(12)?;
            if req.query_string().is_empty() {
                wr.write(b"Hello, Crab!").await
            } else {
                wr.write(b"Hello, Cond!").await
            }
        }
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Server::builder().listener(listener).handler(Hello).build();
        let server_task = tokio::spawn(server.launch());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /?query=1 HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let text = str_op(&response);

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("server: crab\r\n"));
        assert!(text.contains("date: "));
        assert!(text.contains("content-length: 12\r\n"));
        assert!(text.ends_with("\r\n\r\nHello, Cond!"));

        server_task.abort();
    }

    #[tokio::test]
    #[should_panic(expected = "The `handler` method must be called to create")]
    async fn build_requires_handler() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _ = Server::<Hello>::builder().listener(listener).build();
    }

    #[test]
    #[should_panic(expected = "max_header_size must fit into incoming_buffer_size")]
    fn build_rejects_oversized_header_limit() {
        let _ = Server::<Hello>::builder()
            .limits(ServerLimits {
                incoming_buffer_size: 1024,
                max_header_size: 2048,
                ..ServerLimits::default()
            })
            .build();
    }
}
