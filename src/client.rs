//! Client builder and query façade.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the session.
//! The [`Client`] manages the lifecycle:
//! 1. Open a connection over a byte stream
//! 2. Bind the consumer service and wait for its method table
//! 3. Serve queries until [`Client::close`]
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use perfetto_consumer::{Client, Context};
//! use perfetto_consumer::protocol::TracingServiceState;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Context::background().with_timeout(Duration::from_secs(5));
//!     let client = Client::builder()
//!         .max_pending_calls(16)
//!         .connect_path(&ctx, "/tmp/perfetto-consumer")
//!         .await?;
//!
//!     client
//!         .query(&ctx, |state: TracingServiceState| {
//!             for producer in &state.producers {
//!                 println!("{} ({})", producer.name, producer.id);
//!             }
//!             Ok(())
//!         })
//!         .await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::{Cleanup, Connection, ConnectionConfig, MethodTable};
use crate::context::Context;
use crate::error::{ConsumerError, Result};
use crate::protocol::{QueryServiceStateRequest, TracingServiceState};
use crate::sync::{BindSync, QuerySync};
use crate::transport::dial;

/// Name of the service a consumer binds.
pub const CONSUMER_SERVICE: &str = "ConsumerPort";

/// Method returning the service's producers and data sources.
pub const QUERY_METHOD: &str = "QueryServiceState";

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service bound during `connect`.
    pub service_name: String,
    /// Connection and writer settings.
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_name: CONSUMER_SERVICE.to_string(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Builder for configuring and connecting a [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service to bind.
    ///
    /// Default: "ConsumerPort"
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// Set the largest payload accepted in either direction.
    ///
    /// Default: 64 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.connection.max_payload_size = size;
        self
    }

    /// Set the limit of requests waiting for replies.
    ///
    /// When the limit is reached new queries fail with `TooManyPending`.
    /// Default: 256
    pub fn max_pending_calls(mut self, limit: usize) -> Self {
        self.config.connection.max_pending_calls = limit;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.connection.writer.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.connection.writer.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.writer.backpressure_timeout = timeout;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect over an already open stream. See [`Client::connect`].
    pub async fn connect<S>(self, ctx: &Context, stream: S, cleanup: Cleanup) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Client::connect_with_config(ctx, stream, cleanup, self.config).await
    }

    /// Dial the socket at `path` and connect over it.
    pub async fn connect_path(self, ctx: &Context, path: &str) -> Result<Client> {
        Client::connect_path(ctx, path, self.config).await
    }
}

/// A bound session with the tracing service.
///
/// `query` takes `&self`, so one client can serve concurrent queries.
/// `close` consumes the client.
pub struct Client {
    conn: Connection,
    methods: MethodTable,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Bind the consumer service over `stream` with default settings.
    ///
    /// `stream` and `cleanup` belong to the client from this call on. If
    /// connecting fails the stream is closed and `cleanup` has run by the
    /// time the error is returned.
    pub async fn connect<S>(ctx: &Context, stream: S, cleanup: Cleanup) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::connect_with_config(ctx, stream, cleanup, ClientConfig::default()).await
    }

    /// [`Client::connect`] with explicit settings.
    pub async fn connect_with_config<S>(
        ctx: &Context,
        stream: S,
        cleanup: Cleanup,
        config: ClientConfig,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = Connection::open(stream, config.connection, cleanup)?;

        let bind = BindSync::new();
        if let Err(e) = ctx.run(conn.bind(&config.service_name, bind.handler())).await {
            conn.close().await;
            return Err(e);
        }

        let methods = match bind.wait(ctx).await {
            Ok(methods) => methods,
            Err(e) => {
                tracing::debug!(service = %config.service_name, error = %e, "bind failed");
                conn.close().await;
                return Err(e);
            }
        };

        tracing::debug!(
            service = %config.service_name,
            methods = methods.len(),
            "service bound"
        );
        Ok(Self { conn, methods })
    }

    /// Dial the socket at `path` and bind the consumer service.
    pub async fn connect_path(ctx: &Context, path: &str, config: ClientConfig) -> Result<Self> {
        let stream = ctx.run(dial(path)).await?;
        Self::connect_with_config(ctx, stream, Cleanup::noop(), config).await
    }

    /// Query the service state.
    ///
    /// `callback` runs once per state message, in order. Returning an error
    /// from it aborts the query and that error is returned. The callback
    /// never runs after `query` returns.
    pub async fn query<F>(&self, ctx: &Context, callback: F) -> Result<()>
    where
        F: FnMut(TracingServiceState) -> Result<()> + Send + 'static,
    {
        self.stream_call(ctx, QUERY_METHOD, &QueryServiceStateRequest::default(), callback)
            .await
    }

    /// Invoke any bound method and stream its replies into `callback`.
    ///
    /// Fails with [`ConsumerError::MethodNotFound`] before touching the
    /// connection if the service does not expose `method`.
    pub async fn stream_call<Req, Resp, F>(
        &self,
        ctx: &Context,
        method: &str,
        request: &Req,
        callback: F,
    ) -> Result<()>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Send + 'static,
        F: FnMut(Resp) -> Result<()> + Send + 'static,
    {
        let method = self
            .methods
            .get(method)
            .ok_or_else(|| ConsumerError::MethodNotFound(method.to_string()))?;

        let query = QuerySync::new(ctx, callback);
        let request_id = match ctx
            .run(self.conn.invoke(method, request, query.handler()))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                query.abandon();
                return Err(e);
            }
        };

        let _guard = InvocationGuard {
            conn: &self.conn,
            request_id,
        };
        query.wait(ctx).await
    }

    /// Methods exposed by the bound service.
    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains(name)
    }

    /// True once the connection to the service is gone.
    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Close the connection and run the cleanup action.
    pub async fn close(self) {
        self.conn.close().await;
    }
}

/// Aborts an invocation still open when the caller stops waiting.
struct InvocationGuard<'a> {
    conn: &'a Connection,
    request_id: u32,
}

impl Drop for InvocationGuard<'_> {
    fn drop(&mut self) {
        self.conn.abort(self.request_id);
    }
}
