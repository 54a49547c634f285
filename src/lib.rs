//! # perfetto-consumer
//!
//! Consumer-side client for a Perfetto-style tracing service.
//!
//! The crate binds the service's consumer port over a local socket,
//! resolves its methods by name, and runs streaming calls behind a simple
//! awaitable API.
//!
//! ## Architecture
//!
//! - **Connection**: multiplexed binary frames over one byte stream, a
//!   writer task and a read loop routing replies by request ID
//! - **Sync adapters**: [`sync::BindSync`] and [`sync::QuerySync`] turn
//!   reply callbacks into one awaitable outcome
//! - **Client**: owns the connection and the method table, exposes
//!   `query` and `close`
//!
//! Every wait takes a [`Context`] carrying a deadline and a cancellation
//! signal.
//!
//! ## Example
//!
//! ```ignore
//! use perfetto_consumer::{Client, Context};
//! use perfetto_consumer::transport::{default_consumer_socket, dial};
//!
//! #[tokio::main]
//! async fn main() -> perfetto_consumer::Result<()> {
//!     let ctx = Context::background();
//!     let stream = dial(&default_consumer_socket()).await?;
//!     let client = Client::connect(&ctx, stream, Default::default()).await?;
//!
//!     client
//!         .query(&ctx, |state| {
//!             println!("{} data sources", state.data_sources.len());
//!             Ok(())
//!         })
//!         .await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod context;
pub mod error;
pub mod protocol;
pub mod sync;
pub mod transport;
pub mod writer;

mod client;

pub use client::{Client, ClientBuilder, ClientConfig, CONSUMER_SERVICE, QUERY_METHOD};
pub use connection::Cleanup;
pub use context::{CancelHandle, Context};
pub use error::{ConsumerError, Result};
