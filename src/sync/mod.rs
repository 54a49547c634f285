//! Blocking-style adapters over the connection's reply handlers.
//!
//! The connection reports replies through handler callbacks on its read
//! loop. [`BindSync`] and [`QuerySync`] turn those callbacks into a single
//! awaitable outcome, with cancellation through a [`Context`](crate::Context).

mod bind;
mod query;

pub use bind::BindSync;
pub use query::QuerySync;
