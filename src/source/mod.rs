//! Bundled [`DataSource`](crate::DataSource) implementations.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::{HttpDataSource, HttpSourceConfig};
