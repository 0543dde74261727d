//! Forwards pipeline batches to an HTTP endpoint.
//!
//! An [`HttpFlusher`] is built once from a [`Config`]; each `flush` (legacy
//! log groups) or `export` (generic pipeline events) call splits its input
//! into request units and delivers them with bounded concurrency and
//! per-unit retry.

pub mod config;
pub mod convert;
pub mod dispatcher;
pub mod flusher;
pub mod models;
pub mod request;
pub mod retry;
pub mod splitter;
pub mod template;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use flusher::HttpFlusher;
