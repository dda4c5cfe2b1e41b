// Pull-consumer client for a sluice stream server.
//
// A `Consumer` never holds a long-lived subscription. Each `fetch` runs one
// bounded pull: a private inbox subscription, an optional local expiry timer and
// heartbeat check, and a request naming the inbox as its reply subject. The
// pull ends when the batch is full, the server reports there is nothing more,
// the request expires, or the connection goes away; every path releases the
// same registrations exactly once.
//
// Messages reach the caller through `Batch` (an async `Stream`) or its
// `BlockingBatch` wrapper. Acknowledgments are published straight to each
// message's ack subject and never block on the pull.
mod admin;
mod batch;
mod client;
pub mod config;
mod consumer;
mod error;
mod message;
mod pull;
mod request;

pub use admin::{AdminClient, StreamAdmin};
pub use batch::{Batch, BlockingBatch};
pub use client::Client;
pub use config::ClientConfig;
pub use consumer::{Consumer, FetchOptions, MAX_FETCH_BATCH, NextOptions};
pub use error::PullError;
pub use message::Message;

#[cfg(test)]
mod tests;
