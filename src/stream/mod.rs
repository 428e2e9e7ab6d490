//! Live job status streaming
//!
//! - `transport`: seams to the backend (push channel, status lookup)
//! - `registry`: the active-handle registry
//! - `client`: the reconnecting stream client

pub mod client;
pub mod registry;
pub mod transport;

pub use client::JobStatusStreamClient;
pub use registry::{JobStreamHandle, Registry};
pub use transport::{FrameStream, StatusChannel, StatusQuery};
