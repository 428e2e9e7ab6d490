// docstream - live status client for document-processing jobs

pub mod api;
pub mod config;
pub mod models;
pub mod sse;
pub mod stream;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use stream::JobStatusStreamClient;
pub use types::{AppError, AppResult};
