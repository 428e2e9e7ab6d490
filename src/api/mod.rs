//! Backend REST/SSE collaborators
//!
//! - `documents`: document list, single-document status, and the per-document
//!   processing status stream

pub mod documents;

pub use documents::{DocumentsApi, StatusLookup};
