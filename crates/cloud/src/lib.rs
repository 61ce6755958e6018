//! Remote artifact storage.
//!
//! - [`storage`] - the [`ObjectStore`] seam and its S3-compatible
//!   implementation.
//! - [`metadata`] - best-effort removal of container comment tags before
//!   upload.

pub mod error;
pub mod metadata;
pub mod storage;

pub use error::StorageError;
pub use storage::{ObjectStore, S3Store};
