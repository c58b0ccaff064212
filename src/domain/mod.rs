//! Progress records and the server-side merge rules shared by every backend.

pub mod merge;
pub mod models;

pub use merge::apply_sync;
pub use models::{ProgressRecord, StorageKind, SyncRequest, ValidationError};
