//! Core data models for the upload coordination and metadata catalog.
//!
//! Durable records (`FileRecord`, `ViewRecord`, `GroupRecord`, `ShardIndex`)
//! serialize as JSON via `serde` and live in the versioned object store.
//! `UploadSession` is ephemeral, in-memory state only.

pub mod record;
pub mod session;
pub mod shard;
