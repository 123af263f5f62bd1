//! Platform-agnostic core module - shared between the WASM page hook and tests

pub mod document;
pub mod stamp;

pub use document::{Document, DocumentError, MemoryDocument, NodeId};
pub use stamp::{stamp_generated_at, StampError, GENERATED_AT_CLASS, MOUNT_POINT_ID, TEXT_PREFIX};
