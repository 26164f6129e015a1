//! Storage abstraction and implementations for Evoguard.
//!
//! This crate provides trait-based interfaces for checkpoint snapshots and
//! quarantine records, with a JSON file reference implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;

pub use trait_::{CheckpointStore, QuarantineStore, StorageError, Result};
pub use json_storage::JsonStorage;
