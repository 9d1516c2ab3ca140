//! Page store abstraction for shelf.
//!
//! The ingest pipeline never cares where page bytes physically live. It talks
//! to a [`StorageBackend`] through a [`BackendHandle`], and every path handed
//! to a backend is relative to that backend's root and checked by
//! [`validate_path`] first.

pub mod backend;
pub mod error;
pub mod file;
mod path;

pub use crate::backend::{StorageBackend, WriteOutcome};
pub use crate::file::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
