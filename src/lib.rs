//! ShelfBridge — reconciles reading progress from a source library
//! service onto a remote book-tracking service. See `SPEC_FULL.md` for
//! the full component breakdown; this crate root just re-exports each
//! component as a module.

pub mod cache;
pub mod concurrency;
pub mod config;
pub mod dump;
pub mod error;
pub mod identifiers;
pub mod matcher;
pub mod model;
pub mod progress;
pub mod reconciler;
pub mod remote_client;
pub mod result_collector;
pub mod session;
pub mod source_client;
pub mod text_match;
pub mod transaction;
