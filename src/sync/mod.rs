//! Feature file synchronization.
//!
//! The [`Synchronizer`] keeps the feature catalog aligned with the feature
//! files on disk. It creates and replaces records but never deletes one: a
//! record whose file disappeared is reported as stale and left in place.

use std::io;

use thiserror::Error;

use crate::persistence::StoreError;

pub mod parse;
pub mod source;
pub mod synchronizer;

pub use parse::{GherkinKeywords, Language, ParseError, ParsedFeature, parse_feature};
pub use source::{DirectoryFeatureSource, FeatureFile, FeatureSource};
pub use synchronizer::{SyncReport, Synchronizer};

/// Errors that abort a synchronization pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The feature source could not be read.
    #[error("failed to read feature files: {0}")]
    Source(#[source] io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for synchronization.
pub type Result<T> = std::result::Result<T, SyncError>;
