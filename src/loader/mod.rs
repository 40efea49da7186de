//! Trial-collection loaders
//!
//! Loaders turn a serialized trial container into typed [`Trial`] records. The
//! core never sees the serialized form.

mod json;

pub use json::JsonTrialLoader;

use crate::error::Result;
use crate::trial::Trial;
use std::fs;
use std::path::Path;

/// Trait for trial-collection loaders
pub trait TrialCollectionLoader {
    /// Parse a serialized trial collection
    fn load_str(&self, raw: &str) -> Result<Vec<Trial>>;

    /// Read and parse a trial collection file
    fn load_file(&self, path: &Path) -> Result<Vec<Trial>> {
        let raw = fs::read_to_string(path)?;
        self.load_str(&raw)
    }
}
