//! Temp-path helper bound from the assignment's helper type.
//!
//! The helper stages model artifacts on disk for the dispatcher
//! subprocesses. An assignment without a helper type leaves the worker
//! unable to stage artifacts, so construction refuses it and the worker
//! never enters the task loop.

use anyhow::Context;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("assignment carries no helper type; refusing to process tasks")]
pub struct MissingHelperType;

#[derive(Debug, Clone)]
pub struct Helper {
    kind: String,
}

impl Helper {
    pub fn from_assignment(helper_type: Option<&str>) -> Result<Self, MissingHelperType> {
        match helper_type {
            Some(kind) if !kind.trim().is_empty() => Ok(Self {
                kind: kind.to_string(),
            }),
            _ => Err(MissingHelperType),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Allocate a fresh temp file path for an artifact. The file persists
    /// until the pipeline unlinks it.
    pub fn tmp_path(&self) -> anyhow::Result<PathBuf> {
        let path = tempfile::NamedTempFile::new()
            .context("Failed to allocate artifact temp file")?
            .into_temp_path()
            .keep()
            .context("Failed to persist artifact temp file")?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_helper_type_is_refused() {
        assert!(Helper::from_assignment(None).is_err());
        assert!(Helper::from_assignment(Some("")).is_err());
        assert!(Helper::from_assignment(Some("   ")).is_err());
    }

    #[test]
    fn test_tmp_paths_are_distinct() {
        let helper = Helper::from_assignment(Some("binary")).unwrap();
        let a = helper.tmp_path().unwrap();
        let b = helper.tmp_path().unwrap();
        assert_ne!(a, b);
        std::fs::remove_file(&a).unwrap();
        std::fs::remove_file(&b).unwrap();
    }
}
