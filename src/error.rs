use std::fmt;
use std::path::PathBuf;

use crate::mutation::ChangeSet;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed index file {}: {reason}", path.display())]
    MalformedIndex { path: PathBuf, reason: String },

    #[error("Could not save index file {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    PartialWrite(Box<PartialWrite>),

    #[error("Tag {tag} not found in {}", path.display())]
    TagNotFound { path: PathBuf, tag: String },

    #[error("DICOM error for {}: {message}", path.display())]
    Dicom { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a batch that wrote some files and failed on others. The index
/// has already been updated for `succeeded` and only for `succeeded`.
#[derive(Debug, Default)]
pub struct PartialWrite {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<FileFailure>,
    pub changes: ChangeSet,
}

impl fmt::Display for PartialWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} files failed",
            self.failed.len(),
            self.failed.len() + self.succeeded.len()
        )?;
        for failure in &self.failed {
            write!(f, "; {}: {}", failure.path.display(), failure.reason)?;
        }
        Ok(())
    }
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
