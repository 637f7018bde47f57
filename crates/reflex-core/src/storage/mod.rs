use std::fs;
use std::path::{Path, PathBuf};

use crate::ast::{EditError, TypeIdentity};
use crate::parser::ParseError;

/// Storage-related errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Source unit failed to parse
    #[error("Parse error in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: ParseError,
    },

    /// No source unit declares the type
    #[error("Type not found: {identity}")]
    TypeNotFound { identity: TypeIdentity },

    /// No installed artifact for this generation
    #[error("Artifact not found: {identity} generation {generation}")]
    ArtifactNotFound {
        identity: TypeIdentity,
        generation: u64,
    },

    /// Edit could not be applied to the cached tree
    #[error("Edit rejected: {0}")]
    Edit(#[from] EditError),

    /// Parent edge would close a cycle
    #[error(transparent)]
    Inheritance(#[from] index::InheritanceCycleError),

    /// Generic storage error
    #[error("Storage error: {message}")]
    Generic { message: String },
}

pub mod artifact_store;
pub mod cache;
pub mod index;

pub use artifact_store::ArtifactStore;
pub use cache::StructuralCache;
pub use index::{InheritanceCycleError, InheritanceIndex};

/// One original source unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    /// Where the unit came from (file path or label)
    pub origin: String,
    pub text: String,
}

/// Yields the original source units of the program
pub trait SourceProvider: Send + Sync {
    fn units(&self) -> Result<Vec<SourceText>, StorageError>;
}

/// Source units held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySources {
    units: Vec<SourceText>,
}

impl InMemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit(mut self, origin: impl Into<String>, text: impl Into<String>) -> Self {
        self.add(origin, text);
        self
    }

    pub fn add(&mut self, origin: impl Into<String>, text: impl Into<String>) {
        self.units.push(SourceText {
            origin: origin.into(),
            text: text.into(),
        });
    }
}

impl SourceProvider for InMemorySources {
    fn units(&self) -> Result<Vec<SourceText>, StorageError> {
        Ok(self.units.clone())
    }
}

/// Every `.rfx` file below a directory, in path order
#[derive(Debug, Clone)]
pub struct DirectorySources {
    root: PathBuf,
}

pub const SOURCE_EXTENSION: &str = "rfx";

impl DirectorySources {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn collect(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StorageError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::collect(&path, out)?;
            } else if path.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXTENSION) {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl SourceProvider for DirectorySources {
    fn units(&self) -> Result<Vec<SourceText>, StorageError> {
        let mut paths = Vec::new();
        Self::collect(&self.root, &mut paths)?;
        paths.sort();
        paths
            .into_iter()
            .map(|path| {
                Ok(SourceText {
                    text: fs::read_to_string(&path)?,
                    origin: path.display().to_string(),
                })
            })
            .collect()
    }
}
