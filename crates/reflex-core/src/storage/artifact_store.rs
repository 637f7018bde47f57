//! Installed-artifact store
//!
//! Two directories:
//! - `original`: the baseline, one artifact per type, written at bootstrap
//! - `modified`: reset to a copy of `original` at start, then receives every
//!   freshly installed version as `<identity>@<generation>.rfxc`

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::StorageError;
use crate::ast::TypeIdentity;
use crate::compiler::CompiledType;

pub const ARTIFACT_EXTENSION: &str = "rfxc";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    original: PathBuf,
    modified: PathBuf,
}

impl ArtifactStore {
    /// Create both directories if needed
    pub fn open(original: impl AsRef<Path>, modified: impl AsRef<Path>) -> Result<Self, StorageError> {
        let store = Self {
            original: original.as_ref().to_path_buf(),
            modified: modified.as_ref().to_path_buf(),
        };
        fs::create_dir_all(&store.original)?;
        fs::create_dir_all(&store.modified)?;
        Ok(store)
    }

    pub fn original_dir(&self) -> &Path {
        &self.original
    }

    pub fn modified_dir(&self) -> &Path {
        &self.modified
    }

    /// Replace the modified directory with a fresh copy of the original one
    pub fn reset_modified(&self) -> Result<(), StorageError> {
        if self.modified.exists() {
            fs::remove_dir_all(&self.modified)?;
        }
        fs::create_dir_all(&self.modified)?;
        let mut copied = 0;
        for entry in fs::read_dir(&self.original)? {
            let path = entry?.path();
            if let Some(name) = path.file_name() {
                if path.is_file() {
                    fs::copy(&path, self.modified.join(name))?;
                    copied += 1;
                }
            }
        }
        info!(
            "Reset {} from {} ({} artifact(s))",
            self.modified.display(),
            self.original.display(),
            copied
        );
        Ok(())
    }

    fn original_path(&self, identity: &TypeIdentity) -> PathBuf {
        self.original
            .join(format!("{}.{}", identity.as_str(), ARTIFACT_EXTENSION))
    }

    fn modified_path(&self, identity: &TypeIdentity, generation: u64) -> PathBuf {
        self.modified
            .join(format!("{}@{}.{}", identity.as_str(), generation, ARTIFACT_EXTENSION))
    }

    fn write(path: &Path, artifact: &CompiledType) -> Result<(), StorageError> {
        let bytes = bincode::serialize(artifact)?;
        // Write then rename so readers never see a torn file
        let staging = path.with_extension("tmp");
        fs::write(&staging, bytes)?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    fn read(path: &Path) -> Result<CompiledType, StorageError> {
        let bytes = fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn write_original(&self, artifact: &CompiledType) -> Result<PathBuf, StorageError> {
        let path = self.original_path(&artifact.identity);
        Self::write(&path, artifact)?;
        debug!("Wrote original artifact {}", path.display());
        Ok(path)
    }

    pub fn write_modified(
        &self,
        artifact: &CompiledType,
        generation: u64,
    ) -> Result<PathBuf, StorageError> {
        let path = self.modified_path(&artifact.identity, generation);
        Self::write(&path, artifact)?;
        debug!("Wrote installed artifact {}", path.display());
        Ok(path)
    }

    pub fn read_original(&self, identity: &TypeIdentity) -> Result<CompiledType, StorageError> {
        let path = self.original_path(identity);
        if !path.exists() {
            return Err(StorageError::ArtifactNotFound {
                identity: identity.clone(),
                generation: 0,
            });
        }
        Self::read(&path)
    }

    pub fn read_modified(
        &self,
        identity: &TypeIdentity,
        generation: u64,
    ) -> Result<CompiledType, StorageError> {
        let path = self.modified_path(identity, generation);
        if !path.exists() {
            return Err(StorageError::ArtifactNotFound {
                identity: identity.clone(),
                generation,
            });
        }
        Self::read(&path)
    }

    pub fn contains_modified(&self, identity: &TypeIdentity, generation: u64) -> bool {
        self.modified_path(identity, generation).exists()
    }

    /// File names in the modified directory, sorted
    pub fn list_modified(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.modified)? {
            if let Some(name) = entry?.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn artifact(name: &str) -> CompiledType {
        CompiledType {
            identity: TypeIdentity::from(name),
            superclass: None,
            imports: Vec::new(),
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            privileged_as: None,
            source: format!("class {name} {{}}"),
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path().join("original"), dir.path().join("modified")).unwrap();
        let point = artifact("demo.Point");
        store.write_modified(&point, 3).unwrap();
        assert!(store.contains_modified(&point.identity, 3));
        assert!(!store.contains_modified(&point.identity, 2));
        assert_eq!(store.read_modified(&point.identity, 3).unwrap(), point);
        assert!(matches!(
            store.read_modified(&point.identity, 4),
            Err(StorageError::ArtifactNotFound { generation: 4, .. })
        ));
    }

    #[test]
    fn test_reset_copies_original() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path().join("original"), dir.path().join("modified")).unwrap();
        store.write_original(&artifact("demo.Point")).unwrap();
        store.write_modified(&artifact("demo.Point"), 7).unwrap();

        store.reset_modified().unwrap();
        assert_eq!(store.list_modified().unwrap(), vec!["demo.Point.rfxc".to_string()]);
        assert_eq!(
            store.read_original(&"demo.Point".into()).unwrap(),
            artifact("demo.Point")
        );
    }
}
