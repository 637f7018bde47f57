//! Version ledger
//!
//! Per type, an arena of versions keyed by generation and a guarded pointer
//! to the current one. Versions are never deleted; each keeps a weak link to
//! the version it replaced.
//!
//! Publication protocol:
//! 1. `begin_install` reserves the next generation as a draft
//! 2. the host installs the artifact (pipeline runs, nothing is visible yet)
//! 3. `publish` links the predecessor and swaps the current pointer, holding
//!    the write lock only across the swap
//!
//! `rollback_draft` releases a reservation without touching the chain, and a
//! released generation is never handed out again.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::ast::TypeIdentity;
use crate::compiler::{ClassPath, TypeSignature};
use crate::evaluator::TypeResolver;
use crate::host::LoadedType;
use crate::security::Ancestry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("No versions recorded for {identity}")]
    UnknownType { identity: TypeIdentity },

    #[error("{identity} already has an original version")]
    AlreadyRegistered { identity: TypeIdentity },

    #[error("Original version of {identity} must be generation 0, got {generation}")]
    NotOriginal {
        identity: TypeIdentity,
        generation: u64,
    },

    #[error("Generation {generation} of {identity} was never reserved")]
    NoDraft {
        identity: TypeIdentity,
        generation: u64,
    },

    #[error("Generation {generation} of {identity} is older than current generation {current}")]
    StaleDraft {
        identity: TypeIdentity,
        generation: u64,
        current: u64,
    },

    #[error("Version belongs to {found}, not {expected}")]
    IdentityMismatch {
        expected: TypeIdentity,
        found: TypeIdentity,
    },
}

/// One installed definition of a type
#[derive(Debug)]
pub struct Version {
    pub identity: TypeIdentity,
    pub generation: u64,
    pub artifact: Arc<LoadedType>,
    predecessor: Weak<Version>,
    pub created_at: DateTime<Utc>,
    pub source: String,
}

impl Version {
    /// Wrap an installed type; the predecessor link is filled in on publish
    pub fn new(artifact: LoadedType, source: impl Into<String>) -> Self {
        Self {
            identity: artifact.identity.clone(),
            generation: artifact.generation,
            artifact: Arc::new(artifact),
            predecessor: Weak::new(),
            created_at: Utc::now(),
            source: source.into(),
        }
    }

    /// The version this one replaced. Weak, so it never keeps history alive
    /// on its own; the ledger arena does.
    pub fn predecessor(&self) -> Option<Arc<Version>> {
        self.predecessor.upgrade()
    }
}

/// A reserved, not yet published generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionDraft {
    pub generation: u64,
}

#[derive(Debug)]
struct LedgerEntry {
    versions: RwLock<BTreeMap<u64, Arc<Version>>>,
    current: RwLock<Arc<Version>>,
    next_generation: AtomicU64,
    drafts: Mutex<BTreeSet<u64>>,
}

/// Versions of every loaded type
#[derive(Debug, Default)]
pub struct VersionLedger {
    entries: DashMap<TypeIdentity, Arc<LedgerEntry>>,
}

impl VersionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, identity: &TypeIdentity) -> Result<Arc<LedgerEntry>, LedgerError> {
        self.entries
            .get(identity)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::UnknownType {
                identity: identity.clone(),
            })
    }

    /// Publish generation 0 of a type at bootstrap
    pub fn register_original(&self, version: Version) -> Result<Arc<Version>, LedgerError> {
        if version.generation != 0 {
            return Err(LedgerError::NotOriginal {
                identity: version.identity,
                generation: version.generation,
            });
        }
        let identity = version.identity.clone();
        match self.entries.entry(identity.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(LedgerError::AlreadyRegistered { identity })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let version = Arc::new(version);
                let mut versions = BTreeMap::new();
                versions.insert(0, version.clone());
                slot.insert(Arc::new(LedgerEntry {
                    versions: RwLock::new(versions),
                    current: RwLock::new(version.clone()),
                    next_generation: AtomicU64::new(1),
                    drafts: Mutex::new(BTreeSet::new()),
                }));
                debug!("Registered original version of {}", identity);
                Ok(version)
            }
        }
    }

    /// The live version. Blocks only while a publish swaps the pointer.
    pub fn current_version(&self, identity: &TypeIdentity) -> Result<Arc<Version>, LedgerError> {
        Ok(self.entry(identity)?.current.read().clone())
    }

    pub fn current_generation(&self, identity: &TypeIdentity) -> Option<u64> {
        self.entries
            .get(identity)
            .map(|entry| entry.current.read().generation)
    }

    pub fn contains(&self, identity: &TypeIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Reserve the next generation without publishing anything
    pub fn begin_install(&self, identity: &TypeIdentity) -> Result<VersionDraft, LedgerError> {
        let entry = self.entry(identity)?;
        let generation = entry.next_generation.fetch_add(1, Ordering::SeqCst);
        entry.drafts.lock().insert(generation);
        debug!("Reserved generation {} of {}", generation, identity);
        Ok(VersionDraft { generation })
    }

    /// Release a reservation; the generation number stays burnt
    pub fn rollback_draft(&self, identity: &TypeIdentity, draft: VersionDraft) -> Result<(), LedgerError> {
        let entry = self.entry(identity)?;
        if !entry.drafts.lock().remove(&draft.generation) {
            return Err(LedgerError::NoDraft {
                identity: identity.clone(),
                generation: draft.generation,
            });
        }
        debug!("Rolled back draft generation {} of {}", draft.generation, identity);
        Ok(())
    }

    /// Make a fully installed version current
    pub fn publish(&self, identity: &TypeIdentity, version: Version) -> Result<Arc<Version>, LedgerError> {
        if version.identity != *identity {
            return Err(LedgerError::IdentityMismatch {
                expected: identity.clone(),
                found: version.identity,
            });
        }
        let entry = self.entry(identity)?;
        let generation = version.generation;
        if !entry.drafts.lock().contains(&generation) {
            return Err(LedgerError::NoDraft {
                identity: identity.clone(),
                generation,
            });
        }

        let mut version = version;
        let published = {
            let mut current = entry.current.write();
            if current.generation >= generation {
                return Err(LedgerError::StaleDraft {
                    identity: identity.clone(),
                    generation,
                    current: current.generation,
                });
            }
            version.predecessor = Arc::downgrade(&current);
            let version = Arc::new(version);
            entry.versions.write().insert(generation, version.clone());
            *current = version.clone();
            version
        };
        entry.drafts.lock().remove(&generation);
        info!("Published {} generation {}", identity, generation);
        Ok(published)
    }

    /// Any historical version
    pub fn version(&self, identity: &TypeIdentity, generation: u64) -> Option<Arc<Version>> {
        self.entries
            .get(identity)
            .and_then(|entry| entry.versions.read().get(&generation).cloned())
    }

    /// Every published version, oldest first
    pub fn history(&self, identity: &TypeIdentity) -> Vec<Arc<Version>> {
        self.entries
            .get(identity)
            .map(|entry| entry.versions.read().values().cloned().collect())
            .unwrap_or_default()
    }

    /// Identities with at least one version, sorted
    pub fn known_types(&self) -> Vec<TypeIdentity> {
        let mut types: Vec<_> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        types.sort();
        types
    }
}

impl TypeResolver for VersionLedger {
    fn current_type(&self, identity: &TypeIdentity) -> Option<Arc<LoadedType>> {
        self.entries
            .get(identity)
            .map(|entry| entry.current.read().artifact.clone())
    }
}

impl ClassPath for VersionLedger {
    fn signature(&self, identity: &TypeIdentity) -> Option<Arc<TypeSignature>> {
        self.current_type(identity)
            .map(|loaded| Arc::new(loaded.artifact.signature()))
    }
}

impl Ancestry for VersionLedger {
    fn superclass_of(&self, identity: &TypeIdentity) -> Option<TypeIdentity> {
        self.current_type(identity)
            .and_then(|loaded| loaded.superclass().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompiledType;
    use crate::host::{AccessorTable, OriginalLayout};
    use pretty_assertions::assert_eq;

    fn loaded(identity: &str, generation: u64) -> LoadedType {
        let artifact = CompiledType {
            identity: identity.into(),
            superclass: None,
            imports: Vec::new(),
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            privileged_as: None,
            source: String::new(),
        };
        LoadedType {
            identity: identity.into(),
            generation,
            layout: Arc::new(OriginalLayout::from_artifact(&artifact)),
            artifact,
            accessors: AccessorTable::default(),
            predecessor: generation.checked_sub(1),
            ephemeral: false,
        }
    }

    fn ledger_with(identity: &str) -> VersionLedger {
        let ledger = VersionLedger::new();
        ledger
            .register_original(Version::new(loaded(identity, 0), "v0"))
            .unwrap();
        ledger
    }

    #[test]
    fn test_publish_links_predecessor() {
        let ledger = ledger_with("demo.X");
        let id = TypeIdentity::from("demo.X");

        let draft = ledger.begin_install(&id).unwrap();
        assert_eq!(draft.generation, 1);
        // Reserved but not visible
        assert_eq!(ledger.current_generation(&id), Some(0));

        let published = ledger
            .publish(&id, Version::new(loaded("demo.X", 1), "v1"))
            .unwrap();
        assert_eq!(ledger.current_version(&id).unwrap().generation, 1);
        assert_eq!(published.predecessor().unwrap().generation, 0);
        assert_eq!(published.predecessor().unwrap().source, "v0");
        let generations: Vec<_> = ledger.history(&id).iter().map(|v| v.generation).collect();
        assert_eq!(generations, vec![0, 1]);
    }

    #[test]
    fn test_generations_never_reused() {
        let ledger = ledger_with("demo.X");
        let id = TypeIdentity::from("demo.X");

        let abandoned = ledger.begin_install(&id).unwrap();
        ledger.rollback_draft(&id, abandoned).unwrap();
        assert!(ledger.rollback_draft(&id, abandoned).is_err());

        let draft = ledger.begin_install(&id).unwrap();
        assert_eq!(draft.generation, 2);
        ledger.publish(&id, Version::new(loaded("demo.X", 2), "v2")).unwrap();
        assert!(ledger.version(&id, 1).is_none());
        assert_eq!(ledger.version(&id, 2).unwrap().predecessor().unwrap().generation, 0);
    }

    #[test]
    fn test_publish_requires_draft_and_freshness() {
        let ledger = ledger_with("demo.X");
        let id = TypeIdentity::from("demo.X");

        let err = ledger
            .publish(&id, Version::new(loaded("demo.X", 5), ""))
            .unwrap_err();
        assert_eq!(err, LedgerError::NoDraft { identity: id.clone(), generation: 5 });

        let first = ledger.begin_install(&id).unwrap();
        let second = ledger.begin_install(&id).unwrap();
        ledger.publish(&id, Version::new(loaded("demo.X", second.generation), "")).unwrap();
        let err = ledger
            .publish(&id, Version::new(loaded("demo.X", first.generation), ""))
            .unwrap_err();
        assert!(matches!(err, LedgerError::StaleDraft { generation: 1, current: 2, .. }));
        assert_eq!(ledger.current_generation(&id), Some(2));
    }

    #[test]
    fn test_register_original_rules() {
        let ledger = ledger_with("demo.X");
        assert!(matches!(
            ledger.register_original(Version::new(loaded("demo.X", 0), "")),
            Err(LedgerError::AlreadyRegistered { .. })
        ));
        assert!(matches!(
            ledger.register_original(Version::new(loaded("demo.Y", 3), "")),
            Err(LedgerError::NotOriginal { generation: 3, .. })
        ));
        assert!(matches!(
            ledger.current_version(&"demo.Z".into()),
            Err(LedgerError::UnknownType { .. })
        ));
        assert_eq!(ledger.known_types(), vec![TypeIdentity::from("demo.X")]);
    }
}
