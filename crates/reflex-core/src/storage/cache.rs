//! Structural representation cache
//!
//! Holds the current editable tree and regenerated source of every type.
//! Original units are parsed into a catalog up front; a type enters the
//! cache on first access, which also records its parent edge in the
//! inheritance index. Trees are shared behind `Arc` and never mutated in
//! place: an edit produces a new tree.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::{InheritanceIndex, SourceProvider, StorageError};
use crate::ast::{StructuralEdit, StructuralTree, ToSource, TypeIdentity};
use crate::parser::StructuralParser;

#[derive(Debug, Clone)]
struct CacheEntry {
    tree: Arc<StructuralTree>,
    source: String,
}

pub struct StructuralCache {
    entries: DashMap<TypeIdentity, CacheEntry>,
    catalog: DashMap<TypeIdentity, StructuralTree>,
    index: Arc<InheritanceIndex>,
}

impl StructuralCache {
    pub fn new(index: Arc<InheritanceIndex>) -> Self {
        Self {
            entries: DashMap::new(),
            catalog: DashMap::new(),
            index,
        }
    }

    /// Parse every original unit into the catalog. Returns the identities
    /// found, sorted.
    pub fn load_catalog(
        &self,
        provider: &dyn SourceProvider,
        parser: &dyn StructuralParser,
    ) -> Result<Vec<TypeIdentity>, StorageError> {
        let mut found = Vec::new();
        for unit in provider.units()? {
            let trees = parser
                .parse_unit(&unit.text)
                .map_err(|source| StorageError::Parse {
                    origin: unit.origin.clone(),
                    source,
                })?;
            for tree in trees {
                let identity = tree.identity();
                if self.catalog.contains_key(&identity) || self.entries.contains_key(&identity) {
                    return Err(StorageError::Generic {
                        message: format!("{identity} is declared more than once ({})", unit.origin),
                    });
                }
                found.push(identity.clone());
                self.catalog.insert(identity, tree);
            }
        }
        found.sort();
        info!("Catalog holds {} type(s)", found.len());
        Ok(found)
    }

    pub fn contains(&self, identity: &TypeIdentity) -> bool {
        self.entries.contains_key(identity) || self.catalog.contains_key(identity)
    }

    /// Every known type, loaded or not, sorted
    pub fn identities(&self) -> Vec<TypeIdentity> {
        let mut identities: Vec<_> = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.catalog.iter().map(|entry| entry.key().clone()))
            .collect();
        identities.sort();
        identities.dedup();
        identities
    }

    /// Types that have entered the cache, sorted
    pub fn loaded(&self) -> Vec<TypeIdentity> {
        let mut identities: Vec<_> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        identities.sort();
        identities
    }

    fn link_parent(&self, tree: &StructuralTree) -> Result<(), StorageError> {
        let child = tree.identity();
        match tree.superclass_identity(|identity| self.contains(identity)) {
            Some(parent) => self.index.put(parent, child)?,
            None => {
                self.index.remove_edge(&child);
            }
        }
        Ok(())
    }

    /// The current tree, loading it from the catalog on first access.
    /// Repeated calls hand back the same shared tree.
    pub fn get(&self, identity: &TypeIdentity) -> Result<Arc<StructuralTree>, StorageError> {
        if let Some(entry) = self.entries.get(identity) {
            return Ok(entry.tree.clone());
        }
        let (_, tree) = self
            .catalog
            .remove(identity)
            .ok_or_else(|| StorageError::TypeNotFound {
                identity: identity.clone(),
            })?;
        if let Err(e) = self.link_parent(&tree) {
            self.catalog.insert(identity.clone(), tree);
            return Err(e);
        }
        let entry = self
            .entries
            .entry(identity.clone())
            .or_insert_with(|| CacheEntry {
                source: tree.to_source(),
                tree: Arc::new(tree),
            });
        debug!("Loaded {} into the structural cache", identity);
        Ok(entry.tree.clone())
    }

    /// Deep copy for private editing
    pub fn snapshot(&self, identity: &TypeIdentity) -> Result<StructuralTree, StorageError> {
        Ok((*self.get(identity)?).clone())
    }

    /// Apply one edit to the cached tree. The previous tree is left intact
    /// for whoever still holds it.
    pub fn record_edit(
        &self,
        identity: &TypeIdentity,
        edit: &StructuralEdit,
    ) -> Result<Arc<StructuralTree>, StorageError> {
        let mut tree = self.snapshot(identity)?;
        edit.apply(&mut tree)?;
        self.replace(identity, tree)
    }

    /// Install a tree edited elsewhere as the current one
    pub fn replace(
        &self,
        identity: &TypeIdentity,
        tree: StructuralTree,
    ) -> Result<Arc<StructuralTree>, StorageError> {
        if tree.identity() != *identity {
            return Err(StorageError::Generic {
                message: format!("tree of {} cannot replace {}", tree.identity(), identity),
            });
        }
        self.link_parent(&tree)?;
        let tree = Arc::new(tree);
        self.entries.insert(
            identity.clone(),
            CacheEntry {
                source: tree.to_source(),
                tree: tree.clone(),
            },
        );
        Ok(tree)
    }

    /// Source regenerated from the current tree
    pub fn source(&self, identity: &TypeIdentity) -> Result<String, StorageError> {
        self.get(identity)?;
        self.entries
            .get(identity)
            .map(|entry| entry.source.clone())
            .ok_or_else(|| StorageError::TypeNotFound {
                identity: identity.clone(),
            })
    }
}
