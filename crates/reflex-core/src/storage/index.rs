use std::collections::{BTreeSet, HashMap, VecDeque};

use parking_lot::RwLock;
use thiserror::Error;

use crate::ast::TypeIdentity;
use crate::security::{Ancestry, MAX_HIERARCHY_DEPTH};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Inheritance cycle: {child} cannot extend {parent}")]
pub struct InheritanceCycleError {
    pub parent: TypeIdentity,
    pub child: TypeIdentity,
}

#[derive(Debug, Default)]
struct Edges {
    parents: HashMap<TypeIdentity, TypeIdentity>,
    children: HashMap<TypeIdentity, BTreeSet<TypeIdentity>>,
}

impl Edges {
    fn ancestors(&self, identity: &TypeIdentity) -> Vec<TypeIdentity> {
        let mut chain = Vec::new();
        let mut cursor = self.parents.get(identity);
        while let Some(parent) = cursor {
            if chain.len() >= MAX_HIERARCHY_DEPTH {
                break;
            }
            chain.push(parent.clone());
            cursor = self.parents.get(parent);
        }
        chain
    }

    fn detach(&mut self, child: &TypeIdentity) -> Option<TypeIdentity> {
        let parent = self.parents.remove(child)?;
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.remove(child);
            if siblings.is_empty() {
                self.children.remove(&parent);
            }
        }
        Some(parent)
    }
}

/// Type -> declared parent, and parent -> known subtypes
#[derive(Debug, Default)]
pub struct InheritanceIndex {
    edges: RwLock<Edges>,
}

impl InheritanceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or overwrite the parent of `child`. An edge that would close
    /// a cycle is rejected and the index stays as it was.
    pub fn put(&self, parent: TypeIdentity, child: TypeIdentity) -> Result<(), InheritanceCycleError> {
        let mut edges = self.edges.write();
        if parent == child || edges.ancestors(&parent).contains(&child) {
            return Err(InheritanceCycleError { parent, child });
        }
        edges.detach(&child);
        edges
            .children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        edges.parents.insert(child, parent);
        Ok(())
    }

    /// Check an edge without recording it
    pub fn check(&self, parent: &TypeIdentity, child: &TypeIdentity) -> Result<(), InheritanceCycleError> {
        let edges = self.edges.read();
        if parent == child || edges.ancestors(parent).contains(child) {
            return Err(InheritanceCycleError {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        Ok(())
    }

    /// Drop the parent edge of `child`, returning the old parent
    pub fn remove_edge(&self, child: &TypeIdentity) -> Option<TypeIdentity> {
        self.edges.write().detach(child)
    }

    pub fn parent_of(&self, identity: &TypeIdentity) -> Option<TypeIdentity> {
        self.edges.read().parents.get(identity).cloned()
    }

    /// Direct subtypes, in identity order
    pub fn children_of(&self, identity: &TypeIdentity) -> Vec<TypeIdentity> {
        self.edges
            .read()
            .children
            .get(identity)
            .map(|children| children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Nearest first
    pub fn ancestors_of(&self, identity: &TypeIdentity) -> Vec<TypeIdentity> {
        self.edges.read().ancestors(identity)
    }

    /// All transitive subtypes, breadth first, each level in identity order
    pub fn descendants_of(&self, identity: &TypeIdentity) -> Vec<TypeIdentity> {
        let edges = self.edges.read();
        let mut result = Vec::new();
        let mut queue = VecDeque::from([identity.clone()]);
        while let Some(next) = queue.pop_front() {
            if let Some(children) = edges.children.get(&next) {
                for child in children {
                    if !result.contains(child) && child != identity {
                        result.push(child.clone());
                        queue.push_back(child.clone());
                    }
                }
            }
        }
        result
    }
}

impl Ancestry for InheritanceIndex {
    fn superclass_of(&self, identity: &TypeIdentity) -> Option<TypeIdentity> {
        self.parent_of(identity)
    }
}
