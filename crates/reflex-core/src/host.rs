//! Code installation port and the in-process host
//!
//! The engine never talks to a concrete runtime. Redefinition goes through
//! [`CodeInstallationPort::install`], which runs the registered transformer
//! pipeline on the caller's thread and hands back the linked [`LoadedType`].

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::ast::{TypeIdentity, Visibility};
use crate::compiler::ir::{CompiledMethod, CompiledType, FieldAccess, MethodRef};
use crate::compiler::{Const, Ty};
use crate::pipeline::{LoadUnit, Pipeline, PipelineError};

/// Host-level failure of a (re)load request
#[derive(Error, Debug)]
pub enum HostFacilityError {
    #[error("No transformer pipeline is registered with the host")]
    NoPipeline,

    #[error("Artifact for {found} handed to install of {expected}")]
    IdentityMismatch {
        expected: TypeIdentity,
        found: TypeIdentity,
    },

    #[error("Host rejected {identity}: {reason}")]
    Rejected {
        identity: TypeIdentity,
        reason: String,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// One slot of a type's generation-0 field layout
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutSlot {
    pub name: String,
    pub ty: Ty,
    pub default: Const,
}

/// Field layout fixed when a type is first loaded. Instances always carry
/// these slots; later fields live in extension storage.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalLayout {
    pub identity: TypeIdentity,
    pub slots: Vec<LayoutSlot>,
}

impl OriginalLayout {
    pub fn from_artifact(artifact: &CompiledType) -> Self {
        Self {
            identity: artifact.identity.clone(),
            slots: artifact
                .fields
                .iter()
                .map(|field| LayoutSlot {
                    name: field.name.clone(),
                    ty: field.ty.clone(),
                    default: field.default.clone(),
                })
                .collect(),
        }
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.name == name)
    }
}

/// Get/set accessor description for one declared field of a version
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAccessor {
    pub name: String,
    pub ty: Ty,
    pub visibility: Visibility,
    pub default: Const,
    pub access: FieldAccess,
}

/// Accessors for the fields a version declares itself
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessorTable {
    entries: IndexMap<String, FieldAccessor>,
}

impl AccessorTable {
    pub fn insert(&mut self, accessor: FieldAccessor) {
        self.entries.insert(accessor.name.clone(), accessor);
    }

    pub fn get(&self, name: &str) -> Option<&FieldAccessor> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldAccessor> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A linked, executable definition of one type at one generation
#[derive(Debug)]
pub struct LoadedType {
    pub identity: TypeIdentity,
    pub generation: u64,
    pub artifact: CompiledType,
    pub accessors: AccessorTable,
    pub layout: Arc<OriginalLayout>,
    /// Generation this version replaces, if any
    pub predecessor: Option<u64>,
    /// Adapters and eval types: never persisted nor published
    pub ephemeral: bool,
}

impl LoadedType {
    pub fn superclass(&self) -> Option<&TypeIdentity> {
        self.artifact.superclass.as_ref()
    }

    pub fn method(&self, method: &MethodRef) -> Option<&CompiledMethod> {
        self.artifact.method(method)
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a CompiledMethod> + 'a {
        self.artifact.methods_named(name)
    }
}

/// Host runtime redefinition facility
pub trait CodeInstallationPort: Send + Sync {
    /// Register the ordered callbacks run on every (re)load
    fn register_pipeline(&self, pipeline: Arc<Pipeline>);

    /// Reload `identity` with a freshly compiled artifact at `generation`
    fn install(
        &self,
        identity: &TypeIdentity,
        artifact: CompiledType,
        generation: u64,
    ) -> Result<LoadedType, HostFacilityError>;

    /// Load a synthesized type that is callable but never published
    fn load_ephemeral(&self, artifact: CompiledType) -> Result<LoadedType, HostFacilityError>;
}

/// Host that links artifacts for the in-process interpreter
#[derive(Default)]
pub struct InProcessHost {
    pipeline: RwLock<Option<Arc<Pipeline>>>,
}

impl InProcessHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn pipeline(&self) -> Result<Arc<Pipeline>, HostFacilityError> {
        self.pipeline
            .read()
            .clone()
            .ok_or(HostFacilityError::NoPipeline)
    }
}

impl CodeInstallationPort for InProcessHost {
    fn register_pipeline(&self, pipeline: Arc<Pipeline>) {
        *self.pipeline.write() = Some(pipeline);
    }

    fn install(
        &self,
        identity: &TypeIdentity,
        artifact: CompiledType,
        generation: u64,
    ) -> Result<LoadedType, HostFacilityError> {
        if artifact.identity != *identity {
            return Err(HostFacilityError::IdentityMismatch {
                expected: identity.clone(),
                found: artifact.identity,
            });
        }
        let pipeline = self.pipeline()?;
        debug!("Host reloading {} at generation {}", identity, generation);
        let loaded = pipeline.run(LoadUnit::new(artifact, generation, false))?;
        Ok(loaded)
    }

    fn load_ephemeral(&self, artifact: CompiledType) -> Result<LoadedType, HostFacilityError> {
        let pipeline = self.pipeline()?;
        Ok(pipeline.run(LoadUnit::new(artifact, 0, true))?)
    }
}
