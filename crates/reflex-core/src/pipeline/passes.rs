//! The standard transformer passes

use std::sync::Arc;

use tracing::debug;

use super::{LayoutRegistry, LoadUnit, Marker, PipelineError, TransformerPass};
use crate::compiler::ir::{walk_body, CallTarget, FieldAccess, FieldRef, Instr, LinkVisitor, Node};
use crate::compiler::Ty;
use crate::host::{AccessorTable, FieldAccessor, OriginalLayout};
use crate::ledger::VersionLedger;
use crate::storage::ArtifactStore;

/// Records the generation-0 field layout of a type on its first load.
/// Ephemeral types get a private layout that is never registered.
pub struct OriginalTagPass {
    layouts: Arc<LayoutRegistry>,
    store: Option<Arc<ArtifactStore>>,
}

impl OriginalTagPass {
    pub fn new(layouts: Arc<LayoutRegistry>, store: Option<Arc<ArtifactStore>>) -> Self {
        Self { layouts, store }
    }
}

impl TransformerPass for OriginalTagPass {
    fn name(&self) -> &'static str {
        "original-tag"
    }

    fn description(&self) -> &'static str {
        "Snapshots the pristine definition and its field layout as generation 0"
    }

    fn requires(&self) -> Option<Marker> {
        None
    }

    fn produces(&self) -> Marker {
        Marker::OriginalTagged
    }

    fn transform(&self, unit: &mut LoadUnit) -> Result<usize, PipelineError> {
        if unit.ephemeral {
            unit.layout = Some(Arc::new(OriginalLayout::from_artifact(&unit.artifact)));
            return Ok(0);
        }
        let (layout, created) = self.layouts.tag_original(&unit.artifact);
        unit.layout = Some(layout);
        if unit.generation == 0 {
            if let Some(store) = &self.store {
                store.write_original(&unit.artifact)?;
            }
        }
        Ok(usize::from(created))
    }
}

/// Wraps the definition as a version: accessor table plus predecessor link
pub struct VersionMaterializePass {
    ledger: Arc<VersionLedger>,
}

impl VersionMaterializePass {
    pub fn new(ledger: Arc<VersionLedger>) -> Self {
        Self { ledger }
    }
}

fn slot_for(layout: &OriginalLayout, name: &str, ty: &Ty) -> FieldAccess {
    match layout.slot_of(name) {
        Some(slot) if layout.slots[slot].ty == *ty => FieldAccess::Direct(slot),
        _ => FieldAccess::Indirect,
    }
}

impl TransformerPass for VersionMaterializePass {
    fn name(&self) -> &'static str {
        "version-materialize"
    }

    fn description(&self) -> &'static str {
        "Builds get/set accessors for declared fields and links the predecessor generation"
    }

    fn requires(&self) -> Option<Marker> {
        Some(Marker::OriginalTagged)
    }

    fn produces(&self) -> Marker {
        Marker::Materialized
    }

    fn transform(&self, unit: &mut LoadUnit) -> Result<usize, PipelineError> {
        let layout = unit.layout.clone().ok_or_else(|| PipelineError::PassFailed {
            pass: self.name().to_string(),
            identity: unit.identity.clone(),
            message: "no layout recorded".to_string(),
        })?;
        let mut accessors = AccessorTable::default();
        for field in &unit.artifact.fields {
            accessors.insert(FieldAccessor {
                name: field.name.clone(),
                ty: field.ty.clone(),
                visibility: field.modifiers.visibility,
                default: field.default.clone(),
                access: slot_for(&layout, &field.name, &field.ty),
            });
        }
        let count = accessors.len();
        unit.accessors = Some(accessors);
        unit.predecessor = if unit.ephemeral {
            None
        } else {
            self.ledger.current_generation(&unit.identity)
        };
        Ok(count)
    }
}

/// Gives every declared-only method a body returning its type's default
pub struct DefaultMemberPass;

impl TransformerPass for DefaultMemberPass {
    fn name(&self) -> &'static str {
        "default-member"
    }

    fn description(&self) -> &'static str {
        "Synthesizes trivial bodies for members declared without an implementation"
    }

    fn requires(&self) -> Option<Marker> {
        Some(Marker::Materialized)
    }

    fn produces(&self) -> Marker {
        Marker::DefaultsSynthesized
    }

    fn transform(&self, unit: &mut LoadUnit) -> Result<usize, PipelineError> {
        let mut synthesized = 0;
        for method in unit.artifact.methods.iter_mut().filter(|m| m.body.is_none()) {
            let value = match method.return_type {
                Ty::Void => None,
                ref ty => Some(Node::Const(ty.default_const())),
            };
            method.body = Some(vec![Instr::Return(value)]);
            synthesized += 1;
        }
        if synthesized > 0 {
            debug!("Synthesized {} default body(ies) for {}", synthesized, unit.identity);
        }
        Ok(synthesized)
    }
}

/// Links each field reference to a direct slot of the owner's original
/// layout, or to accessor indirection when the field is not part of it
pub struct CrossVersionFieldAccessPass {
    layouts: Arc<LayoutRegistry>,
}

impl CrossVersionFieldAccessPass {
    pub fn new(layouts: Arc<LayoutRegistry>) -> Self {
        Self { layouts }
    }
}

struct FieldLinker<'a> {
    layouts: &'a LayoutRegistry,
    own: &'a LoadUnit,
    rewrites: usize,
}

impl LinkVisitor for FieldLinker<'_> {
    fn field(&mut self, field: &mut FieldRef) {
        if field.access != FieldAccess::Unlinked {
            return;
        }
        let layout = if field.owner == self.own.identity {
            self.own.layout.clone()
        } else {
            self.layouts.get(&field.owner)
        };
        field.access = match layout {
            Some(layout) => slot_for(&layout, &field.name, &field.ty),
            None => FieldAccess::Indirect,
        };
        self.rewrites += 1;
    }
}

impl TransformerPass for CrossVersionFieldAccessPass {
    fn name(&self) -> &'static str {
        "cross-version-field-access"
    }

    fn description(&self) -> &'static str {
        "Routes reads and writes of fields outside the original layout through extension storage"
    }

    fn requires(&self) -> Option<Marker> {
        Some(Marker::DefaultsSynthesized)
    }

    fn produces(&self) -> Marker {
        Marker::FieldAccessLinked
    }

    fn transform(&self, unit: &mut LoadUnit) -> Result<usize, PipelineError> {
        let mut methods = std::mem::take(&mut unit.artifact.methods);
        let mut linker = FieldLinker {
            layouts: &self.layouts,
            own: unit,
            rewrites: 0,
        };
        for method in &mut methods {
            if let Some(body) = method.body.as_mut() {
                walk_body(body, &mut linker);
            }
        }
        let rewrites = linker.rewrites;
        unit.artifact.methods = methods;
        Ok(rewrites)
    }
}

/// Turns compile-time call bindings into call-time lookups of the current
/// version
pub struct RedirectPass;

struct Redirector {
    rewrites: usize,
}

impl LinkVisitor for Redirector {
    fn call(&mut self, target: &mut CallTarget) {
        if let CallTarget::Bound(owner) = target {
            *target = CallTarget::Current(owner.clone());
            self.rewrites += 1;
        }
    }
}

impl TransformerPass for RedirectPass {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn description(&self) -> &'static str {
        "Rewrites call sites bound to a type so they resolve against its current version"
    }

    fn requires(&self) -> Option<Marker> {
        Some(Marker::FieldAccessLinked)
    }

    fn produces(&self) -> Marker {
        Marker::Redirected
    }

    fn transform(&self, unit: &mut LoadUnit) -> Result<usize, PipelineError> {
        let mut redirector = Redirector { rewrites: 0 };
        for method in &mut unit.artifact.methods {
            if let Some(body) = method.body.as_mut() {
                walk_body(body, &mut redirector);
            }
        }
        Ok(redirector.rewrites)
    }
}

/// Serializes the final artifact into the modified directory
pub struct WriterPass {
    store: Option<Arc<ArtifactStore>>,
}

impl WriterPass {
    pub fn new(store: Option<Arc<ArtifactStore>>) -> Self {
        Self { store }
    }
}

impl TransformerPass for WriterPass {
    fn name(&self) -> &'static str {
        "writer"
    }

    fn description(&self) -> &'static str {
        "Writes the installed artifact to the artifact store consulted on publish"
    }

    fn requires(&self) -> Option<Marker> {
        Some(Marker::Redirected)
    }

    fn produces(&self) -> Marker {
        Marker::Written
    }

    fn transform(&self, unit: &mut LoadUnit) -> Result<usize, PipelineError> {
        match &self.store {
            Some(store) if !unit.ephemeral => {
                let path = store.write_modified(&unit.artifact, unit.generation)?;
                unit.persisted = Some(path);
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}
