//! Multi-mutation transactions
//!
//! A transaction takes the mutation lock of a type the first time it
//! targets it and keeps it until commit or discard. Edits land on a private
//! copy of the type's tree; nothing is visible to other threads before the
//! driver publishes.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, RawMutex};
use tracing::{debug, info};
use uuid::Uuid;

use super::validation::{self, check_import, check_type_ref};
use crate::ast::{
    Annotation, Member, MemberDescriptor, MemberKind, MemberSelector, MetadataTarget, StructuralEdit,
    StructuralTree, TypeIdentity, TypeRef,
};
use crate::driver::{self, CommitReport};
use crate::engine::EngineContext;
use crate::error::{ReflexError, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Compiling,
    Installed,
    /// Publish failed after some targets went live; those stay published
    PartiallyInstalled,
    /// Discarded, or the commit failed before anything was published
    Aborted,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionState::Pending => "pending",
            TransactionState::Compiling => "compiling",
            TransactionState::Installed => "installed",
            TransactionState::PartiallyInstalled => "partially installed",
            TransactionState::Aborted => "aborted",
        })
    }
}

/// One accepted mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub target: TypeIdentity,
    pub operation: &'static str,
    pub edit: StructuralEdit,
}

pub(crate) type TypeGuard = ArcMutexGuard<RawMutex, ()>;

/// Private tree of one target plus the lock that makes it private
pub(crate) struct WorkingCopy {
    pub tree: StructuralTree,
    pub edits: Vec<StructuralEdit>,
    _guard: TypeGuard,
}

impl WorkingCopy {
    /// Lock `target` for mutation and copy its current tree. Blocks while
    /// another transaction holds the type.
    pub fn acquire(context: &EngineContext, target: &TypeIdentity) -> Result<Self, ReflexError> {
        Self::eligible(context, target)?;
        let guard = context.type_lock(target).lock_arc();
        let tree = context.cache.snapshot(target)?;
        Ok(Self {
            tree,
            edits: Vec::new(),
            _guard: guard,
        })
    }

    /// Copy of a subtype that is recompiled from its unchanged tree. Never
    /// waits: a subtype held elsewhere fails with `Conflict`.
    pub fn dependent(context: &EngineContext, target: &TypeIdentity) -> Result<Self, ReflexError> {
        Self::eligible(context, target)?;
        let guard = context
            .type_lock(target)
            .try_lock_arc()
            .ok_or_else(|| ReflexError::Conflict {
                identity: target.clone(),
            })?;
        let tree = context.cache.snapshot(target)?;
        Ok(Self {
            tree,
            edits: Vec::new(),
            _guard: guard,
        })
    }

    fn eligible(context: &EngineContext, target: &TypeIdentity) -> Result<(), ReflexError> {
        if !context.cache.contains(target) {
            return Err(ValidationError::UnknownType {
                identity: target.clone(),
            }
            .into());
        }
        if context.is_excluded(target) {
            return Err(ValidationError::IneligibleType {
                identity: target.clone(),
            }
            .into());
        }
        Ok(())
    }

    pub fn is_structural(&self) -> bool {
        self.edits.iter().any(StructuralEdit::is_structural)
    }
}

pub struct Transaction {
    context: Arc<EngineContext>,
    id: Uuid,
    records: Vec<MutationRecord>,
    working: BTreeMap<TypeIdentity, WorkingCopy>,
    state: TransactionState,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(context: Arc<EngineContext>) -> Self {
        let id = Uuid::new_v4();
        debug!("Opened transaction {}", id);
        Self {
            context,
            id,
            records: Vec::new(),
            working: BTreeMap::new(),
            state: TransactionState::Pending,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn records(&self) -> &[MutationRecord] {
        &self.records
    }

    /// Types this transaction holds, ascending
    pub fn targets(&self) -> Vec<TypeIdentity> {
        self.working.keys().cloned().collect()
    }

    fn ensure_open(&self) -> Result<(), ReflexError> {
        if self.state == TransactionState::Pending {
            Ok(())
        } else {
            Err(ValidationError::TransactionClosed {
                state: self.state.to_string(),
            }
            .into())
        }
    }

    fn working_copy(&mut self, target: &TypeIdentity) -> Result<&mut WorkingCopy, ReflexError> {
        self.ensure_open()?;
        match self.working.entry(target.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let copy = WorkingCopy::acquire(&self.context, target)?;
                debug!("Transaction {} now holds {}", self.id, target);
                Ok(entry.insert(copy))
            }
        }
    }

    fn record(&mut self, target: &TypeIdentity, edit: StructuralEdit) -> Result<&mut Self, ReflexError> {
        let copy = self.working_copy(target)?;
        edit.apply(&mut copy.tree)
            .map_err(|e| ValidationError::from_edit(target, e))?;
        copy.edits.push(edit.clone());
        self.records.push(MutationRecord {
            target: target.clone(),
            operation: edit.kind(),
            edit,
        });
        Ok(self)
    }

    fn member(&self, descriptor: &MemberDescriptor, expected: MemberKind) -> Result<Member, ReflexError> {
        self.ensure_open()?;
        if descriptor.kind != expected {
            return Err(ValidationError::InvalidModifier {
                member: descriptor.name.clone(),
                reason: format!("expected a {expected:?} descriptor, got {:?}", descriptor.kind),
            }
            .into());
        }
        Ok(validation::build_member(
            descriptor,
            &self.context.config.annotations,
            self.context.parser.as_ref(),
        )?)
    }

    pub fn add_field(&mut self, target: &TypeIdentity, field: MemberDescriptor) -> Result<&mut Self, ReflexError> {
        let member = self.member(&field, MemberKind::Field)?;
        self.record(target, StructuralEdit::AddMember(member))
    }

    pub fn add_method(&mut self, target: &TypeIdentity, method: MemberDescriptor) -> Result<&mut Self, ReflexError> {
        let member = self.member(&method, MemberKind::Method)?;
        self.record(target, StructuralEdit::AddMember(member))
    }

    /// New body for an existing method. Without `parameter_names` the body
    /// may only use the method's current parameter names.
    pub fn replace_implementation(
        &mut self,
        target: &TypeIdentity,
        selector: MemberSelector,
        body: &str,
        parameter_names: Option<Vec<String>>,
    ) -> Result<&mut Self, ReflexError> {
        self.ensure_open()?;
        let body = validation::parse_body(self.context.parser.as_ref(), &selector.name, body)?;
        if let Some(names) = &parameter_names {
            for name in names {
                validation::check_identifier(name)?;
            }
        }

        let cache = self.context.cache.clone();
        let copy = self.working_copy(target)?;
        let keys = copy.tree.select(&selector);
        let method = match keys.as_slice() {
            [] => {
                return Err(ValidationError::UnknownMember {
                    identity: target.clone(),
                    member: selector.to_string(),
                }
                .into())
            }
            [key] => match copy.tree.members.get(key) {
                Some(Member::Method(method)) => method.clone(),
                _ => {
                    return Err(ValidationError::NotAMethod {
                        identity: target.clone(),
                        member: key.to_string(),
                    }
                    .into())
                }
            },
            _ => {
                return Err(ValidationError::AmbiguousMember {
                    identity: target.clone(),
                    selector: selector.to_string(),
                    candidates: keys.iter().map(|k| k.to_string()).collect(),
                }
                .into())
            }
        };

        let names = match &parameter_names {
            Some(names) => names.clone(),
            None => method.params.iter().map(|p| p.name.clone()).collect(),
        };
        let tree = &copy.tree;
        let is_type = |name: &str| tree.resolve_type_name(name, |id| cache.contains(id)).is_some();
        if let Some(name) = validation::free_names(&body, &names, &is_type).into_iter().next() {
            return Err(ValidationError::UnboundName {
                member: selector.to_string(),
                name,
            }
            .into());
        }

        self.record(
            target,
            StructuralEdit::ReplaceBody {
                selector,
                body,
                parameter_names,
            },
        )
    }

    pub fn set_annotation(
        &mut self,
        target: &TypeIdentity,
        on: MetadataTarget,
        annotation: Annotation,
    ) -> Result<&mut Self, ReflexError> {
        self.ensure_open()?;
        self.context.config.annotations.check(&annotation, &on)?;
        self.record(target, StructuralEdit::SetAnnotation { target: on, annotation })
    }

    pub fn set_imports(&mut self, target: &TypeIdentity, imports: Vec<String>) -> Result<&mut Self, ReflexError> {
        self.ensure_open()?;
        for import in &imports {
            check_import(import)?;
        }
        self.record(target, StructuralEdit::SetImports(imports))
    }

    pub fn add_import(&mut self, target: &TypeIdentity, import: impl Into<String>) -> Result<&mut Self, ReflexError> {
        self.ensure_open()?;
        let import = import.into();
        check_import(&import)?;
        self.record(target, StructuralEdit::AddImport(import))
    }

    pub fn remove_member(&mut self, target: &TypeIdentity, selector: MemberSelector) -> Result<&mut Self, ReflexError> {
        self.record(target, StructuralEdit::RemoveMember(selector))
    }

    /// Change or clear the declared parent. The name resolves the way code
    /// inside the target would resolve it.
    pub fn set_superclass(&mut self, target: &TypeIdentity, superclass: Option<&str>) -> Result<&mut Self, ReflexError> {
        self.ensure_open()?;
        let Some(name) = superclass else {
            return self.record(target, StructuralEdit::SetSuperclass(None));
        };
        let parent = TypeRef::named(name);
        check_type_ref(&parent)?;
        let cache = self.context.cache.clone();
        let copy = self.working_copy(target)?;
        let resolved = copy
            .tree
            .resolve_type_name(name, |id| cache.contains(id))
            .ok_or_else(|| ValidationError::UnknownType {
                identity: TypeIdentity::new(name),
            })?;
        self.context.index.check(&resolved, target)?;
        self.record(target, StructuralEdit::SetSuperclass(Some(parent)))
    }

    /// Compile, install and publish every pending mutation at once
    pub fn commit(&mut self) -> Result<CommitReport, ReflexError> {
        self.ensure_open()?;
        self.state = TransactionState::Compiling;
        let working = std::mem::take(&mut self.working);
        info!(
            "Committing transaction {} ({} mutation(s) on {} type(s))",
            self.id,
            self.records.len(),
            working.len()
        );
        let result = driver::commit(&self.context, working);
        self.state = match &result {
            Ok(_) => TransactionState::Installed,
            Err(ReflexError::Commit(error)) if error.is_partial_publish() => TransactionState::PartiallyInstalled,
            Err(_) => TransactionState::Aborted,
        };
        result
    }

    /// Drop every pending mutation and release the held types. Calling it
    /// again, or after commit, does nothing.
    pub fn discard(&mut self) {
        if self.state != TransactionState::Pending {
            return;
        }
        self.state = TransactionState::Aborted;
        self.working.clear();
        info!(
            "Discarded transaction {} with {} pending mutation(s)",
            self.id,
            self.records.len()
        );
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Pending && !self.working.is_empty() {
            debug!("Transaction {} dropped while pending; discarding", self.id);
            self.discard();
        }
    }
}
