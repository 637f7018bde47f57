//! Compile-and-swap driver
//!
//! Turns the working copies of one transaction into published versions:
//! regenerate source, compile the batch against the installed signatures,
//! install each artifact through the host, then publish in ascending
//! identity order. Everything before publish is invisible to other threads.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::ast::TypeIdentity;
use crate::compiler::{CompiledType, Diagnostic, SourceUnit};
use crate::engine::EngineContext;
use crate::error::{AccessibilityError, CommitError, CompilationFailed, ReflexError};
use crate::host::LoadedType;
use crate::intercessor::transaction::WorkingCopy;
use crate::ledger::{Version, VersionDraft};
use crate::security::{Ancestry, MAX_HIERARCHY_DEPTH};
use crate::storage::{InheritanceCycleError, StorageError};

/// What a successful commit installed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// (type, published generation), ascending by type
    pub installed: Vec<(TypeIdentity, u64)>,
}

impl CommitReport {
    pub fn generation_of(&self, identity: &TypeIdentity) -> Option<u64> {
        self.installed
            .iter()
            .find(|(installed, _)| installed == identity)
            .map(|(_, generation)| *generation)
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}

/// Parent edges as they will be once the batch is published
struct PendingAncestry<'a> {
    context: &'a EngineContext,
    overrides: BTreeMap<TypeIdentity, Option<TypeIdentity>>,
}

impl Ancestry for PendingAncestry<'_> {
    fn superclass_of(&self, identity: &TypeIdentity) -> Option<TypeIdentity> {
        match self.overrides.get(identity) {
            Some(parent) => parent.clone(),
            None => self.context.index.parent_of(identity),
        }
    }
}

fn check_cycles(
    context: &EngineContext,
    working: &BTreeMap<TypeIdentity, WorkingCopy>,
) -> Result<(), InheritanceCycleError> {
    let overrides = working
        .iter()
        .map(|(identity, copy)| {
            let parent = copy.tree.superclass_identity(|id| context.cache.contains(id));
            (identity.clone(), parent)
        })
        .collect();
    let ancestry = PendingAncestry { context, overrides };
    for child in working.keys() {
        let mut seen = HashSet::new();
        let mut cursor = ancestry.superclass_of(child);
        while let Some(parent) = cursor {
            if parent == *child || seen.len() >= MAX_HIERARCHY_DEPTH {
                return Err(InheritanceCycleError {
                    parent: ancestry.superclass_of(child).unwrap_or(parent),
                    child: child.clone(),
                });
            }
            if !seen.insert(parent.clone()) {
                break;
            }
            cursor = ancestry.superclass_of(&parent);
        }
    }
    Ok(())
}

/// Pull loaded subtypes of structurally edited types into the batch.
/// Fails with the subtype that another transaction holds.
fn add_dependents(
    context: &EngineContext,
    working: &mut BTreeMap<TypeIdentity, WorkingCopy>,
) -> Result<(), (TypeIdentity, ReflexError)> {
    let loaded: HashSet<_> = context.cache.loaded().into_iter().collect();
    let roots: Vec<_> = working
        .iter()
        .filter(|(_, copy)| copy.is_structural())
        .map(|(identity, _)| identity.clone())
        .collect();
    for root in roots {
        for descendant in context.index.descendants_of(&root) {
            if working.contains_key(&descendant)
                || !loaded.contains(&descendant)
                || context.is_excluded(&descendant)
            {
                continue;
            }
            debug!("Recompiling {} against the new {}", descendant, root);
            match WorkingCopy::dependent(context, &descendant) {
                Ok(copy) => {
                    working.insert(descendant, copy);
                }
                Err(e) => return Err((descendant, e)),
            }
        }
    }
    Ok(())
}

fn compile_failure(diagnostics: Vec<Diagnostic>) -> ReflexError {
    if !diagnostics.is_empty() && diagnostics.iter().all(Diagnostic::is_access_violation) {
        AccessibilityError::Compile { diagnostics }.into()
    } else {
        CompilationFailed { diagnostics }.into()
    }
}

fn failed(
    targets: &[TypeIdentity],
    failing: Vec<TypeIdentity>,
    published: Vec<TypeIdentity>,
    cause: impl Into<ReflexError>,
) -> ReflexError {
    let error = CommitError {
        targets: targets.to_vec(),
        failing,
        published,
        cause: Box::new(cause.into()),
    };
    warn!("{}", error);
    error.into()
}

struct Installed {
    identity: TypeIdentity,
    draft: VersionDraft,
    loaded: LoadedType,
    source: String,
}

fn rollback(context: &EngineContext, drafts: impl IntoIterator<Item = (TypeIdentity, VersionDraft)>) {
    for (identity, draft) in drafts {
        if let Err(e) = context.ledger.rollback_draft(&identity, draft) {
            warn!("Could not roll back draft of {}: {}", identity, e);
        }
    }
}

/// Install and publish the working copies. The copies (and the type locks
/// they hold) are released when this returns.
pub(crate) fn commit(
    context: &EngineContext,
    mut working: BTreeMap<TypeIdentity, WorkingCopy>,
) -> Result<CommitReport, ReflexError> {
    if working.is_empty() {
        return Ok(CommitReport::default());
    }
    if let Err((busy, cause)) = add_dependents(context, &mut working) {
        let mut targets: Vec<_> = working.keys().cloned().collect();
        targets.push(busy.clone());
        targets.sort();
        return Err(failed(&targets, vec![busy], Vec::new(), cause));
    }
    let targets: Vec<_> = working.keys().cloned().collect();

    if let Err(cycle) = check_cycles(context, &working) {
        return Err(failed(&targets, vec![cycle.child.clone()], Vec::new(), cycle));
    }

    // Regenerate and compile the whole batch
    let mut sources = BTreeMap::new();
    let units: Vec<_> = working
        .iter()
        .map(|(identity, copy)| {
            let source = context.parser.print(&copy.tree);
            sources.insert(identity.clone(), source.clone());
            SourceUnit::new(identity.clone(), source)
        })
        .collect();
    debug!("Compiling {} unit(s) with {}", units.len(), context.compiler.name());
    let compiled: Vec<CompiledType> = match context.compiler.compile(&units, context.ledger.as_ref()) {
        Ok(compiled) => compiled,
        Err(diagnostics) => {
            let mut failing: Vec<_> = diagnostics.iter().map(|d| d.unit.clone()).collect();
            failing.sort();
            failing.dedup();
            return Err(failed(&targets, failing, Vec::new(), compile_failure(diagnostics)));
        }
    };
    let mut compiled: BTreeMap<_, _> = compiled
        .into_iter()
        .map(|artifact| (artifact.identity.clone(), artifact))
        .collect();

    // Install every artifact under a reserved generation
    let mut installed: Vec<Installed> = Vec::with_capacity(targets.len());
    for identity in &targets {
        let Some(artifact) = compiled.remove(identity) else {
            rollback(context, installed.into_iter().map(|i| (i.identity, i.draft)));
            return Err(failed(
                &targets,
                vec![identity.clone()],
                Vec::new(),
                CompilationFailed {
                    diagnostics: Vec::new(),
                },
            ));
        };
        let draft = match context.ledger.begin_install(identity) {
            Ok(draft) => draft,
            Err(e) => {
                rollback(context, installed.into_iter().map(|i| (i.identity, i.draft)));
                return Err(failed(&targets, vec![identity.clone()], Vec::new(), e));
            }
        };
        match context.host.install(identity, artifact, draft.generation) {
            Ok(loaded) => installed.push(Installed {
                identity: identity.clone(),
                draft,
                loaded,
                source: sources.remove(identity).unwrap_or_default(),
            }),
            Err(e) => {
                rollback(
                    context,
                    installed
                        .into_iter()
                        .map(|i| (i.identity, i.draft))
                        .chain(std::iter::once((identity.clone(), draft))),
                );
                return Err(failed(&targets, vec![identity.clone()], Vec::new(), e));
            }
        }
    }

    // Publish, ascending. From here on a failure is a partial publish.
    let mut published: Vec<TypeIdentity> = Vec::new();
    let mut report = CommitReport::default();
    let mut pending = installed.into_iter();
    while let Some(next) = pending.next() {
        let generation = next.draft.generation;
        let check = match &context.store {
            Some(store) if !store.contains_modified(&next.identity, generation) => {
                Err(ReflexError::from(StorageError::ArtifactNotFound {
                    identity: next.identity.clone(),
                    generation,
                }))
            }
            _ => Ok(()),
        };
        let outcome = check.and_then(|()| {
            context
                .ledger
                .publish(&next.identity, Version::new(next.loaded, next.source))
                .map_err(ReflexError::from)
        });
        match outcome {
            Ok(version) => {
                info!("Published {} generation {}", next.identity, version.generation);
                report.installed.push((next.identity.clone(), version.generation));
                published.push(next.identity);
            }
            Err(e) => {
                rollback(
                    context,
                    std::iter::once((next.identity.clone(), next.draft))
                        .chain(pending.map(|i| (i.identity, i.draft))),
                );
                follow_ledger(context, &mut working, &published);
                return Err(failed(&targets, vec![next.identity], published, e));
            }
        }
    }

    // The cache follows the ledger
    for (identity, copy) in std::mem::take(&mut working) {
        if let Err(e) = context.cache.replace(&identity, copy.tree) {
            return Err(failed(&targets, vec![identity], published, e));
        }
    }
    Ok(report)
}

/// Move the trees of already published types into the cache after a
/// failed publish
fn follow_ledger(
    context: &EngineContext,
    working: &mut BTreeMap<TypeIdentity, WorkingCopy>,
    published: &[TypeIdentity],
) {
    for identity in published {
        if let Some(copy) = working.remove(identity) {
            if let Err(e) = context.cache.replace(identity, copy.tree) {
                warn!("Cache of {} is behind its published version: {}", identity, e);
            }
        }
    }
}

/// Compile and install one synthesized type that is never published
pub(crate) fn load_ephemeral(context: &EngineContext, unit: SourceUnit) -> Result<Arc<LoadedType>, ReflexError> {
    let identity = unit.identity.clone();
    let mut compiled = context
        .compiler
        .compile(std::slice::from_ref(&unit), context.ledger.as_ref())
        .map_err(compile_failure)?;
    let artifact = compiled
        .pop()
        .ok_or_else(|| ReflexError::from(CompilationFailed {
            diagnostics: Vec::new(),
        }))?;
    let loaded = context.host.load_ephemeral(artifact)?;
    debug!("Loaded ephemeral {}", identity);
    Ok(Arc::new(loaded))
}
