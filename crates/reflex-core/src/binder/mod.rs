// Invoker binder
// Resolves a member of the current version plus a requested call shape into
// a handle backed by a small compiled adapter type. Adapters are cached per
// (member, shape) until any type in the owner's chain is republished.

pub mod adapter;


use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::ast::{TypeIdentity, TypeRef, Visibility};
use crate::compiler::{MethodRef, SourceUnit, Ty};
use crate::driver;
use crate::engine::EngineContext;
use crate::error::{AccessibilityError, ReflexError, ResolutionError, ValidationError};
use crate::evaluator::{EvalResult, Evaluator, Value};
use crate::host::LoadedType;
use crate::intercessor::validation::{check_identifier, check_import, check_type_ref};
use crate::security::AccessContext;

/// Parameter and return types a caller wants, plus where the call comes
/// from. Instance members take their receiver as an extra first argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallableShape {
    pub params: Vec<TypeRef>,
    pub returns: TypeRef,
    /// Type whose code will use the handle; `None` for external callers
    pub caller: Option<TypeIdentity>,
}

impl CallableShape {
    pub fn new(params: &[&str], returns: &str) -> Self {
        Self {
            params: params.iter().map(|p| TypeRef::named(*p)).collect(),
            returns: TypeRef::named(returns),
            caller: None,
        }
    }

    pub fn from_caller(mut self, caller: TypeIdentity) -> Self {
        self.caller = Some(caller);
        self
    }

    fn access(&self) -> AccessContext {
        match &self.caller {
            Some(caller) => AccessContext::within(caller.clone()),
            None => AccessContext::external(),
        }
    }
}

/// Ad-hoc expression to compile into a callable
#[derive(Debug, Clone, PartialEq)]
pub struct EvalRequest {
    pub parameter_names: Vec<String>,
    /// Declared parameter types; `any` for every parameter when absent
    pub environment_types: Option<Vec<TypeRef>>,
    pub imports: Vec<String>,
    pub expression: String,
    pub shape: CallableShape,
}

impl EvalRequest {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            parameter_names: Vec::new(),
            environment_types: None,
            imports: Vec::new(),
            expression: expression.into(),
            shape: CallableShape::new(&[], "any"),
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        let ty = TypeRef::named(ty);
        self.parameter_names.push(name.into());
        self.environment_types.get_or_insert_with(Vec::new).push(ty.clone());
        self.shape.params.push(ty);
        self
    }

    pub fn untyped_parameter(mut self, name: impl Into<String>) -> Self {
        self.parameter_names.push(name.into());
        self
    }

    pub fn import(mut self, import: impl Into<String>) -> Self {
        self.imports.push(import.into());
        self
    }

    pub fn returning(mut self, ty: impl Into<String>) -> Self {
        self.shape.returns = TypeRef::named(ty);
        self
    }

    fn parameters(&self) -> Result<Vec<(String, TypeRef)>, ReflexError> {
        let types = match &self.environment_types {
            Some(types) if types.len() != self.parameter_names.len() => {
                return Err(ResolutionError::ShapeMismatch {
                    member: "eval".to_string(),
                    reason: format!(
                        "{} parameter name(s) but {} environment type(s)",
                        self.parameter_names.len(),
                        types.len()
                    ),
                }
                .into())
            }
            Some(types) => types.clone(),
            None => vec![TypeRef::any(); self.parameter_names.len()],
        };
        Ok(self.parameter_names.iter().cloned().zip(types).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Method,
    Field,
}

/// A member found on the current version of a type or one of its ancestors
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMember {
    pub declaring: TypeIdentity,
    pub name: String,
    pub kind: BindingKind,
    pub visibility: Visibility,
    pub is_static: bool,
    pub params: Vec<Ty>,
    pub returns: Ty,
}

/// A callable handle. The adapter it runs stays valid even after the
/// member's owner is redefined; the binder just stops handing it out.
#[derive(Clone)]
pub struct Invoker {
    adapter: Arc<LoadedType>,
    entry: MethodRef,
    evaluator: Evaluator,
    description: String,
}

impl Invoker {
    fn new(adapter: Arc<LoadedType>, entry_name: &str, evaluator: Evaluator, description: String) -> Result<Self, ReflexError> {
        let entry = adapter
            .methods_named(entry_name)
            .next()
            .map(|method| method.method_ref())
            .ok_or_else(|| ResolutionError::MemberNotFound {
                identity: adapter.identity.clone(),
                member: entry_name.to_string(),
            })?;
        Ok(Self {
            adapter,
            entry,
            evaluator,
            description,
        })
    }

    pub fn invoke(&self, args: Vec<Value>) -> EvalResult<Value> {
        self.evaluator.invoke_loaded(&self.adapter, &self.entry, None, args)
    }

    pub fn arity(&self) -> usize {
        self.entry.params.len()
    }

    /// Identity of the synthesized type behind the handle
    pub fn adapter(&self) -> &TypeIdentity {
        &self.adapter.identity
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("adapter", &self.adapter.identity)
            .field("entry", &self.entry.to_string())
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingKey {
    owner: TypeIdentity,
    member: String,
    kind: BindingKind,
    shape: CallableShape,
}

struct CachedBinding {
    /// Generations of the owner and its ancestors when the adapter was built
    generations: Vec<(TypeIdentity, u64)>,
    invoker: Arc<Invoker>,
}

fn param_matches(actual: &Ty, written: &TypeRef) -> bool {
    match actual {
        Ty::Class(identity) => identity.as_str() == written.as_str() || identity.simple_name() == written.as_str(),
        other => other.to_string() == written.as_str(),
    }
}

pub struct InvokerBinder {
    context: Arc<EngineContext>,
    bindings: DashMap<BindingKey, CachedBinding>,
}

impl InvokerBinder {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self {
            context,
            bindings: DashMap::new(),
        }
    }

    /// Current versions of `owner` and its ancestors, nearest first
    fn chain(&self, owner: &TypeIdentity) -> Result<Vec<Arc<LoadedType>>, ResolutionError> {
        let mut chain = Vec::new();
        let mut cursor = Some(owner.clone());
        while let Some(identity) = cursor {
            let version = self
                .context
                .ledger
                .current_version(&identity)
                .map_err(|_| ResolutionError::TypeNotLoaded {
                    identity: identity.clone(),
                })?;
            cursor = version.artifact.superclass().cloned();
            chain.push(version.artifact.clone());
            if chain.len() >= crate::security::MAX_HIERARCHY_DEPTH {
                break;
            }
        }
        Ok(chain)
    }

    fn generations(chain: &[Arc<LoadedType>]) -> Vec<(TypeIdentity, u64)> {
        chain
            .iter()
            .map(|loaded| (loaded.identity.clone(), loaded.generation))
            .collect()
    }

    fn is_current(&self, generations: &[(TypeIdentity, u64)]) -> bool {
        generations
            .iter()
            .all(|(identity, generation)| self.context.ledger.current_generation(identity) == Some(*generation))
    }

    fn resolve(
        &self,
        chain: &[Arc<LoadedType>],
        owner: &TypeIdentity,
        member: &str,
        kind: BindingKind,
        shape: &CallableShape,
    ) -> Result<ResolvedMember, ResolutionError> {
        for loaded in chain {
            let found = match kind {
                BindingKind::Method => loaded
                    .methods_named(member)
                    .find(|method| {
                        method.params.len() == shape.params.len()
                            && method
                                .params
                                .iter()
                                .zip(&shape.params)
                                .all(|((_, actual), written)| param_matches(actual, written))
                    })
                    .map(|method| ResolvedMember {
                        declaring: loaded.identity.clone(),
                        name: method.name.clone(),
                        kind,
                        visibility: method.modifiers.visibility,
                        is_static: method.modifiers.is_static,
                        params: method.params.iter().map(|(_, ty)| ty.clone()).collect(),
                        returns: method.return_type.clone(),
                    }),
                BindingKind::Field => loaded.artifact.field(member).map(|field| ResolvedMember {
                    declaring: loaded.identity.clone(),
                    name: field.name.clone(),
                    kind,
                    visibility: field.modifiers.visibility,
                    is_static: false,
                    params: Vec::new(),
                    returns: field.ty.clone(),
                }),
            };
            if let Some(found) = found {
                return Ok(found);
            }
        }
        Err(ResolutionError::MemberNotFound {
            identity: owner.clone(),
            member: member.to_string(),
        })
    }

    fn bind(
        &self,
        owner: &TypeIdentity,
        member: &str,
        kind: BindingKind,
        shape: CallableShape,
    ) -> Result<Arc<Invoker>, ReflexError> {
        let key = BindingKey {
            owner: owner.clone(),
            member: member.to_string(),
            kind,
            shape,
        };
        if let Some(cached) = self.bindings.get(&key) {
            if self.is_current(&cached.generations) {
                debug!("Reusing adapter {} for {}.{}", cached.invoker.adapter(), owner, member);
                return Ok(cached.invoker.clone());
            }
        }
        self.bindings.remove(&key);

        let shape = &key.shape;
        if kind == BindingKind::Field && shape.params.len() > 1 {
            return Err(ResolutionError::ShapeMismatch {
                member: member.to_string(),
                reason: "a field handle takes no argument (get) or one (set)".to_string(),
            }
            .into());
        }
        for ty in shape.params.iter().chain(std::iter::once(&shape.returns)) {
            check_type_ref(ty)?;
        }

        let chain = self.chain(owner)?;
        let resolved = match kind {
            BindingKind::Method => self.resolve(&chain, owner, member, kind, shape)?,
            // A setter's shape describes the value, not a parameter list
            BindingKind::Field => {
                let lookup = CallableShape {
                    params: Vec::new(),
                    ..shape.clone()
                };
                self.resolve(&chain, owner, member, kind, &lookup)?
            }
        };
        let access = shape.access();
        if !access.permits(resolved.visibility, &resolved.declaring, self.context.ledger.as_ref()) {
            return Err(AccessibilityError::Binding {
                member: format!("{owner}.{member}"),
                source: ResolutionError::NotAccessible {
                    member: member.to_string(),
                    owner: resolved.declaring.clone(),
                    visibility: resolved.visibility.keyword().to_string(),
                    caller: access.describe(),
                },
            }
            .into());
        }

        let (identity, source) = adapter::adapter_source(owner, &resolved, shape);
        let mut unit = SourceUnit::new(identity, source);
        if resolved.visibility != Visibility::Public {
            if let Some(caller) = &shape.caller {
                unit = unit.privileged_as(caller.clone());
            }
        }
        let loaded = driver::load_ephemeral(&self.context, unit)?;
        let invoker = Arc::new(Invoker::new(
            loaded,
            adapter::ADAPTER_ENTRY,
            self.context.evaluator.clone(),
            format!("{owner}.{member}"),
        )?);
        info!("Bound {}.{} through {}", owner, member, invoker.adapter());
        self.bindings.insert(
            key,
            CachedBinding {
                generations: Self::generations(&chain),
                invoker: invoker.clone(),
            },
        );
        Ok(invoker)
    }

    /// Handle calling `member` of the current version of `owner` (or an
    /// ancestor) whose parameter types match `shape`
    pub fn get_method_invoker(
        &self,
        owner: &TypeIdentity,
        member: &str,
        shape: CallableShape,
    ) -> Result<Arc<Invoker>, ReflexError> {
        self.bind(owner, member, BindingKind::Method, shape)
    }

    /// Getter handle when the shape has no parameter, setter handle when it
    /// has one
    pub fn get_field_invoker(
        &self,
        owner: &TypeIdentity,
        member: &str,
        shape: CallableShape,
    ) -> Result<Arc<Invoker>, ReflexError> {
        self.bind(owner, member, BindingKind::Field, shape)
    }

    /// Compile an expression into a fresh handle. Never cached.
    pub fn generate_eval_invoker(&self, request: &EvalRequest) -> Result<Arc<Invoker>, ReflexError> {
        for name in &request.parameter_names {
            check_identifier(name)?;
        }
        for import in &request.imports {
            check_import(import)?;
        }
        let parameters = request.parameters()?;
        for (_, ty) in &parameters {
            check_type_ref(ty)?;
        }
        check_type_ref(&request.shape.returns)?;
        let expression = self
            .context
            .parser
            .parse_expression(&request.expression)
            .map_err(|error| ValidationError::Syntax {
                context: "eval expression".to_string(),
                error,
            })?;

        let (identity, source) =
            adapter::eval_source(&parameters, &request.imports, &expression, &request.shape.returns);
        let mut unit = SourceUnit::new(identity, source);
        if let Some(caller) = &request.shape.caller {
            unit = unit.privileged_as(caller.clone());
        }
        let loaded = driver::load_ephemeral(&self.context, unit)?;
        let invoker = Invoker::new(
            loaded,
            adapter::EVAL_ENTRY,
            self.context.evaluator.clone(),
            request.expression.clone(),
        )?;
        debug!("Compiled eval {} for `{}`", invoker.adapter(), request.expression);
        Ok(Arc::new(invoker))
    }

    /// Bindings currently cached, stale ones included
    pub fn cached_bindings(&self) -> usize {
        self.bindings.len()
    }
}
