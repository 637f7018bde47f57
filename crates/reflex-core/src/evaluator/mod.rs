// Evaluator for linked Reflex types
// Executes method bodies of `LoadedType`s. A call frame keeps the version it
// resolved when the call started, so a publish during the call never
// upgrades it midway; the next call sees the new version.

pub mod errors;
pub mod value;

#[cfg(test)]
mod tests;

pub use errors::EvaluatorError;
pub use value::{Instance, ObjectRef, Value};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::ast::{BinaryOp, TypeIdentity, UnaryOp, Visibility};
use crate::compiler::ir::{
    CallTarget, CompiledMethod, Dispatch, FieldAccess, FieldRef, Instr, MethodRef, Node,
};
use crate::compiler::Ty;
use crate::host::LoadedType;
use crate::security::{AccessContext, Ancestry, MAX_HIERARCHY_DEPTH};

pub type EvalResult<T> = Result<T, EvaluatorError>;

/// Default bound on nested method calls
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Source of the live version of each type
pub trait TypeResolver: Send + Sync {
    fn current_type(&self, identity: &TypeIdentity) -> Option<Arc<LoadedType>>;
}

/// Ancestry as seen through the current versions
struct RuntimeAncestry<'a>(&'a dyn TypeResolver);

impl Ancestry for RuntimeAncestry<'_> {
    fn superclass_of(&self, identity: &TypeIdentity) -> Option<TypeIdentity> {
        self.0
            .current_type(identity)
            .and_then(|loaded| loaded.superclass().cloned())
    }
}

struct Frame {
    loaded: Arc<LoadedType>,
    this: Option<ObjectRef>,
    locals: Vec<Value>,
    depth: usize,
}

impl Frame {
    /// Access rights of the code running in this frame
    fn access(&self) -> AccessContext {
        AccessContext::within(
            self.loaded
                .artifact
                .privileged_as
                .clone()
                .unwrap_or_else(|| self.loaded.identity.clone()),
        )
    }
}

enum Flow {
    Normal,
    Return(Value),
}

/// Interpreter over linked IR
#[derive(Clone)]
pub struct Evaluator {
    types: Arc<dyn TypeResolver>,
    max_depth: usize,
}

impl Evaluator {
    pub fn new(types: Arc<dyn TypeResolver>, max_depth: usize) -> Self {
        Self { types, max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn resolve(&self, identity: &TypeIdentity) -> EvalResult<Arc<LoadedType>> {
        self.types
            .current_type(identity)
            .ok_or_else(|| EvaluatorError::TypeNotLoaded {
                identity: identity.clone(),
            })
    }

    /// Like `resolve`, but an ephemeral type running in `frame` sees itself
    fn resolve_from(&self, frame: &Frame, identity: &TypeIdentity) -> EvalResult<Arc<LoadedType>> {
        if frame.loaded.ephemeral && frame.loaded.identity == *identity {
            return Ok(frame.loaded.clone());
        }
        self.resolve(identity)
    }

    /// Current versions of `identity` and its ancestors, nearest first
    fn chain(&self, identity: &TypeIdentity) -> EvalResult<Vec<Arc<LoadedType>>> {
        let mut chain = Vec::new();
        let mut cursor = Some(identity.clone());
        while let Some(next) = cursor {
            if chain.len() >= MAX_HIERARCHY_DEPTH {
                break;
            }
            let loaded = self.resolve(&next)?;
            cursor = loaded.superclass().cloned();
            chain.push(loaded);
        }
        Ok(chain)
    }

    fn is_subtype(&self, identity: &TypeIdentity, ancestor: &TypeIdentity) -> bool {
        RuntimeAncestry(self.types.as_ref()).is_subtype_of(identity, ancestor)
    }

    // -- public entry points --------------------------------------------------

    /// Allocate an instance and run the `init` overload matching `args`
    pub fn instantiate(&self, identity: &TypeIdentity, args: Vec<Value>) -> EvalResult<Value> {
        let object = self.allocate(identity)?;
        let inits = self.candidates(identity, "init", &args, false)?;
        match inits.into_iter().next() {
            Some((loaded, index)) => {
                self.execute(loaded, index, Some(object.clone()), args, 0)?;
            }
            None if args.is_empty() => {}
            None => {
                return Err(EvaluatorError::MethodNotFound {
                    method: describe("init", &args),
                    owner: identity.clone(),
                })
            }
        }
        Ok(Value::Object(object))
    }

    /// Call an instance method by name, choosing the overload from the
    /// runtime argument types
    pub fn call_method(&self, receiver: &Value, name: &str, args: Vec<Value>) -> EvalResult<Value> {
        let object = match receiver {
            Value::Object(object) => object.clone(),
            _ => {
                return Err(EvaluatorError::NullReceiver {
                    member: name.to_string(),
                })
            }
        };
        let (loaded, index) = self
            .candidates(object.class(), name, &args, false)?
            .into_iter()
            .next()
            .ok_or_else(|| EvaluatorError::MethodNotFound {
                method: describe(name, &args),
                owner: object.class().clone(),
            })?;
        self.execute(loaded, index, Some(object), args, 0)
    }

    /// Call a static method by name
    pub fn call_static(&self, identity: &TypeIdentity, name: &str, args: Vec<Value>) -> EvalResult<Value> {
        let (loaded, index) = self
            .candidates(identity, name, &args, true)?
            .into_iter()
            .next()
            .ok_or_else(|| EvaluatorError::MethodNotFound {
                method: describe(name, &args),
                owner: identity.clone(),
            })?;
        self.execute(loaded, index, None, args, 0)
    }

    /// Run exactly `method` of an already resolved type. Used by invoker
    /// handles, which hold on to their adapter.
    pub fn invoke_loaded(
        &self,
        loaded: &Arc<LoadedType>,
        method: &MethodRef,
        receiver: Option<ObjectRef>,
        args: Vec<Value>,
    ) -> EvalResult<Value> {
        let index = method_index(loaded, method).ok_or_else(|| EvaluatorError::MethodNotFound {
            method: method.to_string(),
            owner: loaded.identity.clone(),
        })?;
        self.execute(loaded.clone(), index, receiver, args, 0)
    }

    /// Host-level field read by name; ignores visibility
    pub fn field_value(&self, object: &ObjectRef, name: &str) -> EvalResult<Value> {
        let field = self.dynamic_field(object.class(), name)?;
        self.read_field(object, &field)
    }

    /// Host-level field write by name; ignores visibility
    pub fn set_field_value(&self, object: &ObjectRef, name: &str, value: Value) -> EvalResult<()> {
        let field = self.dynamic_field(object.class(), name)?;
        self.write_field(object, &field, value)
    }

    // -- lookup -------------------------------------------------------------

    /// Methods named `name` applicable to `args`, nearest declaration first,
    /// exact type matches ahead of widening ones
    fn candidates(
        &self,
        identity: &TypeIdentity,
        name: &str,
        args: &[Value],
        want_static: bool,
    ) -> EvalResult<Vec<(Arc<LoadedType>, usize)>> {
        let mut seen: Vec<MethodRef> = Vec::new();
        let mut exact = Vec::new();
        let mut widening = Vec::new();
        for loaded in self.chain(identity)? {
            for (index, method) in loaded.artifact.methods.iter().enumerate() {
                if method.name != name || method.modifiers.is_static != want_static {
                    continue;
                }
                let method_ref = method.method_ref();
                if seen.contains(&method_ref) {
                    continue;
                }
                seen.push(method_ref);
                if method.params.len() != args.len() {
                    continue;
                }
                let fits = method.params.iter().zip(args).all(|((_, ty), arg)| self.fits(arg, ty));
                let same = method.params.iter().zip(args).all(|((_, ty), arg)| exact_type(arg, ty));
                if same {
                    exact.push((loaded.clone(), index));
                } else if fits {
                    widening.push((loaded.clone(), index));
                }
            }
        }
        exact.extend(widening);
        Ok(exact)
    }

    /// Find `method` starting at `identity` and walking up
    fn lookup(&self, identity: &TypeIdentity, method: &MethodRef) -> EvalResult<(Arc<LoadedType>, usize)> {
        for loaded in self.chain(identity)? {
            if let Some(index) = method_index(&loaded, method) {
                return Ok((loaded, index));
            }
        }
        Err(EvaluatorError::MethodNotFound {
            method: method.to_string(),
            owner: identity.clone(),
        })
    }

    /// Field of the current version chain, as a linked reference
    fn dynamic_field(&self, identity: &TypeIdentity, name: &str) -> EvalResult<FieldRef> {
        for loaded in self.chain(identity)? {
            if let Some(accessor) = loaded.accessors.get(name) {
                return Ok(FieldRef {
                    owner: loaded.identity.clone(),
                    name: accessor.name.clone(),
                    ty: accessor.ty.clone(),
                    default: accessor.default.clone(),
                    access: accessor.access.clone(),
                });
            }
        }
        Err(EvaluatorError::FieldNotFound {
            field: name.to_string(),
            owner: identity.clone(),
        })
    }

    fn dynamic_field_visibility(&self, owner: &TypeIdentity, name: &str) -> Visibility {
        self.types
            .current_type(owner)
            .and_then(|loaded| loaded.accessors.get(name).map(|a| a.visibility))
            .unwrap_or_default()
    }

    fn check_access(
        &self,
        frame: &Frame,
        visibility: Visibility,
        owner: &TypeIdentity,
        member: String,
    ) -> EvalResult<()> {
        let access = frame.access();
        if access.permits(visibility, owner, &RuntimeAncestry(self.types.as_ref())) {
            Ok(())
        } else {
            Err(EvaluatorError::Inaccessible {
                member,
                owner: owner.clone(),
                visibility: visibility.keyword().to_string(),
                caller: access.describe(),
            })
        }
    }

    // -- instances ----------------------------------------------------------

    /// Fresh instance: one slot vector per type of the hierarchy, laid out
    /// by the original layout and filled with the current defaults
    fn allocate(&self, identity: &TypeIdentity) -> EvalResult<ObjectRef> {
        let mut direct = HashMap::new();
        for loaded in self.chain(identity)? {
            let mut slots: Vec<Value> = loaded
                .layout
                .slots
                .iter()
                .map(|slot| Value::from_const(&slot.default))
                .collect();
            for accessor in loaded.accessors.iter() {
                if let FieldAccess::Direct(slot) = accessor.access {
                    if let Some(target) = slots.get_mut(slot) {
                        *target = Value::from_const(&accessor.default);
                    }
                }
            }
            direct.insert(loaded.identity.clone(), slots);
        }
        trace!("Allocated instance of {}", identity);
        Ok(Arc::new(Instance::new(identity.clone(), direct)))
    }

    fn read_field(&self, object: &ObjectRef, field: &FieldRef) -> EvalResult<Value> {
        match field.access {
            FieldAccess::Direct(slot) => Ok(object
                .read_slot(&field.owner, slot)
                .unwrap_or_else(|| object.read_extension(&field.owner, &field.name, &field.default))),
            FieldAccess::Indirect => Ok(object.read_extension(&field.owner, &field.name, &field.default)),
            FieldAccess::Unlinked => Err(EvaluatorError::Unlinked {
                what: format!("field `{}`", field.name),
                owner: field.owner.clone(),
            }),
        }
    }

    fn write_field(&self, object: &ObjectRef, field: &FieldRef, value: Value) -> EvalResult<()> {
        let value = self.conform(value, &field.ty, &field.name)?;
        match field.access {
            FieldAccess::Direct(slot) => {
                if !object.write_slot(&field.owner, slot, value.clone()) {
                    object.write_extension(&field.owner, &field.name, value);
                }
                Ok(())
            }
            FieldAccess::Indirect => {
                object.write_extension(&field.owner, &field.name, value);
                Ok(())
            }
            FieldAccess::Unlinked => Err(EvaluatorError::Unlinked {
                what: format!("field `{}`", field.name),
                owner: field.owner.clone(),
            }),
        }
    }

    // -- typing -------------------------------------------------------------

    fn fits(&self, value: &Value, ty: &Ty) -> bool {
        match (value, ty) {
            (_, Ty::Any) => true,
            (Value::Int(_), Ty::Int | Ty::Float) => true,
            (Value::Float(_), Ty::Float) => true,
            (Value::Bool(_), Ty::Bool) => true,
            (Value::Str(_), Ty::Str) => true,
            (Value::Null, Ty::Str | Ty::Class(_) | Ty::Null) => true,
            (Value::Object(object), Ty::Class(class)) => self.is_subtype(object.class(), class),
            _ => false,
        }
    }

    /// Check a value against a declared type, widening `int` to `float`
    fn conform(&self, value: Value, ty: &Ty, what: &str) -> EvalResult<Value> {
        if *ty == Ty::Void {
            return Ok(Value::Null);
        }
        if self.fits(&value, ty) {
            Ok(value.coerce_to(ty))
        } else {
            Err(EvaluatorError::unary_type_error(what, &ty.to_string(), &value.type_name()))
        }
    }

    // -- execution ----------------------------------------------------------

    fn execute(
        &self,
        loaded: Arc<LoadedType>,
        index: usize,
        this: Option<ObjectRef>,
        args: Vec<Value>,
        depth: usize,
    ) -> EvalResult<Value> {
        if depth >= self.max_depth {
            return Err(EvaluatorError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        let method: &CompiledMethod = &loaded.artifact.methods[index];
        if method.params.len() != args.len() {
            return Err(EvaluatorError::ArityMismatch {
                method: method.name.clone(),
                expected: method.params.len(),
                actual: args.len(),
            });
        }
        let body = method.body.as_ref().ok_or_else(|| EvaluatorError::MissingBody {
            method: method.name.clone(),
            owner: loaded.identity.clone(),
        })?;

        let mut locals = vec![Value::Null; method.locals.max(args.len())];
        for (slot, (arg, (name, ty))) in args.into_iter().zip(&method.params).enumerate() {
            locals[slot] = self.conform(arg, ty, name)?;
        }
        let mut frame = Frame {
            loaded: loaded.clone(),
            this,
            locals,
            depth: depth + 1,
        };
        trace!("Enter {}::{} (generation {})", loaded.identity, method.name, loaded.generation);
        let result = match self.block(&mut frame, body)? {
            Flow::Return(value) => value,
            Flow::Normal => Value::Null,
        };
        self.conform(result, &method.return_type, "return value")
    }

    fn block(&self, frame: &mut Frame, body: &[Instr]) -> EvalResult<Flow> {
        for instr in body {
            if let Flow::Return(value) = self.instr(frame, instr)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn instr(&self, frame: &mut Frame, instr: &Instr) -> EvalResult<Flow> {
        match instr {
            Instr::SetLocal { slot, value } => {
                let value = self.node(frame, value)?;
                match frame.locals.get_mut(*slot) {
                    Some(local) => *local = value,
                    None => {
                        return Err(EvaluatorError::Runtime(format!("local slot {slot} out of range")))
                    }
                }
            }
            Instr::SetField { object, field, value } => {
                let object = self.object(frame, object, &field.name)?;
                let value = self.node(frame, value)?;
                self.write_field(&object, field, value)?;
            }
            Instr::SetFieldDynamic { object, name, value } => {
                let object = self.object(frame, object, name)?;
                let value = self.node(frame, value)?;
                let field = self.dynamic_field(object.class(), name)?;
                let visibility = self.dynamic_field_visibility(&field.owner, name);
                self.check_access(frame, visibility, &field.owner, format!("field `{name}`"))?;
                self.write_field(&object, &field, value)?;
            }
            Instr::Return(value) => {
                let value = match value {
                    Some(node) => self.node(frame, node)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            Instr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let branch = if self.truthy(frame, condition)? {
                    then_branch
                } else {
                    else_branch
                };
                return self.block(frame, branch);
            }
            Instr::While { condition, body } => {
                while self.truthy(frame, condition)? {
                    if let Flow::Return(value) = self.block(frame, body)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Instr::Eval(node) => {
                self.node(frame, node)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn truthy(&self, frame: &mut Frame, condition: &Node) -> EvalResult<bool> {
        match self.node(frame, condition)? {
            Value::Bool(value) => Ok(value),
            other => Err(EvaluatorError::unary_type_error("condition", "bool", &other.type_name())),
        }
    }

    fn object(&self, frame: &mut Frame, node: &Node, member: &str) -> EvalResult<ObjectRef> {
        match self.node(frame, node)? {
            Value::Object(object) => Ok(object),
            Value::Null => Err(EvaluatorError::NullReceiver {
                member: member.to_string(),
            }),
            other => Err(EvaluatorError::unary_type_error(member, "object", &other.type_name())),
        }
    }

    fn arguments(&self, frame: &mut Frame, args: &[Node]) -> EvalResult<Vec<Value>> {
        args.iter().map(|arg| self.node(frame, arg)).collect()
    }

    fn node(&self, frame: &mut Frame, node: &Node) -> EvalResult<Value> {
        match node {
            Node::Const(value) => Ok(Value::from_const(value)),
            Node::Local(slot) => frame
                .locals
                .get(*slot)
                .cloned()
                .ok_or_else(|| EvaluatorError::Runtime(format!("local slot {slot} out of range"))),
            Node::This => frame
                .this
                .clone()
                .map(Value::Object)
                .ok_or_else(|| EvaluatorError::Runtime("`this` in a static context".to_string())),
            Node::GetField { object, field } => {
                let object = self.object(frame, object, &field.name)?;
                self.read_field(&object, field)
            }
            Node::GetFieldDynamic { object, name } => {
                let object = self.object(frame, object, name)?;
                let field = self.dynamic_field(object.class(), name)?;
                let visibility = self.dynamic_field_visibility(&field.owner, name);
                self.check_access(frame, visibility, &field.owner, format!("field `{name}`"))?;
                self.read_field(&object, &field)
            }
            Node::Invoke {
                receiver,
                method,
                args,
                target,
                dispatch,
            } => {
                let owner = match target {
                    CallTarget::Current(owner) => owner,
                    CallTarget::Bound(owner) => {
                        return Err(EvaluatorError::Unlinked {
                            what: format!("call to `{method}`"),
                            owner: owner.clone(),
                        })
                    }
                };
                let this = match receiver {
                    Some(receiver) => Some(self.object(frame, receiver, &method.name)?),
                    None => None,
                };
                let args = self.arguments(frame, args)?;
                let (loaded, index) = match (dispatch, &this) {
                    (Dispatch::Virtual, Some(object)) => self.lookup(object.class(), method)?,
                    (Dispatch::Exact, _) => {
                        let loaded = self.resolve_from(frame, owner)?;
                        let index = method_index(&loaded, method).ok_or_else(|| {
                            EvaluatorError::MethodNotFound {
                                method: method.to_string(),
                                owner: owner.clone(),
                            }
                        })?;
                        (loaded, index)
                    }
                    _ => {
                        let loaded = self.resolve_from(frame, owner)?;
                        match method_index(&loaded, method) {
                            Some(index) => (loaded, index),
                            None => self.lookup(owner, method)?,
                        }
                    }
                };
                self.execute(loaded, index, this, args, frame.depth)
            }
            Node::InvokeDynamic { receiver, name, args } => {
                let object = self.object(frame, receiver, name)?;
                let args = self.arguments(frame, args)?;
                let (loaded, index) = self
                    .candidates(object.class(), name, &args, false)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| EvaluatorError::MethodNotFound {
                        method: describe(name, &args),
                        owner: object.class().clone(),
                    })?;
                let method = &loaded.artifact.methods[index];
                self.check_access(
                    frame,
                    method.modifiers.visibility,
                    &loaded.identity,
                    format!("method `{}`", method.method_ref()),
                )?;
                self.execute(loaded.clone(), index, Some(object), args, frame.depth)
            }
            Node::New { ty, init, args } => {
                let args = self.arguments(frame, args)?;
                let object = self.allocate(ty)?;
                if let Some(init) = init {
                    let (loaded, index) = self.lookup(ty, init)?;
                    self.execute(loaded, index, Some(object.clone()), args, frame.depth)?;
                }
                Ok(Value::Object(object))
            }
            Node::Binary { op, left, right } => {
                let left = self.node(frame, left)?;
                match (op, &left) {
                    (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let right = self.node(frame, right)?;
                binary(*op, left, right)
            }
            Node::Unary { op, operand } => {
                let operand = self.node(frame, operand)?;
                match (op, operand) {
                    (UnaryOp::Negate, Value::Int(v)) => v
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| EvaluatorError::Overflow {
                            operation: "negation".to_string(),
                        }),
                    (UnaryOp::Negate, Value::Float(v)) => Ok(Value::Float(-v)),
                    (UnaryOp::Not, Value::Bool(v)) => Ok(Value::Bool(!v)),
                    (UnaryOp::Negate, other) => {
                        Err(EvaluatorError::unary_type_error("-", "number", &other.type_name()))
                    }
                    (UnaryOp::Not, other) => {
                        Err(EvaluatorError::unary_type_error("!", "bool", &other.type_name()))
                    }
                }
            }
            Node::Widen(inner) => Ok(self.node(frame, inner)?.coerce_to(&Ty::Float)),
        }
    }
}

fn method_index(loaded: &LoadedType, method: &MethodRef) -> Option<usize> {
    loaded.artifact.methods.iter().position(|m| {
        m.name == method.name && m.params.iter().map(|(_, ty)| ty).eq(method.params.iter())
    })
}

fn exact_type(value: &Value, ty: &Ty) -> bool {
    matches!(
        (value, ty),
        (Value::Int(_), Ty::Int)
            | (Value::Float(_), Ty::Float)
            | (Value::Bool(_), Ty::Bool)
            | (Value::Str(_), Ty::Str)
            | (Value::Object(_), Ty::Class(_))
    )
}

fn describe(name: &str, args: &[Value]) -> String {
    let types = args.iter().map(Value::type_name).collect::<Vec<_>>().join(", ");
    format!("{name}({types})")
}

fn binary(op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
    let symbol = op.symbol();
    let mismatch = |left: &Value, right: &Value| {
        EvaluatorError::binary_type_error(symbol, &left.type_name(), &right.type_name())
    };
    let overflow = || EvaluatorError::Overflow {
        operation: symbol.to_string(),
    };
    match op {
        BinaryOp::Add if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) => {
            Ok(Value::Str(format!("{left}{right}")))
        }
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => {
            match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => {
                    let (a, b) = (*a, *b);
                    let result = match op {
                        BinaryOp::Add => a.checked_add(b),
                        BinaryOp::Subtract => a.checked_sub(b),
                        BinaryOp::Multiply => a.checked_mul(b),
                        BinaryOp::Divide | BinaryOp::Modulo if b == 0 => {
                            return Err(EvaluatorError::DivisionByZero)
                        }
                        BinaryOp::Divide => a.checked_div(b),
                        _ => a.checked_rem(b),
                    };
                    result.map(Value::Int).ok_or_else(overflow)
                }
                _ => match (left.as_float(), right.as_float()) {
                    (Some(a), Some(b)) => match op {
                        BinaryOp::Add => Ok(Value::Float(a + b)),
                        BinaryOp::Subtract => Ok(Value::Float(a - b)),
                        BinaryOp::Multiply => Ok(Value::Float(a * b)),
                        BinaryOp::Divide | BinaryOp::Modulo if b == 0.0 => {
                            Err(EvaluatorError::DivisionByZero)
                        }
                        BinaryOp::Divide => Ok(Value::Float(a / b)),
                        _ => Ok(Value::Float(a % b)),
                    },
                    _ => Err(mismatch(&left, &right)),
                },
            }
        }
        BinaryOp::Equal => Ok(Value::Bool(left == right)),
        BinaryOp::NotEqual => Ok(Value::Bool(left != right)),
        BinaryOp::LessThan | BinaryOp::LessEqual | BinaryOp::GreaterThan | BinaryOp::GreaterEqual => {
            let ordering = match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                _ => match (left.as_float(), right.as_float()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(mismatch(&left, &right)),
                },
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::LessThan => ordering.is_lt(),
                BinaryOp::LessEqual => ordering.is_le(),
                BinaryOp::GreaterThan => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => match (&left, &right) {
            (Value::Bool(_), Value::Bool(b)) => Ok(Value::Bool(*b)),
            _ => Err(mismatch(&left, &right)),
        },
    }
}
