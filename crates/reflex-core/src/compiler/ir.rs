//! Loadable intermediate representation produced by the compiler.
//!
//! A `CompiledType` leaves the compiler with every field access `Unlinked`
//! and every call `Bound` to the type it was checked against; the
//! transformer pipeline links them before anything executes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{Annotation, BinaryOp, Modifiers, TypeIdentity, UnaryOp};

/// Static type of an expression, field or parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    Int,
    Float,
    Bool,
    Str,
    Void,
    Any,
    /// Type of the `null` literal
    Null,
    Class(TypeIdentity),
}

impl Ty {
    /// Zero value used for field defaults and declared-only method bodies
    pub fn default_const(&self) -> Const {
        match self {
            Ty::Int => Const::Int(0),
            Ty::Float => Const::Float(0.0),
            Ty::Bool => Const::Bool(false),
            Ty::Str => Const::Str(String::new()),
            Ty::Void | Ty::Any | Ty::Null | Ty::Class(_) => Const::Null,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Float)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int => f.write_str("int"),
            Ty::Float => f.write_str("float"),
            Ty::Bool => f.write_str("bool"),
            Ty::Str => f.write_str("string"),
            Ty::Void => f.write_str("void"),
            Ty::Any => f.write_str("any"),
            Ty::Null => f.write_str("null"),
            Ty::Class(identity) => write!(f, "{identity}"),
        }
    }
}

/// Compile-time constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// A method as seen by callers: name plus resolved parameter types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub name: String,
    pub params: Vec<Ty>,
}

impl MethodRef {
    pub fn new(name: impl Into<String>, params: Vec<Ty>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}({params})", self.name)
    }
}

/// How a field reference reaches instance storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldAccess {
    /// Not yet linked by the cross-version field-access pass
    Unlinked,
    /// Slot in the owner's original layout
    Direct(usize),
    /// Accessor indirection through per-instance extension storage
    Indirect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: TypeIdentity,
    pub name: String,
    pub ty: Ty,
    pub default: Const,
    pub access: FieldAccess,
}

/// Where a call resolves its target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    /// Fixed to the definition the call site was compiled against
    Bound(TypeIdentity),
    /// Resolved against the owner's current version at call time
    Current(TypeIdentity),
}

impl CallTarget {
    pub fn owner(&self) -> &TypeIdentity {
        match self {
            CallTarget::Bound(owner) | CallTarget::Current(owner) => owner,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dispatch {
    /// Look the method up starting at the receiver's runtime type
    Virtual,
    /// Call exactly the owner's method (private methods)
    Exact,
    /// No receiver
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Const(Const),
    Local(usize),
    This,
    GetField {
        object: Box<Node>,
        field: FieldRef,
    },
    /// Field read on an `any`-typed receiver, resolved through the accessor
    /// table of the receiver's current version
    GetFieldDynamic {
        object: Box<Node>,
        name: String,
    },
    Invoke {
        receiver: Option<Box<Node>>,
        method: MethodRef,
        args: Vec<Node>,
        target: CallTarget,
        dispatch: Dispatch,
    },
    InvokeDynamic {
        receiver: Box<Node>,
        name: String,
        args: Vec<Node>,
    },
    New {
        ty: TypeIdentity,
        init: Option<MethodRef>,
        args: Vec<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    /// `int` value flowing into a `float` slot
    Widen(Box<Node>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    SetLocal {
        slot: usize,
        value: Node,
    },
    SetField {
        object: Node,
        field: FieldRef,
        value: Node,
    },
    SetFieldDynamic {
        object: Node,
        name: String,
        value: Node,
    },
    Return(Option<Node>),
    If {
        condition: Node,
        then_branch: Vec<Instr>,
        else_branch: Vec<Instr>,
    },
    While {
        condition: Node,
        body: Vec<Instr>,
    },
    Eval(Node),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledField {
    pub name: String,
    pub ty: Ty,
    pub modifiers: Modifiers,
    pub annotations: Vec<Annotation>,
    pub default: Const,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledMethod {
    pub name: String,
    pub params: Vec<(String, Ty)>,
    pub return_type: Ty,
    pub modifiers: Modifiers,
    pub annotations: Vec<Annotation>,
    /// Number of local slots, parameters included
    pub locals: usize,
    /// `None` until the default-member pass synthesizes a body
    pub body: Option<Vec<Instr>>,
}

impl CompiledMethod {
    pub fn method_ref(&self) -> MethodRef {
        MethodRef::new(
            self.name.clone(),
            self.params.iter().map(|(_, ty)| ty.clone()).collect(),
        )
    }
}

/// Output of the compiler for one type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledType {
    pub identity: TypeIdentity,
    pub superclass: Option<TypeIdentity>,
    pub imports: Vec<String>,
    pub annotations: Vec<Annotation>,
    pub fields: Vec<CompiledField>,
    pub methods: Vec<CompiledMethod>,
    /// Type whose access rights synthesized code borrows, if any
    pub privileged_as: Option<TypeIdentity>,
    pub source: String,
}

impl CompiledType {
    pub fn field(&self, name: &str) -> Option<&CompiledField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, method: &MethodRef) -> Option<&CompiledMethod> {
        self.methods
            .iter()
            .find(|m| m.name == method.name && m.params.iter().map(|(_, t)| t).eq(method.params.iter()))
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a CompiledMethod> + 'a {
        self.methods.iter().filter(move |m| m.name == name)
    }

    pub fn signature(&self) -> super::TypeSignature {
        super::TypeSignature {
            identity: self.identity.clone(),
            superclass: self.superclass.clone(),
            fields: self
                .fields
                .iter()
                .map(|f| super::FieldSig {
                    name: f.name.clone(),
                    ty: f.ty.clone(),
                    modifiers: f.modifiers,
                    default: f.default.clone(),
                })
                .collect(),
            methods: self
                .methods
                .iter()
                .map(|m| super::MethodSig {
                    name: m.name.clone(),
                    params: m.params.clone(),
                    return_type: m.return_type.clone(),
                    modifiers: m.modifiers,
                })
                .collect(),
        }
    }
}

/// Mutable walk over the link sites of a method body
pub trait LinkVisitor {
    fn field(&mut self, _field: &mut FieldRef) {}

    fn call(&mut self, _target: &mut CallTarget) {}
}

pub fn walk_body(body: &mut [Instr], visitor: &mut dyn LinkVisitor) {
    for instr in body {
        walk_instr(instr, visitor);
    }
}

fn walk_instr(instr: &mut Instr, visitor: &mut dyn LinkVisitor) {
    match instr {
        Instr::SetLocal { value, .. } => walk_node(value, visitor),
        Instr::SetField { object, field, value } => {
            walk_node(object, visitor);
            visitor.field(field);
            walk_node(value, visitor);
        }
        Instr::SetFieldDynamic { object, value, .. } => {
            walk_node(object, visitor);
            walk_node(value, visitor);
        }
        Instr::Return(value) => {
            if let Some(value) = value {
                walk_node(value, visitor);
            }
        }
        Instr::If {
            condition,
            then_branch,
            else_branch,
        } => {
            walk_node(condition, visitor);
            walk_body(then_branch, visitor);
            walk_body(else_branch, visitor);
        }
        Instr::While { condition, body } => {
            walk_node(condition, visitor);
            walk_body(body, visitor);
        }
        Instr::Eval(node) => walk_node(node, visitor),
    }
}

fn walk_node(node: &mut Node, visitor: &mut dyn LinkVisitor) {
    match node {
        Node::Const(_) | Node::Local(_) | Node::This => {}
        Node::GetField { object, field } => {
            walk_node(object, visitor);
            visitor.field(field);
        }
        Node::GetFieldDynamic { object, .. } => walk_node(object, visitor),
        Node::Invoke {
            receiver,
            args,
            target,
            ..
        } => {
            if let Some(receiver) = receiver {
                walk_node(receiver, visitor);
            }
            for arg in args {
                walk_node(arg, visitor);
            }
            visitor.call(target);
        }
        Node::InvokeDynamic { receiver, args, .. } => {
            walk_node(receiver, visitor);
            for arg in args {
                walk_node(arg, visitor);
            }
        }
        Node::New { args, .. } => {
            for arg in args {
                walk_node(arg, visitor);
            }
        }
        Node::Binary { left, right, .. } => {
            walk_node(left, visitor);
            walk_node(right, visitor);
        }
        Node::Unary { operand, .. } | Node::Widen(operand) => walk_node(operand, visitor),
    }
}
