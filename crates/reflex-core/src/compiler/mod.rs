// Compiler port - turns regenerated source units into loadable artifacts
// The engine only sees the `Compiler` trait; `NativeCompiler` is the in-process
// checker that lowers Reflex source to the interpreter IR.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::{Modifiers, TypeIdentity};
use crate::security::Ancestry;

pub mod checker;
pub mod ir;

#[cfg(test)]
mod checker_tests;

pub use checker::NativeCompiler;
pub use ir::{CompiledType, Const, MethodRef, Ty};

/// One unit of source handed to the compiler
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    pub identity: TypeIdentity,
    pub source: String,
    /// Compile member code as if it were written inside this type; used for
    /// adapters that bind non-public members on behalf of a family member
    pub privileged_as: Option<TypeIdentity>,
}

impl SourceUnit {
    pub fn new(identity: TypeIdentity, source: impl Into<String>) -> Self {
        Self {
            identity,
            source: source.into(),
            privileged_as: None,
        }
    }

    pub fn privileged_as(mut self, identity: TypeIdentity) -> Self {
        self.privileged_as = Some(identity);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    Syntax,
    UnknownType,
    UnknownName,
    UnknownMember,
    TypeMismatch,
    /// A reference crosses a visibility boundary
    Accessibility,
    DuplicateMember,
    InvalidModifier,
    InheritanceCycle,
}

/// Structured compiler diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub unit: TypeIdentity,
    pub kind: DiagnosticKind,
    /// Member being compiled when the problem was found
    pub member: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn is_access_violation(&self) -> bool {
        self.kind == DiagnosticKind::Accessibility
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Some(member) => write!(f, "{}::{}: {}", self.unit, member, self.message),
            None => write!(f, "{}: {}", self.unit, self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSig {
    pub name: String,
    pub ty: Ty,
    pub modifiers: Modifiers,
    pub default: Const,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<(String, Ty)>,
    pub return_type: Ty,
    pub modifiers: Modifiers,
}

impl MethodSig {
    pub fn method_ref(&self) -> MethodRef {
        MethodRef::new(
            self.name.clone(),
            self.params.iter().map(|(_, ty)| ty.clone()).collect(),
        )
    }
}

/// What other units may see of a type: its members without bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSignature {
    pub identity: TypeIdentity,
    pub superclass: Option<TypeIdentity>,
    pub fields: Vec<FieldSig>,
    pub methods: Vec<MethodSig>,
}

impl TypeSignature {
    pub fn field(&self, name: &str) -> Option<&FieldSig> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Search path of installed type signatures
pub trait ClassPath: Send + Sync {
    fn signature(&self, identity: &TypeIdentity) -> Option<Arc<TypeSignature>>;

    fn contains(&self, identity: &TypeIdentity) -> bool {
        self.signature(identity).is_some()
    }
}

/// A fixed set of signatures, handy for tests and ephemeral compiles
#[derive(Debug, Clone, Default)]
pub struct StaticClassPath {
    signatures: HashMap<TypeIdentity, Arc<TypeSignature>>,
}

impl StaticClassPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, signature: TypeSignature) {
        self.signatures
            .insert(signature.identity.clone(), Arc::new(signature));
    }
}

impl ClassPath for StaticClassPath {
    fn signature(&self, identity: &TypeIdentity) -> Option<Arc<TypeSignature>> {
        self.signatures.get(identity).cloned()
    }
}

/// Class path where a compile batch shadows the installed signatures
pub(crate) struct LayeredClassPath<'a> {
    pub batch: HashMap<TypeIdentity, Arc<TypeSignature>>,
    pub base: &'a dyn ClassPath,
}

impl LayeredClassPath<'_> {
    pub fn lookup(&self, identity: &TypeIdentity) -> Option<Arc<TypeSignature>> {
        self.batch
            .get(identity)
            .cloned()
            .or_else(|| self.base.signature(identity))
    }
}

impl Ancestry for LayeredClassPath<'_> {
    fn superclass_of(&self, identity: &TypeIdentity) -> Option<TypeIdentity> {
        self.lookup(identity).and_then(|sig| sig.superclass.clone())
    }
}

/// External compiler port
pub trait Compiler: Send + Sync {
    /// Compile every unit against the class path. Either every unit compiles
    /// or the full diagnostic list comes back.
    fn compile(
        &self,
        units: &[SourceUnit],
        class_path: &dyn ClassPath,
    ) -> Result<Vec<CompiledType>, Vec<Diagnostic>>;

    fn name(&self) -> &'static str;
}
