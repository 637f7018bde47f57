// Structural representation of Reflex types
// Every type is held as an editable StructuralTree; mutations act on trees and
// the printer regenerates source from them before compilation.

pub mod descriptor;
pub mod edit;
pub mod source_gen;
pub use descriptor::{MemberDescriptor, MemberKind};
pub use edit::{EditError, StructuralEdit};
pub use source_gen::ToSource;

#[cfg(test)]
mod edit_tests;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Stable, name-based key of a type. `package.Name`, or just `Name` in the
/// root package. Never changes across versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeIdentity(String);

impl TypeIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn in_package(package: &str, simple_name: &str) -> Self {
        if package.is_empty() {
            Self(simple_name.to_string())
        } else {
            Self(format!("{package}.{simple_name}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Package part (empty for the root package)
    pub fn package(&self) -> &str {
        match self.0.rfind('.') {
            Some(pos) => &self.0[..pos],
            None => "",
        }
    }

    pub fn simple_name(&self) -> &str {
        match self.0.rfind('.') {
            Some(pos) => &self.0[pos + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Display for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Resolve a class name as written inside a unit with the given package and
/// imports. Lookup order: fully qualified, same package, explicit imports,
/// wildcard imports, root package.
pub fn resolve_type_name(
    package: &str,
    imports: &[String],
    name: &str,
    exists: impl Fn(&TypeIdentity) -> bool,
) -> Option<TypeIdentity> {
    if name.contains('.') {
        let identity = TypeIdentity::new(name);
        return exists(&identity).then_some(identity);
    }
    let local = TypeIdentity::in_package(package, name);
    if exists(&local) {
        return Some(local);
    }
    let explicit = imports
        .iter()
        .filter(|import| !import.ends_with(".*"))
        .map(|import| TypeIdentity::new(import.as_str()))
        .find(|imported| imported.simple_name() == name && exists(imported));
    if explicit.is_some() {
        return explicit;
    }
    let wildcard = imports
        .iter()
        .filter_map(|import| import.strip_suffix(".*"))
        .map(|package| TypeIdentity::in_package(package, name))
        .find(|candidate| exists(candidate));
    if wildcard.is_some() {
        return wildcard;
    }
    let root = TypeIdentity::new(name);
    exists(&root).then_some(root)
}

/// A type expression as written in source (`float`, `Calculator`,
/// `demo.Calculator`). Resolution happens in the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef(pub String);

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn void() -> Self {
        Self("void".to_string())
    }

    pub fn any() -> Self {
        Self("any".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

impl Visibility {
    pub fn keyword(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Modifiers {
    pub visibility: Visibility,
    pub is_static: bool,
}

impl Modifiers {
    pub fn public() -> Self {
        Self::default()
    }

    pub fn private() -> Self {
        Self {
            visibility: Visibility::Private,
            is_static: false,
        }
    }

    pub fn protected() -> Self {
        Self {
            visibility: Visibility::Protected,
            is_static: false,
        }
    }

    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// `@Name` or `@Name("value")`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub value: Option<String>,
}

impl Annotation {
    pub fn marker(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Binding strength, higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Equal | BinaryOp::NotEqual => 3,
            BinaryOp::LessThan
            | BinaryOp::LessEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterEqual => 4,
            BinaryOp::Add | BinaryOp::Subtract => 5,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,

    This,
    Ident(String),

    FieldAccess {
        object: Box<Expr>,
        field: String,
    },
    /// `receiver.method(args)`; a missing receiver means `this` or a static
    /// method of the enclosing type
    MethodCall {
        receiver: Option<Box<Expr>>,
        method: String,
        args: Vec<Expr>,
    },
    New {
        ty: TypeRef,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
}

/// Left side of an assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LValue {
    Local(String),
    Field { object: Expr, field: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Let {
        name: String,
        ty: Option<TypeRef>,
        value: Expr,
    },
    Assign {
        target: LValue,
        value: Expr,
    },
    Return(Option<Expr>),
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: TypeRef::named(ty),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeRef,
    pub modifiers: Modifiers,
    pub annotations: Vec<Annotation>,
    pub initializer: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
    pub modifiers: Modifiers,
    pub annotations: Vec<Annotation>,
    /// `None` for a declared-only method (`fn f(): int;`)
    pub body: Option<Vec<Stmt>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Member {
    Field(FieldDecl),
    Method(MethodDecl),
}

impl Member {
    pub fn key(&self) -> MemberKey {
        match self {
            Member::Field(field) => MemberKey::Field(field.name.clone()),
            Member::Method(method) => MemberKey::Method {
                name: method.name.clone(),
                params: method.params.iter().map(|p| p.ty.clone()).collect(),
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Member::Field(field) => &field.name,
            Member::Method(method) => &method.name,
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        match self {
            Member::Field(field) => field.modifiers,
            Member::Method(method) => method.modifiers,
        }
    }

    pub fn annotations(&self) -> &[Annotation] {
        match self {
            Member::Field(field) => &field.annotations,
            Member::Method(method) => &method.annotations,
        }
    }

    pub fn annotations_mut(&mut self) -> &mut Vec<Annotation> {
        match self {
            Member::Field(field) => &mut field.annotations,
            Member::Method(method) => &mut method.annotations,
        }
    }
}

/// Signature key of a member inside one type: fields by name, methods by
/// name and parameter types as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKey {
    Field(String),
    Method { name: String, params: Vec<TypeRef> },
}

impl MemberKey {
    pub fn name(&self) -> &str {
        match self {
            MemberKey::Field(name) => name,
            MemberKey::Method { name, .. } => name,
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKey::Field(name) => f.write_str(name),
            MemberKey::Method { name, params } => {
                let params = params
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{name}({params})")
            }
        }
    }
}

/// Selects a member by name, optionally narrowed by parameter types when a
/// method name is overloaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberSelector {
    pub name: String,
    pub params: Option<Vec<TypeRef>>,
}

impl MemberSelector {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: None,
        }
    }

    pub fn method(name: impl Into<String>, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            params: Some(params.iter().map(|p| TypeRef::named(*p)).collect()),
        }
    }

    pub fn matches(&self, key: &MemberKey) -> bool {
        match (key, &self.params) {
            (MemberKey::Field(name), None) => *name == self.name,
            (MemberKey::Field(_), Some(_)) => false,
            (MemberKey::Method { name, .. }, None) => *name == self.name,
            (MemberKey::Method { name, params }, Some(wanted)) => {
                *name == self.name && params == wanted
            }
        }
    }
}

impl fmt::Display for MemberSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.params {
            None => f.write_str(&self.name),
            Some(params) => {
                let params = params
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{}({params})", self.name)
            }
        }
    }
}

/// Where a piece of metadata is attached
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataTarget {
    Type,
    Member(MemberSelector),
}

/// Editable representation of one type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralTree {
    pub package: String,
    pub imports: Vec<String>,
    pub annotations: Vec<Annotation>,
    pub name: String,
    pub superclass: Option<TypeRef>,
    pub members: IndexMap<MemberKey, Member>,
}

impl StructuralTree {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            imports: Vec::new(),
            annotations: Vec::new(),
            name: name.into(),
            superclass: None,
            members: IndexMap::new(),
        }
    }

    pub fn identity(&self) -> TypeIdentity {
        TypeIdentity::in_package(&self.package, &self.name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        match self.members.get(&MemberKey::Field(name.to_string())) {
            Some(Member::Field(field)) => Some(field),
            _ => None,
        }
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodDecl> + 'a {
        self.members.values().filter_map(move |member| match member {
            Member::Method(method) if method.name == name => Some(method),
            _ => None,
        })
    }

    /// Keys of every member the selector matches
    pub fn select(&self, selector: &MemberSelector) -> Vec<MemberKey> {
        self.members
            .keys()
            .filter(|key| selector.matches(key))
            .cloned()
            .collect()
    }

    pub fn push_member(&mut self, member: Member) {
        self.members.insert(member.key(), member);
    }

    /// Resolve a type name the way code inside this tree sees it
    pub fn resolve_type_name(
        &self,
        name: &str,
        exists: impl Fn(&TypeIdentity) -> bool,
    ) -> Option<TypeIdentity> {
        resolve_type_name(&self.package, &self.imports, name, exists)
    }

    /// Declared parent, resolved against `exists`
    pub fn superclass_identity(
        &self,
        exists: impl Fn(&TypeIdentity) -> bool,
    ) -> Option<TypeIdentity> {
        self.superclass
            .as_ref()
            .and_then(|parent| self.resolve_type_name(parent.as_str(), exists))
    }
}
