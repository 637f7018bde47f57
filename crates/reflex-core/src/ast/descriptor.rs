//! Member descriptors: how callers describe a member they want added or
//! replaced. A descriptor carries source fragments; the intercessor parses
//! and validates them before anything reaches a structural tree.

use serde::{Deserialize, Serialize};

use super::source_gen::body_source;
use super::{Annotation, Member, Modifiers, Param, ToSource, TypeRef, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberKind {
    Field,
    Method,
}

/// Description of a field or method.
///
/// For fields `declared_type` is the field type and `source` the optional
/// initializer expression; for methods `declared_type` is the return type and
/// `source` the body statements (braces optional). A method without a source
/// body is declared-only and receives a default body when loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    pub name: String,
    pub kind: MemberKind,
    pub declared_type: TypeRef,
    pub modifiers: Modifiers,
    pub params: Vec<Param>,
    pub annotations: Vec<Annotation>,
    pub source: Option<String>,
}

impl MemberDescriptor {
    pub fn field(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Field,
            declared_type: TypeRef::named(ty),
            modifiers: Modifiers::default(),
            params: Vec::new(),
            annotations: Vec::new(),
            source: None,
        }
    }

    pub fn method(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Method,
            declared_type: TypeRef::void(),
            modifiers: Modifiers::default(),
            params: Vec::new(),
            annotations: Vec::new(),
            source: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.params.push(Param::new(name, ty));
        self
    }

    pub fn returns(mut self, ty: impl Into<String>) -> Self {
        self.declared_type = TypeRef::named(ty);
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.modifiers.visibility = visibility;
        self
    }

    pub fn private(self) -> Self {
        self.visibility(Visibility::Private)
    }

    pub fn protected(self) -> Self {
        self.visibility(Visibility::Protected)
    }

    pub fn static_member(mut self) -> Self {
        self.modifiers.is_static = true;
        self
    }

    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Method body statements
    pub fn body(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Field initializer expression
    pub fn initializer(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Describe an already parsed member, e.g. one typed at a prompt
impl From<&Member> for MemberDescriptor {
    fn from(member: &Member) -> Self {
        match member {
            Member::Field(field) => Self {
                name: field.name.clone(),
                kind: MemberKind::Field,
                declared_type: field.ty.clone(),
                modifiers: field.modifiers,
                params: Vec::new(),
                annotations: field.annotations.clone(),
                source: field.initializer.as_ref().map(ToSource::to_source),
            },
            Member::Method(method) => Self {
                name: method.name.clone(),
                kind: MemberKind::Method,
                declared_type: method.return_type.clone(),
                modifiers: method.modifiers,
                params: method.params.clone(),
                annotations: method.annotations.clone(),
                source: method.body.as_deref().map(body_source),
            },
        }
    }
}
