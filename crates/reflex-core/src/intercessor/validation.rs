//! Request-time checks for mutations
//!
//! Everything here runs before an edit touches a working copy, so a
//! rejected request leaves no trace.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ast::{
    Annotation, Expr, FieldDecl, LValue, Member, MemberDescriptor, MemberKind, MetadataTarget,
    MethodDecl, Stmt, TypeRef,
};
use crate::error::ValidationError;
use crate::parser::StructuralParser;

const RESERVED: &[&str] = &[
    "package", "import", "class", "extends", "field", "fn", "let", "return", "if", "else",
    "while", "new", "this", "true", "false", "null", "public", "private", "protected", "static",
];

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"))
}

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*\.([A-Za-z_][A-Za-z0-9_]*|\*)$")
            .expect("import pattern")
    })
}

/// Where an annotation may be attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationScope {
    TypeOnly,
    MemberOnly,
    Any,
}

/// Annotation name -> allowed targets. Names missing from the registry are
/// accepted anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationRegistry(BTreeMap<String, AnnotationScope>);

impl AnnotationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, scope: AnnotationScope) -> Self {
        self.0.insert(name.into(), scope);
        self
    }

    pub fn scope_of(&self, name: &str) -> AnnotationScope {
        self.0.get(name).copied().unwrap_or(AnnotationScope::Any)
    }

    pub fn check(&self, annotation: &Annotation, target: &MetadataTarget) -> Result<(), ValidationError> {
        check_identifier(&annotation.name)?;
        let allowed = match (self.scope_of(&annotation.name), target) {
            (AnnotationScope::Any, _) => true,
            (AnnotationScope::TypeOnly, MetadataTarget::Type) => true,
            (AnnotationScope::MemberOnly, MetadataTarget::Member(_)) => true,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(ValidationError::InvalidAnnotationTarget {
                annotation: annotation.name.clone(),
                target: match target {
                    MetadataTarget::Type => "a type".to_string(),
                    MetadataTarget::Member(selector) => format!("member {selector}"),
                },
            })
        }
    }
}

pub fn check_identifier(name: &str) -> Result<(), ValidationError> {
    if identifier_pattern().is_match(name) && !RESERVED.contains(&name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier {
            identifier: name.to_string(),
        })
    }
}

/// `int`, `Calculator` or `demo.Calculator`
pub fn check_type_ref(ty: &TypeRef) -> Result<(), ValidationError> {
    let mut segments = ty.as_str().split('.');
    let valid = segments.all(|segment| identifier_pattern().is_match(segment) && !RESERVED.contains(&segment));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier {
            identifier: ty.as_str().to_string(),
        })
    }
}

/// `pkg.Type` or `pkg.*`
pub fn check_import(import: &str) -> Result<(), ValidationError> {
    let reserved = import.split('.').any(|segment| RESERVED.contains(&segment));
    if import_pattern().is_match(import) && !reserved {
        Ok(())
    } else {
        Err(ValidationError::InvalidImport {
            import: import.to_string(),
        })
    }
}

/// Turn a descriptor into a tree member, parsing its source fragment
pub fn build_member(
    descriptor: &MemberDescriptor,
    registry: &AnnotationRegistry,
    parser: &dyn StructuralParser,
) -> Result<Member, ValidationError> {
    check_identifier(&descriptor.name)?;
    check_type_ref(&descriptor.declared_type)?;
    let target = MetadataTarget::Member(crate::ast::MemberSelector::named(descriptor.name.clone()));
    for annotation in &descriptor.annotations {
        registry.check(annotation, &target)?;
    }

    match descriptor.kind {
        MemberKind::Field => {
            if descriptor.modifiers.is_static {
                return Err(ValidationError::InvalidModifier {
                    member: descriptor.name.clone(),
                    reason: "fields cannot be static".to_string(),
                });
            }
            if !descriptor.params.is_empty() {
                return Err(ValidationError::InvalidModifier {
                    member: descriptor.name.clone(),
                    reason: "a field has no parameters".to_string(),
                });
            }
            if descriptor.declared_type.as_str() == "void" {
                return Err(ValidationError::InvalidModifier {
                    member: descriptor.name.clone(),
                    reason: "a field cannot be void".to_string(),
                });
            }
            let initializer = match &descriptor.source {
                Some(source) => Some(parser.parse_expression(source).map_err(|error| {
                    ValidationError::Syntax {
                        context: format!("initializer of {}", descriptor.name),
                        error,
                    }
                })?),
                None => None,
            };
            Ok(Member::Field(FieldDecl {
                name: descriptor.name.clone(),
                ty: descriptor.declared_type.clone(),
                modifiers: descriptor.modifiers,
                annotations: descriptor.annotations.clone(),
                initializer,
            }))
        }
        MemberKind::Method => {
            let mut seen = HashSet::new();
            for param in &descriptor.params {
                check_identifier(&param.name)?;
                check_type_ref(&param.ty)?;
                if !seen.insert(param.name.as_str()) {
                    return Err(ValidationError::InvalidIdentifier {
                        identifier: format!("{} (repeated parameter)", param.name),
                    });
                }
            }
            let body = match &descriptor.source {
                Some(source) => Some(parse_body(parser, &descriptor.name, source)?),
                None => None,
            };
            Ok(Member::Method(MethodDecl {
                name: descriptor.name.clone(),
                params: descriptor.params.clone(),
                return_type: descriptor.declared_type.clone(),
                modifiers: descriptor.modifiers,
                annotations: descriptor.annotations.clone(),
                body,
            }))
        }
    }
}

pub fn parse_body(
    parser: &dyn StructuralParser,
    member: &str,
    source: &str,
) -> Result<Vec<Stmt>, ValidationError> {
    parser.parse_body(source).map_err(|error| ValidationError::Syntax {
        context: format!("body of {member}"),
        error,
    })
}

/// Names a new body reads that neither a parameter, a local nor a type
/// reference binds. Method names after `.` or in call position are not
/// names in this sense.
pub fn free_names(body: &[Stmt], params: &[String], is_type: &dyn Fn(&str) -> bool) -> Vec<String> {
    let mut walker = FreeNames {
        scopes: vec![params.iter().cloned().collect()],
        is_type,
        free: Vec::new(),
    };
    walker.block(body);
    walker.free
}

struct FreeNames<'a> {
    scopes: Vec<HashSet<String>>,
    is_type: &'a dyn Fn(&str) -> bool,
    free: Vec<String>,
}

impl FreeNames<'_> {
    fn bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn report(&mut self, name: &str) {
        if !self.free.iter().any(|n| n == name) {
            self.free.push(name.to_string());
        }
    }

    fn block(&mut self, body: &[Stmt]) {
        self.scopes.push(HashSet::new());
        for stmt in body {
            self.statement(stmt);
        }
        self.scopes.pop();
    }

    fn statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, value, .. } => {
                self.expression(value);
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone());
                }
            }
            Stmt::Assign { target, value } => {
                match target {
                    LValue::Local(name) => {
                        if !self.bound(name) {
                            self.report(name);
                        }
                    }
                    LValue::Field { object, .. } => self.receiver(object),
                }
                self.expression(value);
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.expression(value);
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expression(condition);
                self.block(then_branch);
                if let Some(else_branch) = else_branch {
                    self.block(else_branch);
                }
            }
            Stmt::While { condition, body } => {
                self.expression(condition);
                self.block(body);
            }
            Stmt::Expr(expr) => self.expression(expr),
        }
    }

    /// A receiver may be a type path (`util.Formatter.format(..)`)
    fn receiver(&mut self, expr: &Expr) {
        if let Some(path) = dotted_path(expr) {
            let root = path.split('.').next().unwrap_or_default();
            if !self.bound(root) {
                let names_type = path
                    .match_indices('.')
                    .map(|(pos, _)| &path[..pos])
                    .chain(std::iter::once(path.as_str()))
                    .any(|prefix| (self.is_type)(prefix));
                if !names_type {
                    self.report(root);
                }
                return;
            }
        }
        self.expression(expr);
    }

    fn expression(&mut self, expr: &Expr) {
        match expr {
            Expr::Ident(name) => {
                if !self.bound(name) {
                    self.report(name);
                }
            }
            Expr::FieldAccess { object, .. } => self.receiver(object),
            Expr::MethodCall { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    self.receiver(receiver);
                }
                for arg in args {
                    self.expression(arg);
                }
            }
            Expr::New { args, .. } => {
                for arg in args {
                    self.expression(arg);
                }
            }
            Expr::Binary { left, right, .. } => {
                self.expression(left);
                self.expression(right);
            }
            Expr::Unary { operand, .. } => self.expression(operand),
            Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null | Expr::This => {}
        }
    }
}

fn dotted_path(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(name) => Some(name.clone()),
        Expr::FieldAccess { object, field } => dotted_path(object).map(|prefix| format!("{prefix}.{field}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{MemberSelector, Visibility};
    use crate::parser::ReflexParser;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identifiers_and_imports() {
        assert!(check_identifier("lastResult").is_ok());
        assert!(check_identifier("_tmp1").is_ok());
        assert!(check_identifier("1abc").is_err());
        assert!(check_identifier("while").is_err());
        assert!(check_identifier("a-b").is_err());

        assert!(check_import("util.Formatter").is_ok());
        assert!(check_import("util.*").is_ok());
        assert!(check_import("Formatter").is_err());
        assert!(check_import("util..Formatter").is_err());
        assert!(check_import("util.*.x").is_err());
        assert!(check_import("util.class").is_err());
    }

    #[test]
    fn test_annotation_registry_targets() {
        let registry = AnnotationRegistry::new()
            .with("Entity", AnnotationScope::TypeOnly)
            .with("Transient", AnnotationScope::MemberOnly);
        let member = MetadataTarget::Member(MemberSelector::named("x"));

        assert!(registry.check(&Annotation::marker("Entity"), &MetadataTarget::Type).is_ok());
        assert!(matches!(
            registry.check(&Annotation::marker("Entity"), &member),
            Err(ValidationError::InvalidAnnotationTarget { .. })
        ));
        assert!(matches!(
            registry.check(&Annotation::marker("Transient"), &MetadataTarget::Type),
            Err(ValidationError::InvalidAnnotationTarget { .. })
        ));
        assert!(registry.check(&Annotation::marker("Whatever"), &member).is_ok());
        assert!(registry.check(&Annotation::marker("bad name"), &member).is_err());
    }

    #[test]
    fn test_build_member_from_descriptor() {
        let registry = AnnotationRegistry::new();
        let field = MemberDescriptor::field("lastResult", "float")
            .private()
            .initializer("0.0");
        match build_member(&field, &registry, &ReflexParser).unwrap() {
            Member::Field(decl) => {
                assert_eq!(decl.modifiers.visibility, Visibility::Private);
                assert_eq!(decl.initializer, Some(Expr::Float(0.0)));
            }
            other => panic!("expected a field, got {other:?}"),
        }

        let static_field = MemberDescriptor::field("count", "int").static_member();
        assert!(matches!(
            build_member(&static_field, &registry, &ReflexParser),
            Err(ValidationError::InvalidModifier { .. })
        ));

        let broken = MemberDescriptor::method("f").returns("int").body("return 1 +;");
        assert!(matches!(
            build_member(&broken, &registry, &ReflexParser),
            Err(ValidationError::Syntax { .. })
        ));

        let repeated = MemberDescriptor::method("g").param("a", "int").param("a", "int");
        assert!(build_member(&repeated, &registry, &ReflexParser).is_err());
    }

    #[test]
    fn test_free_names() {
        let body = ReflexParser
            .parse_body(
                "let t = a + b; if (t > 0) { let u = t; } this.total = t + u; util.Formatter.show(c); helper(d);",
            )
            .unwrap();
        let is_type = |name: &str| name == "util.Formatter";
        let free = free_names(&body, &["a".to_string(), "b".to_string()], &is_type);
        assert_eq!(free, vec!["u".to_string(), "c".to_string(), "d".to_string()]);
    }
}
