//! In-process Reflex compiler: type checks structural trees and lowers method
//! bodies to the interpreter IR.
//!
//! Compilation runs in three phases over the whole batch:
//! 1. parse every unit and build the signatures of the batch types
//! 2. class-level checks (supertypes, cycles, duplicates, overrides)
//! 3. lower field initializers and method bodies
//!
//! The batch shadows installed signatures, so a transaction touching a
//! parent and its child compiles both against each other's new shape.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::ir::{
    CallTarget, CompiledField, CompiledMethod, CompiledType, Const, Dispatch, FieldAccess,
    FieldRef, Instr, MethodRef, Node, Ty,
};
use super::{
    ClassPath, Compiler, Diagnostic, DiagnosticKind, FieldSig, LayeredClassPath, MethodSig,
    SourceUnit, TypeSignature,
};
use crate::ast::{
    resolve_type_name, BinaryOp, Expr, LValue, Member, MethodDecl, Stmt, StructuralTree, TypeIdentity, TypeRef,
    UnaryOp, Visibility,
};
use crate::parser::{ReflexParser, StructuralParser};
use crate::security::{AccessContext, Ancestry, MAX_HIERARCHY_DEPTH};

/// Checking compiler producing `CompiledType` IR
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCompiler {
    parser: ReflexParser,
}

impl NativeCompiler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Compiler for NativeCompiler {
    fn compile(
        &self,
        units: &[SourceUnit],
        class_path: &dyn ClassPath,
    ) -> Result<Vec<CompiledType>, Vec<Diagnostic>> {
        let mut diagnostics = Vec::new();

        let mut parsed = Vec::with_capacity(units.len());
        for unit in units {
            match self.parser.parse_unit(&unit.source) {
                Ok(trees) => match trees.into_iter().find(|t| t.identity() == unit.identity) {
                    Some(tree) => parsed.push((unit, tree)),
                    None => diagnostics.push(Diagnostic {
                        unit: unit.identity.clone(),
                        kind: DiagnosticKind::Syntax,
                        member: None,
                        message: format!("source unit does not declare {}", unit.identity),
                    }),
                },
                Err(e) => diagnostics.push(Diagnostic {
                    unit: unit.identity.clone(),
                    kind: DiagnosticKind::Syntax,
                    member: None,
                    message: e.to_string(),
                }),
            }
        }
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }

        let batch_ids: HashSet<TypeIdentity> =
            parsed.iter().map(|(unit, _)| unit.identity.clone()).collect();

        let mut batch = HashMap::new();
        for (unit, tree) in &parsed {
            let resolver = Resolver {
                package: &tree.package,
                imports: &tree.imports,
                batch: &batch_ids,
                base: class_path,
            };
            let signature = build_signature(tree, &resolver, &mut diagnostics);
            batch.insert(unit.identity.clone(), Arc::new(signature));
        }
        let layered = LayeredClassPath {
            batch,
            base: class_path,
        };

        for (unit, _) in &parsed {
            check_class(&unit.identity, &layered, &mut diagnostics);
        }
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }

        let mut compiled = Vec::with_capacity(parsed.len());
        for (unit, tree) in &parsed {
            let resolver = Resolver {
                package: &tree.package,
                imports: &tree.imports,
                batch: &batch_ids,
                base: class_path,
            };
            let context = UnitContext {
                identity: &unit.identity,
                resolver,
                class_path: &layered,
                access: AccessContext::within(
                    unit.privileged_as
                        .clone()
                        .unwrap_or_else(|| unit.identity.clone()),
                ),
            };
            compiled.push(lower_type(unit, tree, &context, &mut diagnostics));
        }

        if diagnostics.is_empty() {
            debug!("Compiled {} unit(s)", compiled.len());
            Ok(compiled)
        } else {
            Err(diagnostics)
        }
    }

    fn name(&self) -> &'static str {
        "reflex-native"
    }
}

// ---------------------------------------------------------------------------
// Name resolution

struct Resolver<'a> {
    package: &'a str,
    imports: &'a [String],
    batch: &'a HashSet<TypeIdentity>,
    base: &'a dyn ClassPath,
}

impl Resolver<'_> {
    fn exists(&self, identity: &TypeIdentity) -> bool {
        self.batch.contains(identity) || self.base.contains(identity)
    }

    fn resolve_class(&self, name: &str) -> Option<TypeIdentity> {
        resolve_type_name(self.package, self.imports, name, |identity| self.exists(identity))
    }

    fn resolve_type(&self, ty: &TypeRef) -> Option<Ty> {
        match ty.as_str() {
            "int" => Some(Ty::Int),
            "float" => Some(Ty::Float),
            "bool" => Some(Ty::Bool),
            "string" => Some(Ty::Str),
            "void" => Some(Ty::Void),
            "any" => Some(Ty::Any),
            other => self.resolve_class(other).map(Ty::Class),
        }
    }
}

fn constant(expr: &Expr) -> Option<(Const, Ty)> {
    match expr {
        Expr::Int(v) => Some((Const::Int(*v), Ty::Int)),
        Expr::Float(v) => Some((Const::Float(*v), Ty::Float)),
        Expr::Str(v) => Some((Const::Str(v.clone()), Ty::Str)),
        Expr::Bool(v) => Some((Const::Bool(*v), Ty::Bool)),
        Expr::Null => Some((Const::Null, Ty::Null)),
        _ => None,
    }
}

fn build_signature(
    tree: &StructuralTree,
    resolver: &Resolver<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) -> TypeSignature {
    let identity = tree.identity();
    let mut report = |kind, member: Option<&str>, message: String| {
        diagnostics.push(Diagnostic {
            unit: identity.clone(),
            kind,
            member: member.map(str::to_string),
            message,
        })
    };

    let superclass = match &tree.superclass {
        Some(parent) => match resolver.resolve_class(parent.as_str()) {
            Some(parent) => Some(parent),
            None => {
                report(
                    DiagnosticKind::UnknownType,
                    None,
                    format!("unknown superclass `{parent}`"),
                );
                None
            }
        },
        None => None,
    };

    let mut fields = Vec::new();
    let mut methods = Vec::new();
    for member in tree.members.values() {
        match member {
            Member::Field(field) => {
                let ty = match resolver.resolve_type(&field.ty) {
                    Some(Ty::Void) => {
                        report(
                            DiagnosticKind::TypeMismatch,
                            Some(field.name.as_str()),
                            "fields cannot have type `void`".to_string(),
                        );
                        Ty::Any
                    }
                    Some(ty) => ty,
                    None => {
                        report(
                            DiagnosticKind::UnknownType,
                            Some(field.name.as_str()),
                            format!("unknown type `{}`", field.ty),
                        );
                        Ty::Any
                    }
                };
                let default = match field.initializer.as_ref().and_then(constant) {
                    Some((Const::Int(v), _)) if ty == Ty::Float => Const::Float(v as f64),
                    Some((value, value_ty)) if value_ty == ty => value,
                    _ => ty.default_const(),
                };
                fields.push(FieldSig {
                    name: field.name.clone(),
                    default,
                    ty,
                    modifiers: field.modifiers,
                });
            }
            Member::Method(method) => {
                let mut params = Vec::with_capacity(method.params.len());
                for param in &method.params {
                    let ty = match resolver.resolve_type(&param.ty) {
                        Some(Ty::Void) | None => {
                            report(
                                DiagnosticKind::UnknownType,
                                Some(method.name.as_str()),
                                format!("invalid parameter type `{}`", param.ty),
                            );
                            Ty::Any
                        }
                        Some(ty) => ty,
                    };
                    params.push((param.name.clone(), ty));
                }
                let return_type = resolver.resolve_type(&method.return_type).unwrap_or_else(|| {
                    report(
                        DiagnosticKind::UnknownType,
                        Some(method.name.as_str()),
                        format!("unknown return type `{}`", method.return_type),
                    );
                    Ty::Any
                });
                methods.push(MethodSig {
                    name: method.name.clone(),
                    params,
                    return_type,
                    modifiers: method.modifiers,
                });
            }
        }
    }

    TypeSignature {
        identity: identity.clone(),
        superclass,
        fields,
        methods,
    }
}

fn check_class(
    identity: &TypeIdentity,
    class_path: &LayeredClassPath<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(signature) = class_path.lookup(identity) else {
        return;
    };
    let mut report = |kind, member: Option<&str>, message: String| {
        diagnostics.push(Diagnostic {
            unit: identity.clone(),
            kind,
            member: member.map(str::to_string),
            message,
        })
    };

    // Cycle: walk parents until the chain ends or comes back
    let mut seen = HashSet::new();
    let mut cursor = signature.superclass.clone();
    while let Some(parent) = cursor {
        if parent == *identity || !seen.insert(parent.clone()) || seen.len() > MAX_HIERARCHY_DEPTH {
            report(
                DiagnosticKind::InheritanceCycle,
                None,
                format!("cyclic inheritance involving {identity}"),
            );
            break;
        }
        cursor = class_path.superclass_of(&parent);
    }

    let mut field_names = HashSet::new();
    let mut method_keys = HashSet::new();
    for field in &signature.fields {
        if !field_names.insert(field.name.as_str()) {
            report(
                DiagnosticKind::DuplicateMember,
                Some(field.name.as_str()),
                format!("field `{}` is declared twice", field.name),
            );
        }
        if field.modifiers.is_static {
            report(
                DiagnosticKind::InvalidModifier,
                Some(field.name.as_str()),
                "fields cannot be static".to_string(),
            );
        }
    }
    for method in &signature.methods {
        let method_ref = method.method_ref();
        if !method_keys.insert(method_ref.clone()) {
            report(
                DiagnosticKind::DuplicateMember,
                Some(method.name.as_str()),
                format!("method `{method_ref}` is declared twice"),
            );
        }
        if method.name == "init" && method.modifiers.is_static {
            report(
                DiagnosticKind::InvalidModifier,
                Some(method.name.as_str()),
                "`init` cannot be static".to_string(),
            );
        }
        for ancestor in class_path.ancestors(identity) {
            let Some(parent) = class_path.lookup(&ancestor) else {
                continue;
            };
            if let Some(overridden) = parent
                .methods
                .iter()
                .find(|m| m.name == method.name && m.method_ref() == method_ref)
            {
                if overridden.return_type != method.return_type {
                    report(
                        DiagnosticKind::TypeMismatch,
                        Some(method.name.as_str()),
                        format!(
                            "`{method_ref}` overrides {ancestor} with return type {} instead of {}",
                            method.return_type, overridden.return_type
                        ),
                    );
                }
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Lowering

struct UnitContext<'a> {
    identity: &'a TypeIdentity,
    resolver: Resolver<'a>,
    class_path: &'a LayeredClassPath<'a>,
    access: AccessContext,
}

impl UnitContext<'_> {
    fn assignable(&self, from: &Ty, to: &Ty) -> bool {
        match (from, to) {
            _ if from == to => true,
            (_, Ty::Any) | (Ty::Any, _) => !matches!(from, Ty::Void) && !matches!(to, Ty::Void),
            (Ty::Int, Ty::Float) => true,
            (Ty::Null, Ty::Class(_) | Ty::Str) => true,
            (Ty::Class(sub), Ty::Class(sup)) => self.class_path.is_subtype_of(sub, sup),
            _ => false,
        }
    }

    fn find_field(&self, owner: &TypeIdentity, name: &str) -> Option<(TypeIdentity, FieldSig)> {
        let mut cursor = Some(owner.clone());
        let mut depth = 0;
        while let Some(identity) = cursor {
            let signature = self.class_path.lookup(&identity)?;
            if let Some(field) = signature.field(name) {
                return Some((identity, field.clone()));
            }
            depth += 1;
            if depth > MAX_HIERARCHY_DEPTH {
                return None;
            }
            cursor = signature.superclass.clone();
        }
        None
    }

    /// Methods named `name` visible on `owner`, nearest declaration first.
    /// Overridden parent methods are hidden by the child's declaration.
    fn find_methods(&self, owner: &TypeIdentity, name: &str) -> Vec<(TypeIdentity, MethodSig)> {
        let mut found: Vec<(TypeIdentity, MethodSig)> = Vec::new();
        let mut cursor = Some(owner.clone());
        let mut depth = 0;
        while let Some(identity) = cursor {
            let Some(signature) = self.class_path.lookup(&identity) else {
                break;
            };
            for method in signature.methods.iter().filter(|m| m.name == name) {
                let method_ref = method.method_ref();
                if !found.iter().any(|(_, m)| m.method_ref() == method_ref) {
                    found.push((identity.clone(), method.clone()));
                }
            }
            depth += 1;
            if depth > MAX_HIERARCHY_DEPTH {
                break;
            }
            cursor = signature.superclass.clone();
        }
        found
    }

    fn select_method(
        &self,
        candidates: Vec<(TypeIdentity, MethodSig)>,
        args: &[Ty],
    ) -> Option<(TypeIdentity, MethodSig)> {
        let applicable: Vec<_> = candidates
            .into_iter()
            .filter(|(_, m)| {
                m.params.len() == args.len()
                    && m.params
                        .iter()
                        .zip(args)
                        .all(|((_, param), arg)| self.assignable(arg, param))
            })
            .collect();
        let exact = applicable.iter().position(|(_, m)| {
            m.params.iter().zip(args).all(|((_, param), arg)| param == arg)
        });
        match exact {
            Some(index) => applicable.into_iter().nth(index),
            None => applicable.into_iter().next(),
        }
    }
}

fn lower_type(
    unit: &SourceUnit,
    tree: &StructuralTree,
    context: &UnitContext<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) -> CompiledType {
    let signature = context
        .class_path
        .lookup(&unit.identity)
        .map(|sig| (*sig).clone())
        .unwrap_or_else(|| TypeSignature {
            identity: unit.identity.clone(),
            superclass: None,
            fields: Vec::new(),
            methods: Vec::new(),
        });

    let mut fields = Vec::new();
    let mut methods = Vec::new();
    let mut field_sigs = signature.fields.iter();
    let mut method_sigs = signature.methods.iter();

    for member in tree.members.values() {
        match member {
            Member::Field(decl) => {
                let Some(sig) = field_sigs.next() else { continue };
                let default = match &decl.initializer {
                    None => sig.default.clone(),
                    Some(init) => match constant(init) {
                        Some((value, ty)) if context.assignable(&ty, &sig.ty) => {
                            match (value, &sig.ty) {
                                (Const::Int(v), Ty::Float) => Const::Float(v as f64),
                                (value, _) => value,
                            }
                        }
                        Some((_, ty)) => {
                            diagnostics.push(Diagnostic {
                                unit: unit.identity.clone(),
                                kind: DiagnosticKind::TypeMismatch,
                                member: Some(decl.name.clone()),
                                message: format!(
                                    "initializer of type {ty} does not fit field type {}",
                                    sig.ty
                                ),
                            });
                            sig.default.clone()
                        }
                        None => {
                            diagnostics.push(Diagnostic {
                                unit: unit.identity.clone(),
                                kind: DiagnosticKind::TypeMismatch,
                                member: Some(decl.name.clone()),
                                message: "field initializers must be literals".to_string(),
                            });
                            sig.default.clone()
                        }
                    },
                };
                fields.push(CompiledField {
                    name: decl.name.clone(),
                    ty: sig.ty.clone(),
                    modifiers: decl.modifiers,
                    annotations: decl.annotations.clone(),
                    default,
                });
            }
            Member::Method(decl) => {
                let Some(sig) = method_sigs.next() else { continue };
                methods.push(lower_method(decl, sig, context, diagnostics));
            }
        }
    }

    CompiledType {
        identity: unit.identity.clone(),
        superclass: signature.superclass.clone(),
        imports: tree.imports.clone(),
        annotations: tree.annotations.clone(),
        fields,
        methods,
        privileged_as: unit.privileged_as.clone(),
        source: unit.source.clone(),
    }
}

fn lower_method(
    decl: &MethodDecl,
    sig: &MethodSig,
    context: &UnitContext<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) -> CompiledMethod {
    let mut lowering = MethodLowering {
        context,
        member: &decl.name,
        is_static: sig.modifiers.is_static,
        return_type: &sig.return_type,
        scopes: vec![Vec::new()],
        next_slot: 0,
        max_slots: 0,
        diagnostics,
    };
    for (name, ty) in &sig.params {
        lowering.declare(name, ty.clone());
    }
    let body = decl.body.as_ref().map(|stmts| lowering.block(stmts));
    CompiledMethod {
        name: decl.name.clone(),
        params: sig.params.clone(),
        return_type: sig.return_type.clone(),
        modifiers: decl.modifiers,
        annotations: decl.annotations.clone(),
        locals: lowering.max_slots,
        body,
    }
}

struct MethodLowering<'a, 'd> {
    context: &'a UnitContext<'a>,
    member: &'a str,
    is_static: bool,
    return_type: &'a Ty,
    scopes: Vec<Vec<(String, usize, Ty)>>,
    next_slot: usize,
    max_slots: usize,
    diagnostics: &'d mut Vec<Diagnostic>,
}

impl MethodLowering<'_, '_> {
    fn error(&mut self, kind: DiagnosticKind, message: String) {
        self.diagnostics.push(Diagnostic {
            unit: self.context.identity.clone(),
            kind,
            member: Some(self.member.to_string()),
            message,
        });
    }

    fn declare(&mut self, name: &str, ty: Ty) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.max_slots = self.max_slots.max(self.next_slot);
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name.to_string(), slot, ty));
        }
        slot
    }

    fn local(&self, name: &str) -> Option<(usize, Ty)> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(local, _, _)| local == name)
            .map(|(_, slot, ty)| (*slot, ty.clone()))
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.scopes.push(Vec::new());
        let saved = self.next_slot;
        let result = f(self);
        self.scopes.pop();
        self.next_slot = saved;
        result
    }

    fn coerce(&mut self, node: Node, from: &Ty, to: &Ty, what: &str) -> Node {
        if !self.context.assignable(from, to) {
            self.error(
                DiagnosticKind::TypeMismatch,
                format!("{what}: expected {to}, found {from}"),
            );
            return node;
        }
        match (from, to) {
            (Ty::Int, Ty::Float) => Node::Widen(Box::new(node)),
            _ => node,
        }
    }

    fn check_access(&mut self, visibility: Visibility, owner: &TypeIdentity, what: String) {
        if !self
            .context
            .access
            .permits(visibility, owner, self.context.class_path)
        {
            self.error(
                DiagnosticKind::Accessibility,
                format!(
                    "{what} of {owner} is {} and not accessible from {}",
                    visibility.keyword(),
                    self.context.access.describe()
                ),
            );
        }
    }

    // -- statements --------------------------------------------------------

    fn block(&mut self, stmts: &[Stmt]) -> Vec<Instr> {
        stmts.iter().map(|stmt| self.statement(stmt)).collect()
    }

    fn statement(&mut self, stmt: &Stmt) -> Instr {
        match stmt {
            Stmt::Let { name, ty, value } => {
                let (node, value_ty) = self.expression(value);
                let declared = match ty {
                    Some(ty) => match self.context.resolver.resolve_type(ty) {
                        Some(Ty::Void) | None => {
                            self.error(DiagnosticKind::UnknownType, format!("invalid type `{ty}`"));
                            Ty::Any
                        }
                        Some(resolved) => resolved,
                    },
                    None => match value_ty {
                        Ty::Null => Ty::Any,
                        Ty::Void => {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                format!("`{name}` cannot be bound to a void value"),
                            );
                            Ty::Any
                        }
                        ref other => other.clone(),
                    },
                };
                let node = self.coerce(node, &value_ty, &declared, &format!("let `{name}`"));
                let slot = self.declare(name, declared);
                Instr::SetLocal { slot, value: node }
            }
            Stmt::Assign { target, value } => {
                let (node, value_ty) = self.expression(value);
                match target {
                    LValue::Local(name) => match self.local(name) {
                        Some((slot, ty)) => {
                            let node = self.coerce(node, &value_ty, &ty, &format!("assignment to `{name}`"));
                            Instr::SetLocal { slot, value: node }
                        }
                        None => {
                            self.error(
                                DiagnosticKind::UnknownName,
                                format!("cannot assign to unknown local `{name}`"),
                            );
                            Instr::Eval(node)
                        }
                    },
                    LValue::Field { object, field } => {
                        let (object_node, object_ty) = self.expression(object);
                        match object_ty {
                            Ty::Any => Instr::SetFieldDynamic {
                                object: object_node,
                                name: field.clone(),
                                value: node,
                            },
                            Ty::Class(owner) => match self.resolve_field(&owner, field) {
                                Some((field_ref, field_ty)) => {
                                    let node = self.coerce(
                                        node,
                                        &value_ty,
                                        &field_ty,
                                        &format!("assignment to field `{field}`"),
                                    );
                                    Instr::SetField {
                                        object: object_node,
                                        field: field_ref,
                                        value: node,
                                    }
                                }
                                None => Instr::Eval(node),
                            },
                            other => {
                                self.error(
                                    DiagnosticKind::TypeMismatch,
                                    format!("cannot assign field `{field}` on a value of type {other}"),
                                );
                                Instr::Eval(node)
                            }
                        }
                    }
                }
            }
            Stmt::Return(value) => {
                let return_type = self.return_type.clone();
                match (value, &return_type) {
                    (None, Ty::Void) => Instr::Return(None),
                    (None, other) => {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            format!("missing return value of type {other}"),
                        );
                        Instr::Return(None)
                    }
                    (Some(_), Ty::Void) => {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            "void method returns a value".to_string(),
                        );
                        Instr::Return(None)
                    }
                    (Some(value), expected) => {
                        let (node, ty) = self.expression(value);
                        Instr::Return(Some(self.coerce(node, &ty, expected, "return value")))
                    }
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.condition(condition);
                let then_branch = self.scoped(|this| this.block(then_branch));
                let else_branch = match else_branch {
                    Some(stmts) => self.scoped(|this| this.block(stmts)),
                    None => Vec::new(),
                };
                Instr::If {
                    condition,
                    then_branch,
                    else_branch,
                }
            }
            Stmt::While { condition, body } => {
                let condition = self.condition(condition);
                let body = self.scoped(|this| this.block(body));
                Instr::While { condition, body }
            }
            Stmt::Expr(expr) => Instr::Eval(self.expression(expr).0),
        }
    }

    fn condition(&mut self, expr: &Expr) -> Node {
        let (node, ty) = self.expression(expr);
        if !matches!(ty, Ty::Bool | Ty::Any) {
            self.error(
                DiagnosticKind::TypeMismatch,
                format!("condition must be bool, found {ty}"),
            );
        }
        node
    }

    // -- expressions -------------------------------------------------------

    fn resolve_field(&mut self, owner: &TypeIdentity, name: &str) -> Option<(FieldRef, Ty)> {
        match self.context.find_field(owner, name) {
            Some((declaring, sig)) => {
                self.check_access(
                    sig.modifiers.visibility,
                    &declaring,
                    format!("field `{name}`"),
                );
                Some((
                    FieldRef {
                        owner: declaring,
                        name: name.to_string(),
                        ty: sig.ty.clone(),
                        default: sig.default.clone(),
                        access: FieldAccess::Unlinked,
                    },
                    sig.ty,
                ))
            }
            None => {
                self.error(
                    DiagnosticKind::UnknownMember,
                    format!("{owner} has no field `{name}`"),
                );
                None
            }
        }
    }

    /// `a.b.C` written as nested field accesses, when it names a type
    fn type_path(&self, expr: &Expr) -> Option<TypeIdentity> {
        fn dotted(expr: &Expr) -> Option<String> {
            match expr {
                Expr::Ident(name) => Some(name.clone()),
                Expr::FieldAccess { object, field } => {
                    dotted(object).map(|prefix| format!("{prefix}.{field}"))
                }
                _ => None,
            }
        }
        let root = match expr {
            Expr::Ident(name) => name,
            Expr::FieldAccess { .. } => {
                let mut cursor = expr;
                while let Expr::FieldAccess { object, .. } = cursor {
                    cursor = object;
                }
                match cursor {
                    Expr::Ident(name) => name,
                    _ => return None,
                }
            }
            _ => return None,
        };
        if self.local(root).is_some() {
            return None;
        }
        self.context.resolver.resolve_class(&dotted(expr)?)
    }

    fn arguments(&mut self, args: &[Expr]) -> (Vec<Node>, Vec<Ty>) {
        args.iter().map(|arg| self.expression(arg)).unzip()
    }

    fn coerce_args(&mut self, nodes: Vec<Node>, types: &[Ty], method: &MethodSig) -> Vec<Node> {
        nodes
            .into_iter()
            .zip(types)
            .zip(&method.params)
            .map(|((node, from), (name, to))| self.coerce(node, from, to, &format!("argument `{name}`")))
            .collect()
    }

    fn describe_call(name: &str, types: &[Ty]) -> String {
        MethodRef::new(name, types.to_vec()).to_string()
    }

    fn expression(&mut self, expr: &Expr) -> (Node, Ty) {
        match expr {
            Expr::Int(v) => (Node::Const(Const::Int(*v)), Ty::Int),
            Expr::Float(v) => (Node::Const(Const::Float(*v)), Ty::Float),
            Expr::Str(v) => (Node::Const(Const::Str(v.clone())), Ty::Str),
            Expr::Bool(v) => (Node::Const(Const::Bool(*v)), Ty::Bool),
            Expr::Null => (Node::Const(Const::Null), Ty::Null),
            Expr::This => {
                if self.is_static {
                    self.error(
                        DiagnosticKind::UnknownName,
                        "`this` is not available in a static method".to_string(),
                    );
                    return (Node::Const(Const::Null), Ty::Any);
                }
                (Node::This, Ty::Class(self.context.identity.clone()))
            }
            Expr::Ident(name) => match self.local(name) {
                Some((slot, ty)) => (Node::Local(slot), ty),
                None => {
                    self.error(
                        DiagnosticKind::UnknownName,
                        format!("cannot find value `{name}`"),
                    );
                    (Node::Const(Const::Null), Ty::Any)
                }
            },
            Expr::FieldAccess { object, field } => {
                if let Some(ty) = self.type_path(object) {
                    self.error(
                        DiagnosticKind::UnknownMember,
                        format!("{ty} has no static field `{field}`"),
                    );
                    return (Node::Const(Const::Null), Ty::Any);
                }
                let (object_node, object_ty) = self.expression(object);
                match object_ty {
                    Ty::Any => (
                        Node::GetFieldDynamic {
                            object: Box::new(object_node),
                            name: field.clone(),
                        },
                        Ty::Any,
                    ),
                    Ty::Class(owner) => match self.resolve_field(&owner, field) {
                        Some((field_ref, ty)) => (
                            Node::GetField {
                                object: Box::new(object_node),
                                field: field_ref,
                            },
                            ty,
                        ),
                        None => (Node::Const(Const::Null), Ty::Any),
                    },
                    other => {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            format!("cannot read field `{field}` on a value of type {other}"),
                        );
                        (Node::Const(Const::Null), Ty::Any)
                    }
                }
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => self.call(receiver.as_deref(), method, args),
            Expr::New { ty, args } => {
                let Some(identity) = self.context.resolver.resolve_class(ty.as_str()) else {
                    self.error(DiagnosticKind::UnknownType, format!("unknown type `{ty}`"));
                    return (Node::Const(Const::Null), Ty::Any);
                };
                let (nodes, types) = self.arguments(args);
                let candidates = self.context.find_methods(&identity, "init");
                if candidates.is_empty() && nodes.is_empty() {
                    return (
                        Node::New {
                            ty: identity.clone(),
                            init: None,
                            args: Vec::new(),
                        },
                        Ty::Class(identity),
                    );
                }
                match self.context.select_method(candidates, &types) {
                    Some((owner, sig)) => {
                        self.check_access(
                            sig.modifiers.visibility,
                            &owner,
                            format!("method `{}`", sig.method_ref()),
                        );
                        let args = self.coerce_args(nodes, &types, &sig);
                        (
                            Node::New {
                                ty: identity.clone(),
                                init: Some(sig.method_ref()),
                                args,
                            },
                            Ty::Class(identity),
                        )
                    }
                    None => {
                        self.error(
                            DiagnosticKind::UnknownMember,
                            format!(
                                "{identity} has no initializer `{}`",
                                Self::describe_call("init", &types)
                            ),
                        );
                        (Node::Const(Const::Null), Ty::Any)
                    }
                }
            }
            Expr::Binary { op, left, right } => {
                let (left, left_ty) = self.expression(left);
                let (right, right_ty) = self.expression(right);
                let ty = match binary_type(*op, &left_ty, &right_ty) {
                    Some(ty) => ty,
                    None => {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            format!(
                                "operator `{}` cannot be applied to {left_ty} and {right_ty}",
                                op.symbol()
                            ),
                        );
                        Ty::Any
                    }
                };
                (
                    Node::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    ty,
                )
            }
            Expr::Unary { op, operand } => {
                let (operand, ty) = self.expression(operand);
                let result = match (op, &ty) {
                    (UnaryOp::Negate, Ty::Int | Ty::Float | Ty::Any) => ty.clone(),
                    (UnaryOp::Not, Ty::Bool | Ty::Any) => Ty::Bool,
                    _ => {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            format!("unary operator cannot be applied to {ty}"),
                        );
                        Ty::Any
                    }
                };
                (
                    Node::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    result,
                )
            }
        }
    }

    fn call(&mut self, receiver: Option<&Expr>, name: &str, args: &[Expr]) -> (Node, Ty) {
        let failed = (Node::Const(Const::Null), Ty::Any);

        // Static call through a type name
        if let Some(type_name) = receiver.and_then(|r| self.type_path(r)) {
            let (nodes, types) = self.arguments(args);
            let candidates = self.context.find_methods(&type_name, name);
            let Some((owner, sig)) = self.context.select_method(candidates, &types) else {
                self.error(
                    DiagnosticKind::UnknownMember,
                    format!("{type_name} has no method `{}`", Self::describe_call(name, &types)),
                );
                return failed;
            };
            if !sig.modifiers.is_static {
                self.error(
                    DiagnosticKind::InvalidModifier,
                    format!("`{}` is not static", sig.method_ref()),
                );
                return failed;
            }
            self.check_access(sig.modifiers.visibility, &owner, format!("method `{}`", sig.method_ref()));
            let args = self.coerce_args(nodes, &types, &sig);
            return (
                Node::Invoke {
                    receiver: None,
                    method: sig.method_ref(),
                    args,
                    target: CallTarget::Bound(owner),
                    dispatch: Dispatch::Static,
                },
                sig.return_type,
            );
        }

        let (receiver_node, owner) = match receiver {
            None => (None, self.context.identity.clone()),
            Some(expr) => {
                let (node, ty) = self.expression(expr);
                match ty {
                    Ty::Class(owner) => (Some(node), owner),
                    Ty::Any => {
                        let (nodes, _) = self.arguments(args);
                        return (
                            Node::InvokeDynamic {
                                receiver: Box::new(node),
                                name: name.to_string(),
                                args: nodes,
                            },
                            Ty::Any,
                        );
                    }
                    other => {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            format!("cannot call `{name}` on a value of type {other}"),
                        );
                        return failed;
                    }
                }
            }
        };

        let (nodes, types) = self.arguments(args);
        let mut candidates = self.context.find_methods(&owner, name);
        if receiver.is_none() && self.is_static {
            candidates.retain(|(_, m)| m.modifiers.is_static);
        }
        let Some((declaring, sig)) = self.context.select_method(candidates, &types) else {
            self.error(
                DiagnosticKind::UnknownMember,
                format!("{owner} has no method `{}`", Self::describe_call(name, &types)),
            );
            return failed;
        };
        self.check_access(
            sig.modifiers.visibility,
            &declaring,
            format!("method `{}`", sig.method_ref()),
        );
        let args = self.coerce_args(nodes, &types, &sig);

        let node = if sig.modifiers.is_static {
            Node::Invoke {
                receiver: None,
                method: sig.method_ref(),
                args,
                target: CallTarget::Bound(declaring),
                dispatch: Dispatch::Static,
            }
        } else {
            let dispatch = if sig.modifiers.visibility == Visibility::Private {
                Dispatch::Exact
            } else {
                Dispatch::Virtual
            };
            Node::Invoke {
                receiver: Some(Box::new(receiver_node.unwrap_or(Node::This))),
                method: sig.method_ref(),
                args,
                target: CallTarget::Bound(declaring),
                dispatch,
            }
        };
        (node, sig.return_type)
    }
}

fn binary_type(op: BinaryOp, left: &Ty, right: &Ty) -> Option<Ty> {
    let numeric_or_any = |ty: &Ty| ty.is_numeric() || *ty == Ty::Any;
    match op {
        BinaryOp::Add if *left == Ty::Str || *right == Ty::Str => {
            (*left != Ty::Void && *right != Ty::Void).then_some(Ty::Str)
        }
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Modulo => {
            if !(numeric_or_any(left) && numeric_or_any(right)) {
                None
            } else if *left == Ty::Any || *right == Ty::Any {
                Some(Ty::Any)
            } else if *left == Ty::Int && *right == Ty::Int {
                Some(Ty::Int)
            } else {
                Some(Ty::Float)
            }
        }
        BinaryOp::LessThan | BinaryOp::LessEqual | BinaryOp::GreaterThan | BinaryOp::GreaterEqual => {
            let strings = *left == Ty::Str && *right == Ty::Str;
            (strings || (numeric_or_any(left) && numeric_or_any(right))).then_some(Ty::Bool)
        }
        BinaryOp::Equal | BinaryOp::NotEqual => {
            (*left != Ty::Void && *right != Ty::Void).then_some(Ty::Bool)
        }
        BinaryOp::And | BinaryOp::Or => {
            let logical = |ty: &Ty| matches!(ty, Ty::Bool | Ty::Any);
            (logical(left) && logical(right)).then_some(Ty::Bool)
        }
    }
}
