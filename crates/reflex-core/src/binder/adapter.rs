//! Source synthesis for adapter and eval types

use uuid::Uuid;

use super::{BindingKind, CallableShape, ResolvedMember};
use crate::ast::{Expr, ToSource, TypeIdentity, TypeRef};

pub const ADAPTER_PACKAGE: &str = "reflex.adapter";
pub const EVAL_PACKAGE: &str = "reflex.eval";

/// Entry point of every adapter
pub const ADAPTER_ENTRY: &str = "invoke";
/// Entry point of every eval type
pub const EVAL_ENTRY: &str = "eval";

fn fresh_identity(package: &str, prefix: &str) -> TypeIdentity {
    let name = format!("{prefix}_{}", Uuid::new_v4().simple());
    TypeIdentity::in_package(package, &name)
}

fn imports_for(packages: &[&str]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    let mut out = String::new();
    for package in packages {
        if package.is_empty() || seen.contains(package) {
            continue;
        }
        seen.push(package);
        out.push_str(&format!("import {package}.*;\n"));
    }
    out
}

fn returns_value(returns: &TypeRef) -> bool {
    returns.as_str() != "void"
}

/// A static `invoke` that forwards to `member`. Instance members take the
/// receiver as the first parameter.
pub fn adapter_source(owner: &TypeIdentity, member: &ResolvedMember, shape: &CallableShape) -> (TypeIdentity, String) {
    let identity = fresh_identity(ADAPTER_PACKAGE, "Adapter");
    let caller_package = shape.caller.as_ref().map(|c| c.package()).unwrap_or("");
    let mut params = Vec::new();
    if !member.is_static {
        params.push(format!("target: {owner}"));
    }
    let args: Vec<String> = (0..shape.params.len()).map(|i| format!("p{i}")).collect();
    for (arg, ty) in args.iter().zip(&shape.params) {
        params.push(format!("{arg}: {ty}"));
    }
    let receiver = if member.is_static {
        owner.to_string()
    } else {
        "target".to_string()
    };
    let body = match member.kind {
        BindingKind::Method => {
            let call = format!("{receiver}.{}({})", member.name, args.join(", "));
            if returns_value(&shape.returns) {
                format!("return {call};")
            } else {
                format!("{call};")
            }
        }
        BindingKind::Field => match args.first() {
            Some(value) => format!("{receiver}.{} = {value};", member.name),
            None => format!("return {receiver}.{};", member.name),
        },
    };
    let source = format!(
        "package {ADAPTER_PACKAGE};\n{}public class {} {{\n    public static fn {ADAPTER_ENTRY}({}): {} {{ {body} }}\n}}\n",
        imports_for(&[owner.package(), caller_package]),
        identity.simple_name(),
        params.join(", "),
        shape.returns,
    );
    (identity, source)
}

/// A static `eval` whose body is the expression
pub fn eval_source(
    parameters: &[(String, TypeRef)],
    imports: &[String],
    expression: &Expr,
    returns: &TypeRef,
) -> (TypeIdentity, String) {
    let identity = fresh_identity(EVAL_PACKAGE, "Eval");
    let imports: String = imports.iter().map(|i| format!("import {i};\n")).collect();
    let params: Vec<String> = parameters.iter().map(|(name, ty)| format!("{name}: {ty}")).collect();
    let body = if returns_value(returns) {
        format!("return {};", expression.to_source())
    } else {
        format!("{};", expression.to_source())
    };
    let source = format!(
        "package {EVAL_PACKAGE};\n{imports}public class {} {{\n    public static fn {EVAL_ENTRY}({}): {returns} {{ {body} }}\n}}\n",
        identity.simple_name(),
        params.join(", "),
    );
    (identity, source)
}
