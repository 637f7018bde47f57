// Source code generation from structural trees
// The driver regenerates source through this printer before every compile, so
// the output must parse back into an equal tree.

use super::*;

/// Trait for types that can generate their source code representation
pub trait ToSource {
    fn to_source(&self) -> String;
}

const INDENT: &str = "    ";

fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn format_float(value: f64) -> String {
    // Debug keeps a fractional part for integral floats (`2.0`)
    let text = format!("{value:?}");
    if text.contains('.') || text.contains('e') || text.contains("inf") || text.contains("NaN") {
        text
    } else {
        format!("{text}.0")
    }
}

fn join_sources<T: ToSource>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_source())
        .collect::<Vec<_>>()
        .join(", ")
}

// Parenthesize only where the parser would otherwise re-associate
fn expr_with_precedence(expr: &Expr, parent: u8) -> String {
    match expr {
        Expr::Binary { op, left, right } => {
            let own = op.precedence();
            let text = format!(
                "{} {} {}",
                expr_with_precedence(left, own),
                op.symbol(),
                expr_with_precedence(right, own + 1)
            );
            if own < parent {
                format!("({text})")
            } else {
                text
            }
        }
        other => other.to_source(),
    }
}

fn postfix_operand(expr: &Expr) -> String {
    match expr {
        Expr::Binary { .. } | Expr::Unary { .. } => format!("({})", expr.to_source()),
        Expr::Int(value) if *value < 0 => format!("({value})"),
        Expr::Float(value) if *value < 0.0 => format!("({})", format_float(*value)),
        other => other.to_source(),
    }
}

impl ToSource for Expr {
    fn to_source(&self) -> String {
        match self {
            Expr::Int(value) => value.to_string(),
            Expr::Float(value) => format_float(*value),
            Expr::Str(value) => escape_string(value),
            Expr::Bool(value) => value.to_string(),
            Expr::Null => "null".to_string(),
            Expr::This => "this".to_string(),
            Expr::Ident(name) => name.clone(),
            Expr::FieldAccess { object, field } => {
                format!("{}.{field}", postfix_operand(object))
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => match receiver {
                Some(receiver) => format!(
                    "{}.{method}({})",
                    postfix_operand(receiver),
                    join_sources(args)
                ),
                None => format!("{method}({})", join_sources(args)),
            },
            Expr::New { ty, args } => format!("new {ty}({})", join_sources(args)),
            Expr::Binary { .. } => expr_with_precedence(self, 0),
            Expr::Unary { op, operand } => {
                let symbol = match op {
                    UnaryOp::Negate => "-",
                    UnaryOp::Not => "!",
                };
                format!("{symbol}{}", postfix_operand(operand))
            }
        }
    }
}

impl ToSource for LValue {
    fn to_source(&self) -> String {
        match self {
            LValue::Local(name) => name.clone(),
            LValue::Field { object, field } => format!("{}.{field}", postfix_operand(object)),
        }
    }
}

fn block_source(stmts: &[Stmt], depth: usize) -> String {
    let mut out = String::from("{\n");
    for stmt in stmts {
        out.push_str(&stmt_source(stmt, depth + 1));
    }
    out.push_str(&INDENT.repeat(depth));
    out.push('}');
    out
}

fn stmt_source(stmt: &Stmt, depth: usize) -> String {
    let pad = INDENT.repeat(depth);
    match stmt {
        Stmt::Let { name, ty, value } => match ty {
            Some(ty) => format!("{pad}let {name}: {ty} = {};\n", value.to_source()),
            None => format!("{pad}let {name} = {};\n", value.to_source()),
        },
        Stmt::Assign { target, value } => {
            format!("{pad}{} = {};\n", target.to_source(), value.to_source())
        }
        Stmt::Return(Some(value)) => format!("{pad}return {};\n", value.to_source()),
        Stmt::Return(None) => format!("{pad}return;\n"),
        Stmt::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let mut out = format!(
                "{pad}if ({}) {}",
                condition.to_source(),
                block_source(then_branch, depth)
            );
            if let Some(else_branch) = else_branch {
                out.push_str(" else ");
                out.push_str(&block_source(else_branch, depth));
            }
            out.push('\n');
            out
        }
        Stmt::While { condition, body } => format!(
            "{pad}while ({}) {}\n",
            condition.to_source(),
            block_source(body, depth)
        ),
        Stmt::Expr(expr) => format!("{pad}{};\n", expr.to_source()),
    }
}

impl ToSource for Stmt {
    fn to_source(&self) -> String {
        stmt_source(self, 0)
    }
}

/// Source of a statement list, one statement per line, without braces
pub fn body_source(stmts: &[Stmt]) -> String {
    stmts.iter().map(|stmt| stmt_source(stmt, 0)).collect()
}

impl ToSource for Annotation {
    fn to_source(&self) -> String {
        match &self.value {
            Some(value) => format!("@{}({})", self.name, escape_string(value)),
            None => format!("@{}", self.name),
        }
    }
}

impl ToSource for Param {
    fn to_source(&self) -> String {
        format!("{}: {}", self.name, self.ty)
    }
}

fn modifier_prefix(modifiers: &Modifiers) -> String {
    let mut out = String::new();
    out.push_str(modifiers.visibility.keyword());
    out.push(' ');
    if modifiers.is_static {
        out.push_str("static ");
    }
    out
}

fn member_source(member: &Member, depth: usize) -> String {
    let pad = INDENT.repeat(depth);
    let mut out = String::new();
    for annotation in member.annotations() {
        out.push_str(&format!("{pad}{}\n", annotation.to_source()));
    }
    match member {
        Member::Field(field) => {
            out.push_str(&format!(
                "{pad}{}field {}: {}",
                modifier_prefix(&field.modifiers),
                field.name,
                field.ty
            ));
            if let Some(initializer) = &field.initializer {
                out.push_str(&format!(" = {}", initializer.to_source()));
            }
            out.push_str(";\n");
        }
        Member::Method(method) => {
            out.push_str(&format!(
                "{pad}{}fn {}({}): {}",
                modifier_prefix(&method.modifiers),
                method.name,
                join_sources(&method.params),
                method.return_type
            ));
            match &method.body {
                Some(body) => {
                    out.push(' ');
                    out.push_str(&block_source(body, depth));
                    out.push('\n');
                }
                None => out.push_str(";\n"),
            }
        }
    }
    out
}

impl ToSource for Member {
    fn to_source(&self) -> String {
        member_source(self, 0)
    }
}

impl ToSource for StructuralTree {
    fn to_source(&self) -> String {
        let mut out = String::new();
        if !self.package.is_empty() {
            out.push_str(&format!("package {};\n", self.package));
        }
        for import in &self.imports {
            out.push_str(&format!("import {import};\n"));
        }
        if !self.package.is_empty() || !self.imports.is_empty() {
            out.push('\n');
        }
        for annotation in &self.annotations {
            out.push_str(&annotation.to_source());
            out.push('\n');
        }
        out.push_str(&format!("public class {}", self.name));
        if let Some(superclass) = &self.superclass {
            out.push_str(&format!(" extends {superclass}"));
        }
        out.push_str(" {\n");
        for member in self.members.values() {
            out.push_str(&member_source(member, 1));
        }
        out.push_str("}\n");
        out
    }
}
