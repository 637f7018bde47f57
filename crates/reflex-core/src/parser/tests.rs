use pretty_assertions::assert_eq;

use super::reflex_parser::{self, parse_member, parse_statements, parse_type_name};
use super::*;
use crate::ast::{Annotation, BinaryOp, LValue, Member, MemberKey, ToSource, TypeRef, UnaryOp, Visibility};

fn parser() -> Box<dyn StructuralParser> {
    create_parser("reflex").unwrap()
}

#[test]
fn test_create_parser() {
    assert_eq!(parser().name(), "reflex");
    assert!(create_parser("cobol").is_err());
}

#[test]
fn test_parse_class_with_members() {
    let trees = parser()
        .parse_unit(
            r#"
            package demo;
            import util.Formatter;

            // a calculator
            @Entity
            public class Calculator extends Base {
                private field lastResult: float = 0.0;
                public static fn make(): Calculator { return new Calculator(); }
                /* declared only */
                fn pending(a: int): int;
            }
            "#,
        )
        .unwrap();
    assert_eq!(trees.len(), 1);
    let tree = &trees[0];
    assert_eq!(tree.identity().as_str(), "demo.Calculator");
    assert_eq!(tree.imports, vec!["util.Formatter".to_string()]);
    assert_eq!(tree.superclass, Some(TypeRef::named("Base")));
    assert_eq!(tree.annotations[0].name, "Entity");

    let field = tree.field("lastResult").unwrap();
    assert_eq!(field.modifiers.visibility, Visibility::Private);
    assert_eq!(field.initializer, Some(Expr::Float(0.0)));

    let make = tree.methods_named("make").next().unwrap();
    assert!(make.modifiers.is_static);
    assert_eq!(make.return_type, TypeRef::named("Calculator"));

    let pending = tree
        .members
        .get(&MemberKey::Method {
            name: "pending".to_string(),
            params: vec![TypeRef::named("int")],
        })
        .unwrap();
    match pending {
        Member::Method(method) => assert!(method.body.is_none()),
        Member::Field(_) => panic!("expected a method"),
    }
}

#[test]
fn test_multiple_classes_share_package() {
    let trees = parser()
        .parse_unit("package a.b; class One {} class Two extends One {}")
        .unwrap();
    let names: Vec<_> = trees.iter().map(|t| t.identity().to_string()).collect();
    assert_eq!(names, vec!["a.b.One", "a.b.Two"]);
}

#[test]
fn test_expression_precedence() {
    let expr = parser().parse_expression("1 + 2 * 3 == 7 && !done").unwrap();
    let Expr::Binary { op: BinaryOp::And, left, right } = expr else {
        panic!("expected &&");
    };
    assert!(matches!(*left, Expr::Binary { op: BinaryOp::Equal, .. }));
    assert!(matches!(*right, Expr::Unary { op: UnaryOp::Not, .. }));
}

#[test]
fn test_negative_literals_fold() {
    assert_eq!(parser().parse_expression("-5").unwrap(), Expr::Int(-5));
    assert_eq!(parser().parse_expression("- 2.5").unwrap(), Expr::Float(-2.5));
    assert!(matches!(
        parser().parse_expression("-x").unwrap(),
        Expr::Unary { op: UnaryOp::Negate, .. }
    ));
}

#[test]
fn test_float_literals_must_be_finite() {
    assert!(parser().parse_expression("1e400").is_err());
    assert!(parse_member("field big: float = 1e400;").is_err());

    let large = parser().parse_expression("1.5e300").unwrap();
    assert_eq!(large, Expr::Float(1.5e300));
    assert_eq!(parser().parse_expression(&large.to_source()).unwrap(), large);
}

#[test]
fn test_method_chain() {
    let expr = parser().parse_expression("a.getLastResult()").unwrap();
    assert_eq!(
        expr,
        Expr::MethodCall {
            receiver: Some(Box::new(Expr::Ident("a".to_string()))),
            method: "getLastResult".to_string(),
            args: Vec::new(),
        }
    );
}

#[test]
fn test_statements_with_and_without_braces() {
    let bare = parse_statements("this.total = a + b; return this.total;").unwrap();
    let braced = parse_statements("{ this.total = a + b; return this.total; }").unwrap();
    assert_eq!(bare, braced);
    assert!(matches!(
        &bare[0],
        Stmt::Assign {
            target: LValue::Field { .. },
            ..
        }
    ));
}

#[test]
fn test_keywords_are_not_identifiers() {
    assert!(parse_statements("let return = 1;").is_err());
    // prefixes of keywords are fine
    let stmts = parse_statements("let letter = 1; let newValue = letter;").unwrap();
    assert_eq!(stmts.len(), 2);
}

#[test]
fn test_invalid_assignment_target() {
    assert!(parse_statements("a + b = 3;").is_err());
}

#[test]
fn test_conflicting_visibility_rejected() {
    assert!(parse_member("public private field x: int;").is_err());
    let member = parse_member("static private fn helper(): void {}").unwrap();
    assert!(member.modifiers().is_static);
    assert_eq!(member.modifiers().visibility, Visibility::Private);
}

#[test]
fn test_type_names() {
    assert_eq!(parse_type_name("demo.Calculator").unwrap(), TypeRef::named("demo.Calculator"));
    assert!(parse_type_name("demo.").is_err());
    assert!(parse_type_name("1abc").is_err());
}

#[test]
fn test_error_position() {
    let err = parser()
        .parse_unit("package demo;\nclass A {\n    field x int;\n}")
        .unwrap_err();
    assert_eq!(err.line, 3);
    assert!(err.to_string().contains("line 3"));
}

#[test]
fn test_parse_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Point.rfx");
    std::fs::write(&path, "class Point { field x: int = 1; }").unwrap();
    let trees = parser().parse_file(&path).unwrap();
    assert_eq!(trees[0].field("x").unwrap().initializer, Some(Expr::Int(1)));
}

#[test]
fn test_parse_single_annotation() {
    let marker = reflex_parser::parse_annotation("@Entity").unwrap();
    assert_eq!(marker, Annotation::marker("Entity"));
    let valued = reflex_parser::parse_annotation(" @Doc(\"the value\") ").unwrap();
    assert_eq!(valued, Annotation::with_value("Doc", "the value"));
    assert!(reflex_parser::parse_annotation("Entity").is_err());
}
