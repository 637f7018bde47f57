use pretty_assertions::assert_eq;

use super::ir::{CallTarget, Dispatch, FieldAccess, Instr, Node};
use super::*;

fn unit(identity: &str, source: &str) -> SourceUnit {
    SourceUnit::new(TypeIdentity::from(identity), source)
}

fn compile(units: &[SourceUnit]) -> Result<Vec<CompiledType>, Vec<Diagnostic>> {
    NativeCompiler::new().compile(units, &StaticClassPath::new())
}

fn kinds(diagnostics: &[Diagnostic]) -> Vec<DiagnosticKind> {
    diagnostics.iter().map(|d| d.kind).collect()
}

const CALCULATOR: &str = r#"
package demo;
public class Calculator {
    private field lastResult: float = 1;
    public fn add(a: float, b: float): float {
        this.lastResult = a + b;
        return this.lastResult;
    }
    public fn twice(x: int): float { return this.add(x, x); }
    public fn pending(): int;
}
"#;

#[test]
fn test_lowering_leaves_links_for_the_pipeline() {
    let compiled = compile(&[unit("demo.Calculator", CALCULATOR)]).unwrap();
    assert_eq!(compiled.len(), 1);
    let calc = &compiled[0];
    assert_eq!(calc.identity.as_str(), "demo.Calculator");

    // int literal widened into the float field's default
    assert_eq!(calc.field("lastResult").unwrap().default, Const::Float(1.0));

    let add = calc.method(&MethodRef::new("add", vec![Ty::Float, Ty::Float])).unwrap();
    assert_eq!(add.locals, 2);
    let body = add.body.as_ref().unwrap();
    match &body[0] {
        Instr::SetField { field, .. } => {
            assert_eq!(field.owner.as_str(), "demo.Calculator");
            assert_eq!(field.access, FieldAccess::Unlinked);
            assert_eq!(field.default, Const::Float(1.0));
        }
        other => panic!("expected a field write, got {other:?}"),
    }

    let twice = calc.method(&MethodRef::new("twice", vec![Ty::Int])).unwrap();
    match &twice.body.as_ref().unwrap()[0] {
        Instr::Return(Some(Node::Invoke { args, target, dispatch, .. })) => {
            assert_eq!(*target, CallTarget::Bound("demo.Calculator".into()));
            assert_eq!(*dispatch, Dispatch::Virtual);
            assert!(matches!(args[0], Node::Widen(_)));
        }
        other => panic!("expected a call, got {other:?}"),
    }

    let pending = calc.method(&MethodRef::new("pending", Vec::new())).unwrap();
    assert!(pending.body.is_none());
}

#[test]
fn test_unknown_name_is_reported() {
    let err = compile(&[unit(
        "demo.Broken",
        "package demo; class Broken { fn f(): int { return missing; } }",
    )])
    .unwrap_err();
    assert_eq!(kinds(&err), vec![DiagnosticKind::UnknownName]);
    assert_eq!(err[0].member.as_deref(), Some("f"));
}

#[test]
fn test_syntax_error_and_wrong_identity() {
    let err = compile(&[unit("demo.A", "package demo; class A { fn }")]).unwrap_err();
    assert_eq!(kinds(&err), vec![DiagnosticKind::Syntax]);

    let err = compile(&[unit("demo.A", "package demo; class B {}")]).unwrap_err();
    assert!(err[0].message.contains("does not declare demo.A"));
}

#[test]
fn test_child_cannot_read_parent_private_field() {
    let parent = unit(
        "demo.Parent",
        "package demo; class Parent { private field secret: int = 7; protected field shared: int; }",
    );
    let child = unit(
        "demo.Child",
        "package demo; class Child extends Parent { fn peek(): int { return this.secret; } fn family(): int { return this.shared; } }",
    );
    let err = compile(&[parent.clone(), child]).unwrap_err();
    assert_eq!(err.len(), 1);
    assert!(err[0].is_access_violation());
    assert!(err[0].message.contains("private"));

    let ok = unit(
        "demo.Child",
        "package demo; class Child extends Parent { fn family(): int { return this.shared; } }",
    );
    assert!(compile(&[parent, ok]).is_ok());
}

#[test]
fn test_privileged_unit_borrows_access() {
    let mut class_path = StaticClassPath::new();
    let parent = compile(&[unit(
        "demo.Parent",
        "package demo; class Parent { private fn hidden(): int { return 1; } }",
    )])
    .unwrap()
    .remove(0);
    class_path.insert(parent.signature());

    let adapter_source =
        "package reflex.adapter; class Adapter { static fn invoke(t: demo.Parent): int { return t.hidden(); } }";
    let plain = unit("reflex.adapter.Adapter", adapter_source);
    let err = NativeCompiler::new().compile(&[plain.clone()], &class_path).unwrap_err();
    assert!(err.iter().all(Diagnostic::is_access_violation));

    let privileged = plain.privileged_as("demo.Parent".into());
    let adapter = NativeCompiler::new()
        .compile(&[privileged], &class_path)
        .unwrap()
        .remove(0);
    assert_eq!(adapter.privileged_as, Some("demo.Parent".into()));
    let invoke = adapter.methods_named("invoke").next().unwrap();
    match &invoke.body.as_ref().unwrap()[0] {
        Instr::Return(Some(Node::Invoke { dispatch, .. })) => assert_eq!(*dispatch, Dispatch::Exact),
        other => panic!("expected a call, got {other:?}"),
    }
}

#[test]
fn test_batch_shadows_installed_signatures() {
    let mut class_path = StaticClassPath::new();
    let old_parent = compile(&[unit("demo.Base", "package demo; class Base {}")])
        .unwrap()
        .remove(0);
    class_path.insert(old_parent.signature());

    let child = unit(
        "demo.Leaf",
        "package demo; class Leaf extends Base { fn read(): int { return this.count; } }",
    );
    let err = NativeCompiler::new().compile(&[child.clone()], &class_path).unwrap_err();
    assert_eq!(kinds(&err), vec![DiagnosticKind::UnknownMember]);

    let new_parent = unit("demo.Base", "package demo; class Base { field count: int = 3; }");
    let compiled = NativeCompiler::new()
        .compile(&[new_parent, child], &class_path)
        .unwrap();
    assert_eq!(compiled.len(), 2);
}

#[test]
fn test_class_level_checks() {
    let err = compile(&[
        unit("demo.A", "package demo; class A extends B {}"),
        unit("demo.B", "package demo; class B extends A {}"),
    ])
    .unwrap_err();
    assert!(kinds(&err).contains(&DiagnosticKind::InheritanceCycle));

    let err = compile(&[unit(
        "demo.S",
        "package demo; class S { static field count: int; }",
    )])
    .unwrap_err();
    assert_eq!(kinds(&err), vec![DiagnosticKind::InvalidModifier]);

    let err = compile(&[unit(
        "demo.I",
        "package demo; class I { field a: int = 1 + 2; field b: string = 4; }",
    )])
    .unwrap_err();
    assert_eq!(kinds(&err), vec![DiagnosticKind::TypeMismatch, DiagnosticKind::TypeMismatch]);

    let err = compile(&[
        unit("demo.P", "package demo; class P { fn size(): int { return 1; } }"),
        unit("demo.Q", "package demo; class Q extends P { fn size(): string { return \"1\"; } }"),
    ])
    .unwrap_err();
    assert_eq!(kinds(&err), vec![DiagnosticKind::TypeMismatch]);
}

#[test]
fn test_new_selects_init_overload() {
    let compiled = compile(&[unit(
        "demo.Point",
        r#"package demo;
        class Point {
            field x: float;
            fn init(x: int) { this.x = x; }
            fn init(x: float) { this.x = x; }
            static fn origin(): Point { return new Point(0); }
        }"#,
    )])
    .unwrap();
    let origin = compiled[0].methods_named("origin").next().unwrap();
    match &origin.body.as_ref().unwrap()[0] {
        Instr::Return(Some(Node::New { init, .. })) => {
            assert_eq!(init.as_ref().unwrap().params, vec![Ty::Int]);
        }
        other => panic!("expected construction, got {other:?}"),
    }

    let err = compile(&[unit(
        "demo.Bare",
        "package demo; class Bare { static fn make(): Bare { return new Bare(1); } }",
    )])
    .unwrap_err();
    assert_eq!(kinds(&err), vec![DiagnosticKind::UnknownMember]);
}

#[test]
fn test_any_receivers_defer_to_run_time() {
    let compiled = compile(&[unit(
        "demo.Dyn",
        "package demo; class Dyn { static fn poke(x: any): any { x.count = 1; return x.size(); } }",
    )])
    .unwrap();
    let body = compiled[0].methods[0].body.as_ref().unwrap();
    assert!(matches!(body[0], Instr::SetFieldDynamic { .. }));
    assert!(matches!(body[1], Instr::Return(Some(Node::InvokeDynamic { .. }))));
}

#[test]
fn test_static_calls_and_string_concat() {
    let compiled = compile(&[unit(
        "demo.Util",
        r#"package demo;
        class Util {
            static fn label(n: int): string { return "n=" + n; }
            static fn twice(n: int): string { return Util.label(n) + label(n); }
        }"#,
    )])
    .unwrap();
    let twice = compiled[0].methods_named("twice").next().unwrap();
    match &twice.body.as_ref().unwrap()[0] {
        Instr::Return(Some(Node::Binary { left, right, .. })) => {
            for call in [left, right] {
                assert!(matches!(
                    **call,
                    Node::Invoke { receiver: None, dispatch: Dispatch::Static, .. }
                ));
            }
        }
        other => panic!("expected concatenation, got {other:?}"),
    }

    let err = compile(&[unit(
        "demo.Bad",
        "package demo; class Bad { fn inst(): int { return 1; } static fn s(): int { return Bad.inst(); } }",
    )])
    .unwrap_err();
    assert_eq!(kinds(&err), vec![DiagnosticKind::InvalidModifier]);
}
