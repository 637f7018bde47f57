use pretty_assertions::assert_eq;

use super::*;
use crate::ast::{MemberSelector, Visibility};
use crate::error::ValidationError;
use crate::evaluator::Value;
use crate::storage::InMemorySources;
use crate::{Engine, EngineConfig};

const PROGRAM: &str = r#"
package demo;

class Calculator {
    fn add(a: float, b: float): float { return a + b; }
}

class Base {
    private field secret: int = 7;
    protected field shared: int = 1;
    fn reveal(): int { return this.secret; }
}

class Child extends Base {
    fn peek(): int { return this.shared; }
}

class Locked {
    fn value(): int { return 1; }
}
"#;

fn engine() -> Engine {
    let config = EngineConfig {
        annotations: AnnotationRegistry::new().with("Entity", AnnotationScope::TypeOnly),
        excluded_types: vec![id("demo.Locked")],
        ..EngineConfig::default()
    };
    Engine::from_sources(config, &InMemorySources::new().with_unit("demo.rfx", PROGRAM)).unwrap()
}

fn id(name: &str) -> TypeIdentity {
    TypeIdentity::from(name)
}

#[test]
fn test_transaction_records_and_publishes_together() {
    let engine = engine();
    let calc = id("demo.Calculator");
    let mut tx = engine.create_transaction();
    tx.add_field(&calc, MemberDescriptor::field("lastResult", "float").private().initializer("0.0"))
        .unwrap()
        .replace_implementation(
            &calc,
            MemberSelector::named("add"),
            "this.lastResult = a + b; return this.lastResult;",
            None,
        )
        .unwrap()
        .add_method(
            &calc,
            MemberDescriptor::method("getLastResult")
                .returns("float")
                .body("return this.lastResult;"),
        )
        .unwrap();

    let operations: Vec<_> = tx.records().iter().map(|r| r.operation).collect();
    assert_eq!(operations, vec!["add_field", "replace_implementation", "add_method"]);
    assert_eq!(tx.targets(), vec![calc.clone()]);
    assert_eq!(engine.generation(&calc), Some(0));

    let report = tx.commit().unwrap();
    assert_eq!(tx.state(), TransactionState::Installed);
    assert_eq!(report.generation_of(&calc), Some(1));
    assert_eq!(engine.generation(&calc), Some(1));

    let calculator = engine.instantiate(&calc, Vec::new()).unwrap();
    let sum = engine
        .call(&calculator, "add", vec![Value::Float(2.0), Value::Float(3.0)])
        .unwrap();
    assert_eq!(sum, Value::Float(5.0));
    assert_eq!(engine.call(&calculator, "getLastResult", Vec::new()).unwrap(), Value::Float(5.0));
}

#[test]
fn test_unknown_member_leaves_generation_alone() {
    let engine = engine();
    let calc = id("demo.Calculator");
    let err = engine
        .intercessor()
        .replace_implementation(&calc, MemberSelector::named("missing"), "return 1;", None)
        .unwrap_err();
    assert!(matches!(
        err,
        ReflexError::Validation(ValidationError::UnknownMember { .. })
    ));
    assert_eq!(engine.generation(&calc), Some(0));
    assert_eq!(engine.history(&calc).len(), 1);
}

#[test]
fn test_body_with_unbound_name_is_rejected() {
    let engine = engine();
    let mut tx = engine.create_transaction();
    let err = tx
        .replace_implementation(&id("demo.Calculator"), MemberSelector::named("add"), "return a + c;", None)
        .unwrap_err();
    match err {
        ReflexError::Validation(ValidationError::UnboundName { name, .. }) => assert_eq!(name, "c"),
        other => panic!("unexpected error: {other}"),
    }

    // Renamed parameters bring their own names into scope
    tx.replace_implementation(
        &id("demo.Calculator"),
        MemberSelector::named("add"),
        "return x * y;",
        Some(vec!["x".to_string(), "y".to_string()]),
    )
    .unwrap();
    tx.commit().unwrap();
    let calculator = engine.instantiate(&id("demo.Calculator"), Vec::new()).unwrap();
    assert_eq!(
        engine
            .call(&calculator, "add", vec![Value::Float(2.0), Value::Float(4.0)])
            .unwrap(),
        Value::Float(8.0)
    );
}

#[test]
fn test_discard_is_idempotent_and_releases_types() {
    let engine = engine();
    let calc = id("demo.Calculator");
    let mut tx = engine.create_transaction();
    tx.add_method(&calc, MemberDescriptor::method("zero").returns("int").body("return 0;"))
        .unwrap();
    tx.discard();
    tx.discard();
    assert_eq!(tx.state(), TransactionState::Aborted);
    assert!(tx.targets().is_empty());

    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err,
        ReflexError::Validation(ValidationError::TransactionClosed { .. })
    ));

    // The type is free again
    let report = engine
        .intercessor()
        .add_method(&calc, MemberDescriptor::method("one").returns("int").body("return 1;"))
        .unwrap();
    assert_eq!(report.generation_of(&calc), Some(1));
    assert!(!engine.source(&calc).unwrap().contains("zero"));
}

#[test]
fn test_dropped_transaction_releases_types() {
    let engine = engine();
    let calc = id("demo.Calculator");
    {
        let mut tx = engine.create_transaction();
        tx.add_import(&calc, "demo.*").unwrap();
    }
    let report = engine.intercessor().add_import(&calc, "demo.*").unwrap();
    assert_eq!(report.generation_of(&calc), Some(1));
}

#[test]
fn test_annotation_scope_is_enforced() {
    let engine = engine();
    let calc = id("demo.Calculator");
    let err = engine
        .intercessor()
        .set_annotation(
            &calc,
            MetadataTarget::Member(MemberSelector::named("add")),
            Annotation::marker("Entity"),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ReflexError::Validation(ValidationError::InvalidAnnotationTarget { .. })
    ));

    engine
        .intercessor()
        .set_annotation(&calc, MetadataTarget::Type, Annotation::marker("Entity"))
        .unwrap();
    assert!(engine.source(&calc).unwrap().contains("@Entity"));
}

#[test]
fn test_excluded_and_unknown_types_cannot_be_targeted() {
    let engine = engine();
    let method = MemberDescriptor::method("two").returns("int").body("return 2;");
    let err = engine
        .intercessor()
        .add_method(&id("demo.Locked"), method.clone())
        .unwrap_err();
    assert!(matches!(
        err,
        ReflexError::Validation(ValidationError::IneligibleType { .. })
    ));

    let err = engine.intercessor().add_method(&id("demo.Nowhere"), method).unwrap_err();
    assert!(matches!(
        err,
        ReflexError::Validation(ValidationError::UnknownType { .. })
    ));
}

#[test]
fn test_wrong_descriptor_kind_is_rejected() {
    let engine = engine();
    let err = engine
        .intercessor()
        .add_method(&id("demo.Calculator"), MemberDescriptor::field("count", "int"))
        .unwrap_err();
    assert!(matches!(
        err,
        ReflexError::Validation(ValidationError::InvalidModifier { .. })
    ));
}

#[test]
fn test_structural_edit_recompiles_loaded_subtypes() {
    let engine = engine();
    let base = id("demo.Base");
    let child = id("demo.Child");
    let report = engine
        .intercessor()
        .add_method(&base, MemberDescriptor::method("twice").returns("int").body("return this.shared * 2;"))
        .unwrap();
    assert_eq!(report.generation_of(&base), Some(1));
    assert_eq!(report.generation_of(&child), Some(1));

    let instance = engine.instantiate(&child, Vec::new()).unwrap();
    assert_eq!(engine.call(&instance, "twice", Vec::new()).unwrap(), Value::Int(2));
    assert_eq!(engine.call(&instance, "peek", Vec::new()).unwrap(), Value::Int(1));
}

#[test]
fn test_body_replacement_does_not_touch_subtypes() {
    let engine = engine();
    let report = engine
        .intercessor()
        .replace_implementation(&id("demo.Base"), MemberSelector::named("reveal"), "return 0;", None)
        .unwrap();
    assert_eq!(report.installed, vec![(id("demo.Base"), 1)]);
    assert_eq!(engine.generation(&id("demo.Child")), Some(0));
}

#[test]
fn test_removing_a_used_member_fails_the_whole_batch() {
    let engine = engine();
    let err = engine
        .intercessor()
        .remove_member(&id("demo.Base"), MemberSelector::named("shared"))
        .unwrap_err();
    assert!(matches!(err.root_cause(), ReflexError::CompilationFailed(_)));
    match &err {
        ReflexError::Commit(commit) => {
            assert!(!commit.is_partial_publish());
            assert_eq!(commit.failing, vec![id("demo.Child")]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.generation(&id("demo.Base")), Some(0));
    assert_eq!(engine.generation(&id("demo.Child")), Some(0));
    assert!(engine.source(&id("demo.Base")).unwrap().contains("shared"));
}

#[test]
fn test_superclass_cycles_are_rejected() {
    let engine = engine();
    let base = id("demo.Base");

    let err = engine.intercessor().set_superclass(&base, Some("Base")).unwrap_err();
    assert!(matches!(err, ReflexError::InheritanceCycle(_)));

    // Closes a cycle with an installed edge: refused when recorded
    let mut tx = engine.create_transaction();
    let err = tx.set_superclass(&base, Some("Child")).unwrap_err();
    assert!(matches!(err, ReflexError::InheritanceCycle(_)));
    assert!(tx.records().is_empty());
    drop(tx);
    assert_eq!(engine.context().index.parent_of(&base), None);
    assert_eq!(engine.generation(&base), Some(0));

    // Only the batch as a whole is cyclic: Calculator -> Child -> Base -> Calculator
    let calc = id("demo.Calculator");
    let mut tx = engine.create_transaction();
    tx.set_superclass(&base, Some("Calculator"))
        .unwrap()
        .set_superclass(&calc, Some("Child"))
        .unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(err.root_cause(), ReflexError::InheritanceCycle(_)));
    assert_eq!(engine.context().index.parent_of(&base), None);
    assert_eq!(engine.context().index.parent_of(&calc), None);
    assert_eq!(engine.generation(&calc), Some(0));
}

#[test]
fn test_superclass_can_be_set_and_cleared() {
    let engine = engine();
    let calc = id("demo.Calculator");
    engine.intercessor().set_superclass(&calc, Some("Base")).unwrap();
    assert_eq!(engine.context().index.parent_of(&calc), Some(id("demo.Base")));
    assert!(engine.children_of(&id("demo.Base")).contains(&calc));

    engine.intercessor().set_superclass(&calc, None).unwrap();
    assert_eq!(engine.context().index.parent_of(&calc), None);
    assert_eq!(engine.generation(&calc), Some(2));
}

#[test]
fn test_private_member_is_kept_private() {
    let engine = engine();
    let base = id("demo.Base");
    engine
        .intercessor()
        .add_field(&base, MemberDescriptor::field("hidden", "int").private().initializer("3"))
        .unwrap();
    let tree = engine.context().cache.snapshot(&base).unwrap();
    let hidden = tree.field("hidden").unwrap();
    assert_eq!(hidden.modifiers.visibility, Visibility::Private);
}
