use pretty_assertions::assert_eq;

use super::*;
use crate::parser::reflex_parser::{parse_member, parse_source_unit, parse_statements};

fn calculator() -> StructuralTree {
    parse_source_unit(
        r#"
        package demo;
        public class Calculator {
            public fn add(a: float, b: float): float { return a + b; }
            public fn scale(x: int): int { return x * 2; }
            public fn scale(x: float): float { return x * 2.0; }
        }
        "#,
    )
    .unwrap()
    .remove(0)
}

#[test]
fn test_add_field_rejects_duplicate_name() {
    let mut tree = calculator();
    let field = parse_member("private field lastResult: float = 0.0;").unwrap();
    StructuralEdit::AddMember(field.clone()).apply(&mut tree).unwrap();
    assert!(tree.field("lastResult").is_some());

    let err = StructuralEdit::AddMember(field).apply(&mut tree).unwrap_err();
    assert_eq!(
        err,
        EditError::DuplicateMember {
            member: "lastResult".to_string()
        }
    );
}

#[test]
fn test_add_method_allows_overload_but_not_same_signature() {
    let mut tree = calculator();
    let overload = parse_member("public fn add(a: int): int { return a; }").unwrap();
    StructuralEdit::AddMember(overload).apply(&mut tree).unwrap();
    assert_eq!(tree.methods_named("add").count(), 2);

    let clash = parse_member("public fn add(x: float, y: float): float { return x; }").unwrap();
    assert!(matches!(
        StructuralEdit::AddMember(clash).apply(&mut tree),
        Err(EditError::DuplicateMember { .. })
    ));
}

#[test]
fn test_replace_body_of_unknown_member_fails_without_change() {
    let mut tree = calculator();
    let before = tree.clone();
    let edit = StructuralEdit::ReplaceBody {
        selector: MemberSelector::named("subtract"),
        body: parse_statements("return 0.0;").unwrap(),
        parameter_names: None,
    };
    assert_eq!(
        edit.apply(&mut tree),
        Err(EditError::UnknownMember {
            member: "subtract".to_string()
        })
    );
    assert_eq!(tree, before);
}

#[test]
fn test_replace_body_needs_parameter_types_for_overloads() {
    let mut tree = calculator();
    let body = parse_statements("return x * 3;").unwrap();
    let ambiguous = StructuralEdit::ReplaceBody {
        selector: MemberSelector::named("scale"),
        body: body.clone(),
        parameter_names: None,
    };
    assert!(matches!(
        ambiguous.apply(&mut tree),
        Err(EditError::AmbiguousMember { .. })
    ));

    let exact = StructuralEdit::ReplaceBody {
        selector: MemberSelector::method("scale", &["int"]),
        body: body.clone(),
        parameter_names: None,
    };
    exact.apply(&mut tree).unwrap();
    let method = tree
        .methods_named("scale")
        .find(|m| m.params[0].ty.as_str() == "int")
        .unwrap();
    assert_eq!(method.body.as_ref(), Some(&body));
}

#[test]
fn test_replace_body_renames_parameters() {
    let mut tree = calculator();
    let edit = StructuralEdit::ReplaceBody {
        selector: MemberSelector::named("add"),
        body: parse_statements("return left + right;").unwrap(),
        parameter_names: Some(vec!["left".to_string(), "right".to_string()]),
    };
    edit.apply(&mut tree).unwrap();
    let add = tree.methods_named("add").next().unwrap();
    let names: Vec<_> = add.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["left", "right"]);
    assert_eq!(add.params[0].ty.as_str(), "float");

    let wrong_count = StructuralEdit::ReplaceBody {
        selector: MemberSelector::named("add"),
        body: Vec::new(),
        parameter_names: Some(vec!["only".to_string()]),
    };
    assert!(matches!(
        wrong_count.apply(&mut tree),
        Err(EditError::ParameterCount { expected: 2, actual: 1, .. })
    ));
}

#[test]
fn test_set_annotation_replaces_same_name() {
    let mut tree = calculator();
    let target = MetadataTarget::Member(MemberSelector::named("add"));
    StructuralEdit::SetAnnotation {
        target: target.clone(),
        annotation: Annotation::with_value("Doc", "first"),
    }
    .apply(&mut tree)
    .unwrap();
    StructuralEdit::SetAnnotation {
        target,
        annotation: Annotation::with_value("Doc", "second"),
    }
    .apply(&mut tree)
    .unwrap();

    let add = tree.methods_named("add").next().unwrap();
    assert_eq!(add.annotations, vec![Annotation::with_value("Doc", "second")]);
}

#[test]
fn test_imports_and_superclass() {
    let mut tree = calculator();
    StructuralEdit::AddImport("util.Formatter".to_string())
        .apply(&mut tree)
        .unwrap();
    StructuralEdit::AddImport("util.Formatter".to_string())
        .apply(&mut tree)
        .unwrap();
    assert_eq!(tree.imports, vec!["util.Formatter".to_string()]);

    StructuralEdit::SetImports(vec!["util.*".to_string()])
        .apply(&mut tree)
        .unwrap();
    assert_eq!(tree.imports, vec!["util.*".to_string()]);

    StructuralEdit::SetSuperclass(Some(TypeRef::named("Base")))
        .apply(&mut tree)
        .unwrap();
    assert_eq!(tree.superclass, Some(TypeRef::named("Base")));
    assert!(StructuralEdit::SetSuperclass(None).is_structural());
}

#[test]
fn test_resolve_type_name_order() {
    let known = ["demo.Base", "util.Formatter", "util.Base", "Root"];
    let exists = |identity: &TypeIdentity| known.contains(&identity.as_str());
    let imports = vec!["util.Formatter".to_string(), "util.*".to_string()];

    assert_eq!(
        resolve_type_name("demo", &imports, "Base", exists),
        Some(TypeIdentity::from("demo.Base"))
    );
    assert_eq!(
        resolve_type_name("demo", &imports, "Formatter", exists),
        Some(TypeIdentity::from("util.Formatter"))
    );
    assert_eq!(
        resolve_type_name("other", &imports, "Base", exists),
        Some(TypeIdentity::from("util.Base"))
    );
    assert_eq!(
        resolve_type_name("demo", &[], "Root", exists),
        Some(TypeIdentity::from("Root"))
    );
    assert_eq!(resolve_type_name("demo", &[], "Missing", exists), None);
}
