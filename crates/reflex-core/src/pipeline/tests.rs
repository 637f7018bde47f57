use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::*;
use crate::compiler::ir::{CallTarget, FieldAccess, Instr, Node};
use crate::compiler::{Compiler, Const, MethodRef, NativeCompiler, SourceUnit, StaticClassPath, Ty};

fn compile(source: &str) -> CompiledType {
    let trees = crate::parser::reflex_parser::parse_source_unit(source).unwrap();
    let identity = trees[0].identity();
    NativeCompiler::new()
        .compile(&[SourceUnit::new(identity, source)], &StaticClassPath::new())
        .unwrap()
        .remove(0)
}

const COUNTER_V0: &str = r#"
package demo;
class Counter {
    field count: int = 5;
    fn bump(): int { this.count = this.count + 1; return this.helper(); }
    fn helper(): int { return this.count; }
    fn pending(): float;
    fn reset();
}
"#;

const COUNTER_V1: &str = r#"
package demo;
class Counter {
    field count: int = 5;
    field label: string = "c";
    fn bump(): int { this.label = "bumped"; return this.count; }
}
"#;

fn standard() -> (Pipeline, Arc<LayoutRegistry>) {
    let layouts = Arc::new(LayoutRegistry::new());
    let pipeline = Pipeline::standard(layouts.clone(), Arc::new(VersionLedger::new()), None);
    (pipeline, layouts)
}

fn field_accesses(body: &[Instr]) -> Vec<(String, FieldAccess)> {
    struct Collect(Vec<(String, FieldAccess)>);
    impl crate::compiler::ir::LinkVisitor for Collect {
        fn field(&mut self, field: &mut crate::compiler::ir::FieldRef) {
            self.0.push((field.name.clone(), field.access.clone()));
        }
    }
    let mut body = body.to_vec();
    let mut collect = Collect(Vec::new());
    crate::compiler::ir::walk_body(&mut body, &mut collect);
    collect.0
}

#[test]
fn test_standard_pipeline_links_a_type() {
    let (pipeline, layouts) = standard();
    assert_eq!(
        pipeline.pass_names(),
        vec![
            "original-tag",
            "version-materialize",
            "default-member",
            "cross-version-field-access",
            "redirect",
            "writer"
        ]
    );

    let loaded = pipeline.run(LoadUnit::new(compile(COUNTER_V0), 0, false)).unwrap();
    assert_eq!(layouts.get(&"demo.Counter".into()).unwrap().slots.len(), 1);
    assert_eq!(
        loaded.accessors.get("count").unwrap().access,
        FieldAccess::Direct(0)
    );

    let bump = loaded.method(&MethodRef::new("bump", Vec::new())).unwrap();
    let body = bump.body.as_ref().unwrap();
    assert_eq!(
        field_accesses(body),
        vec![
            ("count".to_string(), FieldAccess::Direct(0)),
            ("count".to_string(), FieldAccess::Direct(0)),
        ]
    );
    match &body[1] {
        Instr::Return(Some(Node::Invoke { target, .. })) => {
            assert_eq!(*target, CallTarget::Current("demo.Counter".into()));
        }
        other => panic!("expected a call, got {other:?}"),
    }

    let pending = loaded.method(&MethodRef::new("pending", Vec::new())).unwrap();
    assert_eq!(
        pending.body,
        Some(vec![Instr::Return(Some(Node::Const(Const::Float(0.0))))])
    );
    let reset = loaded.method(&MethodRef::new("reset", Vec::new())).unwrap();
    assert_eq!(reset.body, Some(vec![Instr::Return(None)]));

    let stats = pipeline.stats();
    assert_eq!(stats.len(), 6);
    assert!(stats.iter().all(|s| s.applications == 1 && s.failures == 0));
    assert_eq!(stats[2].rewrites, 2);
    assert_eq!(stats[3].rewrites, 3);
    assert!(stats.iter().all(|s| s.success_rate() == 1.0));
    assert!(stats[0].description.contains("generation 0"));
}

#[test]
fn test_new_fields_go_through_accessors() {
    let (pipeline, _) = standard();
    pipeline.run(LoadUnit::new(compile(COUNTER_V0), 0, false)).unwrap();
    let loaded = pipeline.run(LoadUnit::new(compile(COUNTER_V1), 1, false)).unwrap();

    assert_eq!(loaded.accessors.get("count").unwrap().access, FieldAccess::Direct(0));
    assert_eq!(loaded.accessors.get("label").unwrap().access, FieldAccess::Indirect);
    let bump = loaded.method(&MethodRef::new("bump", Vec::new())).unwrap();
    assert_eq!(
        field_accesses(bump.body.as_ref().unwrap()),
        vec![
            ("label".to_string(), FieldAccess::Indirect),
            ("count".to_string(), FieldAccess::Direct(0)),
        ]
    );
    // The layout stays the generation-0 one
    assert_eq!(loaded.layout.slots.len(), 1);
}

#[test]
fn test_retyped_field_leaves_its_slot() {
    let (pipeline, _) = standard();
    pipeline.run(LoadUnit::new(compile(COUNTER_V0), 0, false)).unwrap();
    let retyped = compile("package demo; class Counter { field count: string; }");
    let loaded = pipeline.run(LoadUnit::new(retyped, 1, false)).unwrap();
    assert_eq!(loaded.accessors.get("count").unwrap().access, FieldAccess::Indirect);
    assert_eq!(loaded.accessors.get("count").unwrap().ty, Ty::Str);
}

#[test]
fn test_missing_marker_fails_the_load() {
    let mut pipeline = Pipeline::new();
    pipeline.add_pass(Box::new(DefaultMemberPass));
    pipeline.add_pass(Box::new(RedirectPass));

    let err = pipeline
        .run(LoadUnit::new(compile(COUNTER_V0), 0, false))
        .unwrap_err();
    match err {
        PipelineError::Invariant { pass, missing, identity } => {
            assert_eq!(pass, "default-member");
            assert_eq!(missing, Marker::Materialized);
            assert_eq!(identity.as_str(), "demo.Counter");
        }
        other => panic!("expected an invariant error, got {other:?}"),
    }
    assert_eq!(pipeline.stats()[0].failures, 1);
    assert_eq!(pipeline.stats()[0].success_rate(), 0.0);
    assert_eq!(pipeline.stats()[1].applications, 0);
    assert_eq!(pipeline.stats()[1].average_time_ms(), 0.0);

    pipeline.clear_stats();
    assert_eq!(pipeline.stats()[0].applications, 0);
    assert!(pipeline.stats()[0].description.starts_with("Synthesizes"));
}

#[test]
fn test_unit_without_writer_cannot_finish() {
    let layouts = Arc::new(LayoutRegistry::new());
    let mut pipeline = Pipeline::new();
    pipeline.add_pass(Box::new(OriginalTagPass::new(layouts, None)));
    let err = pipeline
        .run(LoadUnit::new(compile(COUNTER_V0), 0, false))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Invariant { missing: Marker::Written, .. }));
}

#[test]
fn test_writer_persists_installed_versions_only() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        ArtifactStore::open(dir.path().join("original"), dir.path().join("modified")).unwrap(),
    );
    let layouts = Arc::new(LayoutRegistry::new());
    let pipeline = Pipeline::standard(
        layouts.clone(),
        Arc::new(VersionLedger::new()),
        Some(store.clone()),
    );

    let loaded = pipeline.run(LoadUnit::new(compile(COUNTER_V0), 0, false)).unwrap();
    let id = TypeIdentity::from("demo.Counter");
    assert!(store.contains_modified(&id, 0));
    assert_eq!(store.read_modified(&id, 0).unwrap(), loaded.artifact);
    assert_eq!(store.read_original(&id).unwrap(), loaded.artifact);

    let ephemeral = compile("package reflex.adapter; class Adapter_1 { field x: int; }");
    let adapter = pipeline.run(LoadUnit::new(ephemeral, 0, true)).unwrap();
    assert!(adapter.ephemeral);
    assert_eq!(adapter.layout.slots.len(), 1);
    assert!(layouts.get(&adapter.identity).is_none());
    assert_eq!(store.list_modified().unwrap(), vec!["demo.Counter@0.rfxc".to_string()]);
}
