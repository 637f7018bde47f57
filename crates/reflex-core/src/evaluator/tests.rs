use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pretty_assertions::assert_eq;

use super::*;
use crate::compiler::{Compiler, NativeCompiler, SourceUnit, StaticClassPath};
use crate::ledger::VersionLedger;
use crate::pipeline::{LayoutRegistry, LoadUnit, Pipeline};

#[derive(Default)]
struct Types {
    current: RwLock<HashMap<TypeIdentity, Arc<LoadedType>>>,
}

impl TypeResolver for Types {
    fn current_type(&self, identity: &TypeIdentity) -> Option<Arc<LoadedType>> {
        self.current.read().get(identity).cloned()
    }
}

struct World {
    types: Arc<Types>,
    pipeline: Pipeline,
    class_path: StaticClassPath,
}

impl World {
    fn new() -> Self {
        Self {
            types: Arc::new(Types::default()),
            pipeline: Pipeline::standard(
                Arc::new(LayoutRegistry::new()),
                Arc::new(VersionLedger::new()),
                None,
            ),
            class_path: StaticClassPath::new(),
        }
    }

    /// Compile and publish every type of `source` as a new generation
    fn load(&mut self, source: &str) {
        let trees = crate::parser::reflex_parser::parse_source_unit(source).unwrap();
        let units: Vec<_> = trees
            .iter()
            .map(|tree| SourceUnit::new(tree.identity(), source))
            .collect();
        let compiled = NativeCompiler::new().compile(&units, &self.class_path).unwrap();
        for artifact in compiled {
            self.class_path.insert(artifact.signature());
            let generation = self
                .types
                .current_type(&artifact.identity)
                .map_or(0, |loaded| loaded.generation + 1);
            let loaded = self
                .pipeline
                .run(LoadUnit::new(artifact, generation, false))
                .unwrap();
            self.types
                .current
                .write()
                .insert(loaded.identity.clone(), Arc::new(loaded));
        }
    }

    fn evaluator(&self) -> Evaluator {
        Evaluator::new(self.types.clone(), 64)
    }
}

fn id(name: &str) -> TypeIdentity {
    TypeIdentity::from(name)
}

#[test]
fn test_arithmetic_and_control_flow() {
    let mut world = World::new();
    world.load(
        r#"package demo;
        class MathUtil {
            static fn fact(n: int): int {
                if (n <= 1) { return 1; }
                return n * fact(n - 1);
            }
            static fn sum(n: int): int {
                let total = 0;
                let i = 0;
                while (i < n) { i = i + 1; total = total + i; }
                return total;
            }
            static fn half(n: int): float { return n / 2.0; }
            static fn label(n: int): string { return "n=" + n + "," + 2.0; }
            static fn both(a: bool, b: bool): bool { return a && !b || false; }
        }"#,
    );
    let eval = world.evaluator();
    let math = id("demo.MathUtil");
    assert_eq!(eval.call_static(&math, "fact", vec![Value::Int(5)]).unwrap(), Value::Int(120));
    assert_eq!(eval.call_static(&math, "sum", vec![Value::Int(4)]).unwrap(), Value::Int(10));
    assert_eq!(eval.call_static(&math, "half", vec![Value::Int(5)]).unwrap(), Value::Float(2.5));
    assert_eq!(
        eval.call_static(&math, "label", vec![Value::Int(3)]).unwrap(),
        Value::Str("n=3,2.0".to_string())
    );
    assert_eq!(
        eval.call_static(&math, "both", vec![Value::Bool(true), Value::Bool(false)]).unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn test_runtime_errors() {
    let mut world = World::new();
    world.load(
        r#"package demo;
        class Faulty {
            static fn div(a: int, b: int): int { return a / b; }
            static fn grow(a: int): int { return a * a; }
            static fn forever(n: int): int { return forever(n + 1); }
        }"#,
    );
    let eval = world.evaluator();
    let faulty = id("demo.Faulty");
    assert_eq!(
        eval.call_static(&faulty, "div", vec![Value::Int(1), Value::Int(0)]).unwrap_err(),
        EvaluatorError::DivisionByZero
    );
    assert!(matches!(
        eval.call_static(&faulty, "grow", vec![Value::Int(i64::MAX)]),
        Err(EvaluatorError::Overflow { .. })
    ));
    assert_eq!(
        eval.call_static(&faulty, "forever", vec![Value::Int(0)]).unwrap_err(),
        EvaluatorError::DepthExceeded { limit: 64 }
    );
    assert!(matches!(
        eval.call_static(&faulty, "div", vec![Value::Str("x".into()), Value::Int(1)]),
        Err(EvaluatorError::MethodNotFound { .. })
    ));
    assert!(matches!(
        eval.call_static(&id("demo.Nowhere"), "f", Vec::new()),
        Err(EvaluatorError::TypeNotLoaded { .. })
    ));
}

#[test]
fn test_instance_state_survives_redefinition() {
    let mut world = World::new();
    world.load(
        r#"package demo;
        class Counter {
            field count: int = 5;
            fn bump(): int { this.count = this.count + 1; return this.count; }
        }"#,
    );
    let eval = world.evaluator();
    let counter = eval.instantiate(&id("demo.Counter"), Vec::new()).unwrap();
    assert_eq!(eval.call_method(&counter, "bump", Vec::new()).unwrap(), Value::Int(6));

    world.load(
        r#"package demo;
        class Counter {
            field count: int = 5;
            field label: string = "fresh";
            fn bump(): int { this.count = this.count + 10; return this.count; }
            fn describe(): string { return this.label + ":" + this.count; }
            fn rename(name: string) { this.label = name; }
        }"#,
    );
    // Old instance keeps its slot value and sees the new field's default
    assert_eq!(eval.call_method(&counter, "bump", Vec::new()).unwrap(), Value::Int(16));
    assert_eq!(
        eval.call_method(&counter, "describe", Vec::new()).unwrap(),
        Value::Str("fresh:16".to_string())
    );
    let object = counter.as_object().unwrap();
    assert_eq!(object.extension_len(), 0);
    eval.call_method(&counter, "rename", vec![Value::Str("c1".into())]).unwrap();
    assert_eq!(object.extension_len(), 1);
    assert_eq!(eval.field_value(object, "label").unwrap(), Value::Str("c1".into()));
    assert_eq!(eval.field_value(object, "count").unwrap(), Value::Int(16));
}

#[test]
fn test_virtual_dispatch_and_init() {
    let mut world = World::new();
    world.load(
        r#"package demo;
        class Shape {
            protected field name: string = "shape";
            fn init(name: string) { this.name = name; }
            fn area(): float { return 0.0; }
            fn describe(): string { return this.name + " " + this.area(); }
        }
        class Square extends Shape {
            field side: float;
            fn init(side: float) { this.name = "square"; this.side = side; }
            fn area(): float { return this.side * this.side; }
        }
        class Factory {
            static fn square(): Shape { return new Square(3); }
        }"#,
    );
    let eval = world.evaluator();
    let square = eval.call_static(&id("demo.Factory"), "square", Vec::new()).unwrap();
    assert_eq!(square.type_name(), "demo.Square");
    assert_eq!(
        eval.call_method(&square, "describe", Vec::new()).unwrap(),
        Value::Str("square 9.0".to_string())
    );

    let shape = eval.instantiate(&id("demo.Shape"), vec![Value::Str("blob".into())]).unwrap();
    assert_eq!(
        eval.call_method(&shape, "describe", Vec::new()).unwrap(),
        Value::Str("blob 0.0".to_string())
    );
    assert!(matches!(
        eval.instantiate(&id("demo.Shape"), vec![Value::Int(1), Value::Int(2)]),
        Err(EvaluatorError::MethodNotFound { .. })
    ));
}

#[test]
fn test_dynamic_access_respects_visibility() {
    let mut world = World::new();
    world.load(
        r#"package demo;
        class Vault {
            private field secret: int = 42;
            field open: int = 1;
            private fn hidden(): int { return this.secret; }
        }
        class Inspector {
            static fn open(v: any): any { return v.open; }
            static fn peek(v: any): any { return v.secret; }
            static fn call(v: any): any { return v.hidden(); }
        }"#,
    );
    let eval = world.evaluator();
    let vault = eval.instantiate(&id("demo.Vault"), Vec::new()).unwrap();
    let inspector = id("demo.Inspector");
    assert_eq!(eval.call_static(&inspector, "open", vec![vault.clone()]).unwrap(), Value::Int(1));
    assert!(matches!(
        eval.call_static(&inspector, "peek", vec![vault.clone()]),
        Err(EvaluatorError::Inaccessible { .. })
    ));
    assert!(matches!(
        eval.call_static(&inspector, "call", vec![vault.clone()]),
        Err(EvaluatorError::Inaccessible { .. })
    ));
    assert!(matches!(
        eval.call_static(&inspector, "open", vec![Value::Null]),
        Err(EvaluatorError::NullReceiver { .. })
    ));
}

#[test]
fn test_unlinked_artifacts_do_not_run() {
    let source = "package demo; class Raw { static fn f(): int { return g(); } static fn g(): int { return 1; } }";
    let compiled = NativeCompiler::new()
        .compile(&[SourceUnit::new(id("demo.Raw"), source)], &StaticClassPath::new())
        .unwrap()
        .remove(0);
    let layout = Arc::new(crate::host::OriginalLayout::from_artifact(&compiled));
    let raw = Arc::new(LoadedType {
        identity: id("demo.Raw"),
        generation: 0,
        artifact: compiled,
        accessors: Default::default(),
        layout,
        predecessor: None,
        ephemeral: false,
    });
    let types = Types::default();
    types.current.write().insert(id("demo.Raw"), raw.clone());
    let eval = Evaluator::new(Arc::new(types), 16);
    let err = eval
        .invoke_loaded(&raw, &MethodRef::new("f", Vec::new()), None, Vec::new())
        .unwrap_err();
    assert!(matches!(err, EvaluatorError::Unlinked { .. }));
}
