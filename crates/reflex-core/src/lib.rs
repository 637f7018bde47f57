//! # Reflex Core
//!
//! Structural intercession engine for the Reflex class language:
//! - editable structural trees and a cache/index over them
//! - a version ledger with per-type generations
//! - the transformer pipeline run on every (re)load
//! - transactional mutation with compile-and-swap publication
//! - invoker binding for members and ad-hoc expressions
//!
//! The parser, compiler and host are ports; this crate ships one in-process
//! implementation of each so the engine runs end to end.

#![warn(clippy::all)]

pub mod ast;
pub mod binder;
pub mod compiler;
pub mod driver;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod host;
pub mod intercessor;
pub mod ledger;
pub mod parser;
pub mod pipeline;
pub mod security;
pub mod storage;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use ast::{
    Annotation, MemberDescriptor, MemberSelector, MetadataTarget, StructuralTree, TypeIdentity,
    Visibility,
};
pub use binder::{CallableShape, EvalRequest, Invoker, InvokerBinder};
pub use driver::CommitReport;
pub use engine::{Engine, EngineContext};
pub use error::{
    AccessibilityError, CommitError, CompilationFailed, ReflexError, ResolutionError,
    ValidationError,
};
pub use evaluator::{Evaluator, EvaluatorError, Value};
pub use intercessor::{AnnotationRegistry, AnnotationScope, Intercessor, Transaction, TransactionState};
pub use ledger::{Version, VersionLedger};
pub use parser::{create_parser, StructuralParser};
pub use storage::{DirectorySources, InMemorySources, SourceProvider, StorageError};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for the engine components
pub fn init_tracing() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "reflex_core=info".parse() {
        filter = filter.add_directive(directive);
    }
    // A subscriber may already be installed by the embedding program
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Baseline artifacts, written once at bootstrap
    pub original_dir: PathBuf,
    /// Installed artifacts, reset to a copy of `original_dir` at start
    pub modified_dir: PathBuf,
    /// Serialize every installed version to `modified_dir`
    pub persist_artifacts: bool,
    /// Maximum evaluation depth
    pub max_eval_depth: usize,
    /// Allowed targets of known annotations
    pub annotations: AnnotationRegistry,
    /// Loaded but never eligible for mutation
    pub excluded_types: Vec<TypeIdentity>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            original_dir: "./reflex-artifacts/original".into(),
            modified_dir: "./reflex-artifacts/modified".into(),
            persist_artifacts: false,
            max_eval_depth: evaluator::DEFAULT_MAX_DEPTH,
            annotations: AnnotationRegistry::default(),
            excluded_types: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ReflexError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ReflexError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| ReflexError::Config(format!("{}: {e}", path.display())))
    }

    /// Persist artifacts below `root/original` and `root/modified`
    pub fn with_artifact_root(mut self, root: impl AsRef<Path>) -> Self {
        self.original_dir = root.as_ref().join("original");
        self.modified_dir = root.as_ref().join("modified");
        self.persist_artifacts = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_from_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reflex.json");
        std::fs::write(
            &path,
            r#"{ "max_eval_depth": 64, "annotations": { "Entity": "type_only" }, "excluded_types": ["demo.Locked"] }"#,
        )
        .unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_eval_depth, 64);
        assert_eq!(config.annotations.scope_of("Entity"), AnnotationScope::TypeOnly);
        assert_eq!(config.excluded_types, vec![TypeIdentity::from("demo.Locked")]);
        assert!(!config.persist_artifacts);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(ReflexError::Config(_))
        ));
    }
}
