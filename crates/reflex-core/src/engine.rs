//! Engine context and bootstrap
//!
//! [`EngineContext`] holds every collaborator the components share; it is
//! built once and handed around behind an `Arc`. [`Engine`] bootstraps a
//! program from its original sources and exposes the public surface.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::ast::TypeIdentity;
use crate::binder::{CallableShape, EvalRequest, Invoker, InvokerBinder};
use crate::compiler::{Compiler, NativeCompiler, SourceUnit, StaticClassPath};
use crate::error::{CompilationFailed, ReflexError};
use crate::evaluator::{Evaluator, TypeResolver, Value};
use crate::host::{CodeInstallationPort, InProcessHost};
use crate::intercessor::{Intercessor, Transaction};
use crate::ledger::{Version, VersionLedger};
use crate::parser::{ReflexParser, StructuralParser};
use crate::pipeline::{LayoutRegistry, PassStats, Pipeline};
use crate::storage::{ArtifactStore, InheritanceIndex, SourceProvider, StructuralCache};
use crate::EngineConfig;

/// Shared state and ports of one engine
pub struct EngineContext {
    pub config: EngineConfig,
    pub parser: Arc<dyn StructuralParser>,
    pub compiler: Arc<dyn Compiler>,
    pub host: Arc<dyn CodeInstallationPort>,
    pub ledger: Arc<VersionLedger>,
    pub index: Arc<InheritanceIndex>,
    pub cache: Arc<StructuralCache>,
    pub layouts: Arc<LayoutRegistry>,
    pub store: Option<Arc<ArtifactStore>>,
    pub pipeline: Arc<Pipeline>,
    pub evaluator: Evaluator,
    excluded: HashSet<TypeIdentity>,
    type_locks: DashMap<TypeIdentity, Arc<Mutex<()>>>,
}

impl EngineContext {
    /// Context wired to the in-process parser, compiler and host
    pub fn new(config: EngineConfig) -> Result<Self, ReflexError> {
        Self::with_ports(
            config,
            Arc::new(ReflexParser::new()),
            Arc::new(NativeCompiler::new()),
            Arc::new(InProcessHost::new()),
        )
    }

    pub fn with_ports(
        config: EngineConfig,
        parser: Arc<dyn StructuralParser>,
        compiler: Arc<dyn Compiler>,
        host: Arc<dyn CodeInstallationPort>,
    ) -> Result<Self, ReflexError> {
        if config.max_eval_depth == 0 {
            return Err(ReflexError::Config("max_eval_depth must be positive".to_string()));
        }
        let store = if config.persist_artifacts {
            Some(Arc::new(ArtifactStore::open(&config.original_dir, &config.modified_dir)?))
        } else {
            None
        };
        let ledger = Arc::new(VersionLedger::new());
        let index = Arc::new(InheritanceIndex::new());
        let layouts = Arc::new(LayoutRegistry::new());
        let pipeline = Arc::new(Pipeline::standard(layouts.clone(), ledger.clone(), store.clone()));
        let evaluator = Evaluator::new(ledger.clone() as Arc<dyn TypeResolver>, config.max_eval_depth);
        Ok(Self {
            excluded: config.excluded_types.iter().cloned().collect(),
            cache: Arc::new(StructuralCache::new(index.clone())),
            config,
            parser,
            compiler,
            host,
            ledger,
            index,
            layouts,
            store,
            pipeline,
            evaluator,
            type_locks: DashMap::new(),
        })
    }

    /// Mutation lock of one type, created on first use
    pub fn type_lock(&self, identity: &TypeIdentity) -> Arc<Mutex<()>> {
        self.type_locks
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Loaded and callable, but never mutated
    pub fn is_excluded(&self, identity: &TypeIdentity) -> bool {
        self.excluded.contains(identity)
    }
}

pub struct Engine {
    context: Arc<EngineContext>,
    intercessor: Intercessor,
    binder: InvokerBinder,
}

impl Engine {
    /// Load every original type and install it as generation 0
    pub fn bootstrap(context: EngineContext, provider: &dyn SourceProvider) -> Result<Self, ReflexError> {
        info!("Bootstrapping reflex engine v{}", crate::VERSION);
        context.host.register_pipeline(context.pipeline.clone());
        if let Some(store) = &context.store {
            store.reset_modified()?;
        }

        let identities = context.cache.load_catalog(provider, context.parser.as_ref())?;
        let mut units = Vec::with_capacity(identities.len());
        for identity in &identities {
            let tree = context.cache.get(identity)?;
            units.push(SourceUnit::new(identity.clone(), context.parser.print(&tree)));
        }

        let mut compiled = context
            .compiler
            .compile(&units, &StaticClassPath::new())
            .map_err(|diagnostics| CompilationFailed { diagnostics })?;
        compiled.sort_by(|a, b| a.identity.cmp(&b.identity));

        // Every original layout is known before any body is linked, so
        // references to inherited fields link to direct slots
        for artifact in &compiled {
            context.layouts.tag_original(artifact);
        }
        let mut sources: HashMap<_, _> = units
            .into_iter()
            .map(|unit| (unit.identity, unit.source))
            .collect();
        for artifact in compiled {
            let identity = artifact.identity.clone();
            let source = sources.remove(&identity).unwrap_or_default();
            let loaded = context.host.install(&identity, artifact, 0)?;
            context.ledger.register_original(Version::new(loaded, source))?;
            debug!("Installed original {}", identity);
        }
        info!("Bootstrapped {} type(s)", identities.len());

        let context = Arc::new(context);
        Ok(Self {
            intercessor: Intercessor::new(context.clone()),
            binder: InvokerBinder::new(context.clone()),
            context,
        })
    }

    /// Bootstrap with the in-process collaborators
    pub fn from_sources(config: EngineConfig, provider: &dyn SourceProvider) -> Result<Self, ReflexError> {
        Self::bootstrap(EngineContext::new(config)?, provider)
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn intercessor(&self) -> &Intercessor {
        &self.intercessor
    }

    pub fn binder(&self) -> &InvokerBinder {
        &self.binder
    }

    pub fn create_transaction(&self) -> Transaction {
        self.intercessor.create_transaction()
    }

    // -- running code -------------------------------------------------------

    pub fn instantiate(&self, identity: &TypeIdentity, args: Vec<Value>) -> Result<Value, ReflexError> {
        Ok(self.context.evaluator.instantiate(identity, args)?)
    }

    pub fn call(&self, receiver: &Value, method: &str, args: Vec<Value>) -> Result<Value, ReflexError> {
        Ok(self.context.evaluator.call_method(receiver, method, args)?)
    }

    pub fn call_static(&self, identity: &TypeIdentity, method: &str, args: Vec<Value>) -> Result<Value, ReflexError> {
        Ok(self.context.evaluator.call_static(identity, method, args)?)
    }

    pub fn get_method_invoker(
        &self,
        owner: &TypeIdentity,
        member: &str,
        shape: CallableShape,
    ) -> Result<Arc<Invoker>, ReflexError> {
        self.binder.get_method_invoker(owner, member, shape)
    }

    pub fn get_field_invoker(
        &self,
        owner: &TypeIdentity,
        member: &str,
        shape: CallableShape,
    ) -> Result<Arc<Invoker>, ReflexError> {
        self.binder.get_field_invoker(owner, member, shape)
    }

    pub fn generate_eval_invoker(&self, request: &EvalRequest) -> Result<Arc<Invoker>, ReflexError> {
        self.binder.generate_eval_invoker(request)
    }

    // -- inspection ---------------------------------------------------------

    pub fn current_version(&self, identity: &TypeIdentity) -> Result<Arc<Version>, ReflexError> {
        Ok(self.context.ledger.current_version(identity)?)
    }

    pub fn generation(&self, identity: &TypeIdentity) -> Option<u64> {
        self.context.ledger.current_generation(identity)
    }

    pub fn history(&self, identity: &TypeIdentity) -> Vec<Arc<Version>> {
        self.context.ledger.history(identity)
    }

    pub fn types(&self) -> Vec<TypeIdentity> {
        self.context.ledger.known_types()
    }

    /// Source regenerated from the current tree
    pub fn source(&self, identity: &TypeIdentity) -> Result<String, ReflexError> {
        Ok(self.context.cache.source(identity)?)
    }

    pub fn children_of(&self, identity: &TypeIdentity) -> Vec<TypeIdentity> {
        self.context.index.children_of(identity)
    }

    pub fn pipeline_stats(&self) -> Vec<PassStats> {
        self.context.pipeline.stats()
    }
}
