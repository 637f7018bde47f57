/*!
# Transformer Pipeline

Ordered rewriting passes run by the host every time a type's code is
(re)loaded. Each pass leaves a [`Marker`] on the [`LoadUnit`]; the next pass
refuses to run unless the marker of its predecessor is present, so a
misconfigured or reordered pipeline fails the load instead of installing a
half-linked type.

Standard order:

1. `original-tag` - record the generation-0 field layout
2. `version-materialize` - accessor table and predecessor link
3. `default-member` - bodies for declared-only methods
4. `cross-version-field-access` - direct slot or accessor indirection
5. `redirect` - compile-time call targets resolve at call time
6. `writer` - persist the installed artifact
*/

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ast::TypeIdentity;
use crate::compiler::CompiledType;
use crate::host::{AccessorTable, LoadedType, OriginalLayout};
use crate::ledger::VersionLedger;
use crate::storage::{ArtifactStore, StorageError};

pub mod passes;

#[cfg(test)]
mod tests;

pub use passes::{
    CrossVersionFieldAccessPass, DefaultMemberPass, OriginalTagPass, RedirectPass,
    VersionMaterializePass, WriterPass,
};

/// Evidence that a pass ran on a load unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    OriginalTagged,
    Materialized,
    DefaultsSynthesized,
    FieldAccessLinked,
    Redirected,
    Written,
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Marker::OriginalTagged => "original-tagged",
            Marker::Materialized => "materialized",
            Marker::DefaultsSynthesized => "defaults-synthesized",
            Marker::FieldAccessLinked => "field-access-linked",
            Marker::Redirected => "redirected",
            Marker::Written => "written",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline invariant violated: pass '{pass}' requires marker '{missing}' on {identity}")]
    Invariant {
        pass: String,
        missing: Marker,
        identity: TypeIdentity,
    },

    #[error("Pass '{pass}' failed on {identity}: {message}")]
    PassFailed {
        pass: String,
        identity: TypeIdentity,
        message: String,
    },

    #[error("Artifact store error: {0}")]
    Store(#[from] StorageError),
}

/// A type travelling through the pipeline
#[derive(Debug)]
pub struct LoadUnit {
    pub identity: TypeIdentity,
    pub generation: u64,
    pub artifact: CompiledType,
    pub ephemeral: bool,
    markers: Vec<Marker>,
    pub layout: Option<Arc<OriginalLayout>>,
    pub accessors: Option<AccessorTable>,
    pub predecessor: Option<u64>,
    pub persisted: Option<PathBuf>,
}

impl LoadUnit {
    pub fn new(artifact: CompiledType, generation: u64, ephemeral: bool) -> Self {
        Self {
            identity: artifact.identity.clone(),
            generation,
            artifact,
            ephemeral,
            markers: Vec::new(),
            layout: None,
            accessors: None,
            predecessor: None,
            persisted: None,
        }
    }

    pub fn has(&self, marker: Marker) -> bool {
        self.markers.contains(&marker)
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    fn mark(&mut self, marker: Marker) {
        if !self.has(marker) {
            self.markers.push(marker);
        }
    }

    /// Hand the unit over as an executable type once the last pass ran
    pub fn finish(self) -> Result<LoadedType, PipelineError> {
        let missing = |marker| PipelineError::Invariant {
            pass: "finish".to_string(),
            missing: marker,
            identity: self.identity.clone(),
        };
        if !self.has(Marker::Written) {
            return Err(missing(Marker::Written));
        }
        let layout = self.layout.clone().ok_or_else(|| missing(Marker::OriginalTagged))?;
        let accessors = self.accessors.clone().ok_or_else(|| missing(Marker::Materialized))?;
        Ok(LoadedType {
            identity: self.identity,
            generation: self.generation,
            artifact: self.artifact,
            accessors,
            layout,
            predecessor: self.predecessor,
            ephemeral: self.ephemeral,
        })
    }
}

/// One rewriting step of the pipeline
pub trait TransformerPass: Send + Sync {
    /// Human-readable name for this pass
    fn name(&self) -> &'static str;

    /// Detailed description of what this pass does
    fn description(&self) -> &'static str;

    /// Marker the previous pass must have left
    fn requires(&self) -> Option<Marker>;

    /// Marker this pass leaves
    fn produces(&self) -> Marker;

    /// Rewrite the unit in place, returning the number of rewrites
    fn transform(&self, unit: &mut LoadUnit) -> Result<usize, PipelineError>;
}

/// Statistics for pass execution
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PassStats {
    pub pass_name: String,
    pub description: String,
    pub applications: u64,
    pub rewrites: u64,
    pub failures: u64,
    pub total_time_ms: u64,
}

impl PassStats {
    pub fn new(pass_name: String, description: String) -> Self {
        Self {
            pass_name,
            description,
            applications: 0,
            rewrites: 0,
            failures: 0,
            total_time_ms: 0,
        }
    }

    /// Share of applications that did not fail; 0 before the first run
    pub fn success_rate(&self) -> f64 {
        if self.applications == 0 {
            0.0
        } else {
            (self.applications - self.failures) as f64 / self.applications as f64
        }
    }

    pub fn average_time_ms(&self) -> f64 {
        if self.applications == 0 {
            0.0
        } else {
            self.total_time_ms as f64 / self.applications as f64
        }
    }
}

/// Generation-0 field layouts, one per type, fixed on first load
#[derive(Debug, Default)]
pub struct LayoutRegistry {
    layouts: DashMap<TypeIdentity, Arc<OriginalLayout>>,
}

impl LayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the layout of `artifact` unless one is already known. Returns
    /// the layout in force and whether this call created it.
    pub fn tag_original(&self, artifact: &CompiledType) -> (Arc<OriginalLayout>, bool) {
        let mut created = false;
        let layout = self
            .layouts
            .entry(artifact.identity.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(OriginalLayout::from_artifact(artifact))
            })
            .clone();
        (layout, created)
    }

    pub fn get(&self, identity: &TypeIdentity) -> Option<Arc<OriginalLayout>> {
        self.layouts.get(identity).map(|layout| layout.clone())
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

/// Ordered passes plus their statistics
pub struct Pipeline {
    passes: Vec<Box<dyn TransformerPass>>,
    stats: Mutex<IndexMap<String, PassStats>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            stats: Mutex::new(IndexMap::new()),
        }
    }

    /// The six standard passes in their fixed order. Without a store nothing
    /// is persisted, but the writer still runs and marks the unit.
    pub fn standard(
        layouts: Arc<LayoutRegistry>,
        ledger: Arc<VersionLedger>,
        store: Option<Arc<ArtifactStore>>,
    ) -> Self {
        let mut pipeline = Self::new();
        pipeline.add_pass(Box::new(OriginalTagPass::new(layouts.clone(), store.clone())));
        pipeline.add_pass(Box::new(VersionMaterializePass::new(ledger)));
        pipeline.add_pass(Box::new(DefaultMemberPass));
        pipeline.add_pass(Box::new(CrossVersionFieldAccessPass::new(layouts)));
        pipeline.add_pass(Box::new(RedirectPass));
        pipeline.add_pass(Box::new(WriterPass::new(store)));
        pipeline
    }

    /// Append a pass
    pub fn add_pass(&mut self, pass: Box<dyn TransformerPass>) {
        let pass_name = pass.name().to_string();
        let description = pass.description().to_string();
        self.stats
            .lock()
            .insert(pass_name.clone(), PassStats::new(pass_name, description));
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Run every pass in order and link the result
    pub fn run(&self, mut unit: LoadUnit) -> Result<LoadedType, PipelineError> {
        for pass in &self.passes {
            if let Some(required) = pass.requires() {
                if !unit.has(required) {
                    self.record(pass.name(), 0, 0, true);
                    warn!(
                        "Pass {} refused {}: marker {} missing",
                        pass.name(),
                        unit.identity,
                        required
                    );
                    return Err(PipelineError::Invariant {
                        pass: pass.name().to_string(),
                        missing: required,
                        identity: unit.identity.clone(),
                    });
                }
            }

            let start = Instant::now();
            let result = pass.transform(&mut unit);
            let elapsed = start.elapsed().as_millis() as u64;
            match result {
                Ok(rewrites) => {
                    self.record(pass.name(), rewrites as u64, elapsed, false);
                    unit.mark(pass.produces());
                }
                Err(e) => {
                    self.record(pass.name(), 0, elapsed, true);
                    warn!("Pass {} failed on {}: {}", pass.name(), unit.identity, e);
                    return Err(e);
                }
            }
        }
        debug!(
            "Pipeline linked {} generation {}{}",
            unit.identity,
            unit.generation,
            if unit.ephemeral { " (ephemeral)" } else { "" }
        );
        unit.finish()
    }

    fn record(&self, pass: &str, rewrites: u64, elapsed_ms: u64, failed: bool) {
        let mut stats = self.stats.lock();
        if let Some(entry) = stats.get_mut(pass) {
            entry.applications += 1;
            entry.rewrites += rewrites;
            entry.total_time_ms += elapsed_ms;
            if failed {
                entry.failures += 1;
            }
        }
    }

    /// Per-pass statistics in pipeline order
    pub fn stats(&self) -> Vec<PassStats> {
        self.stats.lock().values().cloned().collect()
    }

    pub fn clear_stats(&self) {
        for entry in self.stats.lock().values_mut() {
            *entry = PassStats::new(entry.pass_name.clone(), entry.description.clone());
        }
    }
}
