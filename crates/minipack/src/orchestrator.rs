//! Bundle orchestration: graph discovery, code generation and emission for
//! one configured run.

use std::{fs, path::Path, time::Instant};

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use crate::{
    code_generator,
    config::Config,
    emitter::{self, Destination},
    graph_builder::{DedupePolicy, GraphBuilder},
    transformer::{EsmTransformer, SourceTransformer},
    unit_graph::UnitGraph,
};

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub graph: UnitGraph,
    /// Size of the emitted program
    pub bytes: usize,
}

/// Drives a complete bundle run from a [`Config`]
pub struct BundleOrchestrator {
    config: Config,
    transformer: Box<dyn SourceTransformer>,
}

impl std::fmt::Debug for BundleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BundleOrchestrator {
    /// Orchestrator using the bundled ES module transformer
    pub fn new(config: Config) -> Self {
        Self::with_transformer(config, Box::new(EsmTransformer::new()))
    }

    pub fn with_transformer(config: Config, transformer: Box<dyn SourceTransformer>) -> Self {
        Self {
            config,
            transformer,
        }
    }

    /// Discover the unit graph of the configured entry
    pub fn build_graph(&self) -> Result<UnitGraph> {
        let entry = self
            .config
            .entry
            .as_deref()
            .ok_or_else(|| anyhow!("No entry file specified"))?;
        let options = self.config.build_options();
        if options.dedupe == DedupePolicy::ByPath && !self.config.memoize {
            warn!("Path deduplication without the module cache re-runs shared units on every require");
        }

        let start = Instant::now();
        let graph = GraphBuilder::new(&*self.transformer, options)
            .build(entry)
            .with_context(|| format!("Failed to bundle {}", entry.display()))?;
        info!(
            "Built graph of {} unit(s) in {:.2?}",
            graph.len(),
            start.elapsed()
        );
        Ok(graph)
    }

    /// Build and generate without writing anything
    pub fn bundle_to_string(&self) -> Result<(UnitGraph, String)> {
        let graph = self.build_graph()?;
        let text = code_generator::generate(&graph, &self.config.codegen_options());
        Ok((graph, text))
    }

    /// Build, generate and emit; the destination is only touched once the
    /// whole program has been generated
    pub fn bundle(&self, destination: &Destination) -> Result<BundleSummary> {
        let (graph, text) = self.bundle_to_string()?;
        emitter::emit(&text, destination)?;
        Ok(BundleSummary {
            graph,
            bytes: text.len(),
        })
    }

    /// The configured output file, if any
    pub fn destination(&self) -> Option<Destination> {
        self.config.output.clone().map(Destination::File)
    }
}

/// Dump the graph as pretty JSON for inspection
pub fn write_graph(graph: &UnitGraph, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(graph).context("Failed to serialize unit graph")?;
    fs::write(path, json).with_context(|| format!("Failed to write graph to {}", path.display()))
}
