//! Breadth-first discovery of the unit graph.
//!
//! Starting from the entry, every declared specifier of every queued unit is
//! resolved against the unit's directory and loaded as a child. Children are
//! appended to the same worklist that is being drained, so units come out in
//! breadth-first discovery order with the entry at index 0.
//!
//! The worklist is drained one breadth-first level at a time. The loads a
//! level needs are independent of each other and run on a rayon pool; ids are
//! handed out afterwards by this coordinator in edge order, which keeps the
//! output identical for any number of workers.

use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use log::{debug, info, trace};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    asset_loader::{AssetLoader, IdAllocator, LoadedSource},
    error::{BundleError, Result},
    resolver,
    transformer::SourceTransformer,
    unit_graph::{Unit, UnitGraph, UnitId},
};

/// Default cap on the number of units one build may create
pub const DEFAULT_MAX_UNITS: usize = 10_000;

/// Whether revisiting a path creates a new unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupePolicy {
    /// Every import edge loads a fresh unit. An import chain that leads back to
    /// one of its own files is rejected as a cycle.
    #[default]
    Off,
    /// A path is loaded once; later edges to it reuse its id. Cycles are
    /// allowed and show up as mappings pointing back at earlier units.
    ByPath,
}

/// Knobs for one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub dedupe: DedupePolicy,
    /// Abort once the graph would exceed this many units; `None` is unlimited
    pub max_units: Option<usize>,
    /// Worker threads for loads; `None` uses the global rayon pool
    pub jobs: Option<usize>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            dedupe: DedupePolicy::Off,
            max_units: Some(DEFAULT_MAX_UNITS),
            jobs: None,
        }
    }
}

/// Where an edge points once its level has been loaded
#[derive(Debug, Clone, Copy)]
enum Target {
    /// A unit that already has an id
    Existing(UnitId),
    /// The n-th load scheduled for the current level
    Scheduled(usize),
}

#[derive(Debug)]
struct Edge {
    from: usize,
    specifier: String,
    target: Target,
}

/// Builds the [`UnitGraph`] reachable from an entry file
pub struct GraphBuilder<'a> {
    transformer: &'a dyn SourceTransformer,
    options: BuildOptions,
}

impl std::fmt::Debug for GraphBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Mutable state of one traversal; dropped with the build
struct Traversal<'l> {
    loader: AssetLoader<'l>,
    units: Vec<Unit>,
    /// Index of the unit whose edge discovered each unit
    parents: Vec<Option<usize>>,
    /// Path -> id, only maintained under [`DedupePolicy::ByPath`]
    visited: FxHashMap<PathBuf, UnitId>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(transformer: &'a dyn SourceTransformer, options: BuildOptions) -> Self {
        Self {
            transformer,
            options,
        }
    }

    /// Discover every unit reachable from `entry`
    ///
    /// Fails fast: the first load, cycle or budget failure discards
    /// everything discovered so far.
    pub fn build(&self, entry: &Path) -> Result<UnitGraph> {
        let entry_path = resolver::entry_path(entry).map_err(|source| BundleError::Io {
            path: entry.to_path_buf(),
            source,
        })?;
        let pool = self.thread_pool()?;

        let ids = IdAllocator::new();
        let loader = AssetLoader::new(self.transformer, &ids);
        let entry_unit = loader.load(&entry_path)?;

        let mut traversal = Traversal {
            loader,
            units: Vec::new(),
            parents: Vec::new(),
            visited: FxHashMap::default(),
        };
        if self.options.dedupe == DedupePolicy::ByPath {
            traversal
                .visited
                .insert(entry_unit.path.clone(), entry_unit.id);
        }
        traversal.units.push(entry_unit);
        traversal.parents.push(None);

        let mut level = 0..1;
        let mut depth = 0;
        while !level.is_empty() {
            debug!("Processing level {depth} with {} unit(s)", level.len());
            level = self.process_level(&mut traversal, level, pool.as_ref())?;
            depth += 1;
        }

        info!(
            "Discovered {} unit(s) from {} ({depth} level(s))",
            traversal.units.len(),
            entry_path.display()
        );
        Ok(UnitGraph::from_units_unchecked(traversal.units))
    }

    /// Resolve, load and attach the children of the units in `level`,
    /// returning the range of newly created units
    fn process_level(
        &self,
        traversal: &mut Traversal<'_>,
        level: Range<usize>,
        pool: Option<&rayon::ThreadPool>,
    ) -> Result<Range<usize>> {
        let mut edges = Vec::new();
        let mut scheduled: Vec<PathBuf> = Vec::new();
        let mut scheduled_parents: Vec<usize> = Vec::new();
        let mut pending: FxHashMap<PathBuf, usize> = FxHashMap::default();

        for index in level {
            let unit = &traversal.units[index];
            let directory = unit.directory();
            for specifier in &unit.dependencies {
                let path = resolver::resolve(directory, specifier);
                let target = match self.options.dedupe {
                    DedupePolicy::ByPath => {
                        if let Some(&id) = traversal.visited.get(&path) {
                            Target::Existing(id)
                        } else if let Some(&slot) = pending.get(&path) {
                            Target::Scheduled(slot)
                        } else {
                            pending.insert(path.clone(), scheduled.len());
                            self.schedule(traversal, &mut scheduled, path)?;
                            scheduled_parents.push(index);
                            Target::Scheduled(scheduled.len() - 1)
                        }
                    }
                    DedupePolicy::Off => {
                        check_cycle(traversal, index, &path)?;
                        self.schedule(traversal, &mut scheduled, path)?;
                        scheduled_parents.push(index);
                        Target::Scheduled(scheduled.len() - 1)
                    }
                };
                trace!("Unit {} '{specifier}' -> {target:?}", unit.id);
                edges.push(Edge {
                    from: index,
                    specifier: specifier.clone(),
                    target,
                });
            }
        }

        let loaded = load_all(&traversal.loader, pool, self.sequential(), &scheduled)?;

        let first_new = traversal.units.len();
        for (source, parent) in loaded.into_iter().zip(scheduled_parents) {
            let unit = traversal.loader.assign_id(source);
            if self.options.dedupe == DedupePolicy::ByPath {
                traversal.visited.insert(unit.path.clone(), unit.id);
            }
            traversal.units.push(unit);
            traversal.parents.push(Some(parent));
        }

        for edge in edges {
            let id = match edge.target {
                Target::Existing(id) => id,
                Target::Scheduled(slot) => traversal.units[first_new + slot].id,
            };
            traversal.units[edge.from].mapping.insert(edge.specifier, id);
        }

        Ok(first_new..traversal.units.len())
    }

    /// Queue a load, enforcing the unit budget before the graph grows
    fn schedule(
        &self,
        traversal: &Traversal<'_>,
        scheduled: &mut Vec<PathBuf>,
        path: PathBuf,
    ) -> Result<()> {
        if let Some(limit) = self.options.max_units
            && traversal.units.len() + scheduled.len() >= limit
        {
            return Err(BundleError::UnitBudgetExceeded { limit, path });
        }
        scheduled.push(path);
        Ok(())
    }

    fn thread_pool(&self) -> Result<Option<rayon::ThreadPool>> {
        match self.options.jobs {
            Some(jobs) if jobs > 1 => rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .map(Some)
                .map_err(|e| BundleError::ThreadPool {
                    message: e.to_string(),
                }),
            _ => Ok(None),
        }
    }

    fn sequential(&self) -> bool {
        self.options.jobs == Some(1)
    }
}

/// Reject a load of `path` from the unit at `index` if `path` already occurs
/// in that unit's chain of importers
fn check_cycle(traversal: &Traversal<'_>, index: usize, path: &Path) -> Result<()> {
    let mut chain = Vec::new();
    let mut cursor = Some(index);
    while let Some(current) = cursor {
        chain.push(traversal.units[current].path.clone());
        cursor = traversal.parents[current];
    }
    if chain.iter().any(|ancestor| ancestor == path) {
        chain.reverse();
        chain.push(path.to_path_buf());
        return Err(BundleError::Cycle { chain });
    }
    Ok(())
}

/// Read and transform every scheduled path, preserving order
///
/// Stops at the first failure; loads not yet started are skipped. With a
/// single job the loads run in order on the calling thread, so the reported
/// failure is always the first one in discovery order.
fn load_all(
    loader: &AssetLoader<'_>,
    pool: Option<&rayon::ThreadPool>,
    sequential: bool,
    paths: &[PathBuf],
) -> Result<Vec<LoadedSource>> {
    let load = |path: &PathBuf| loader.read_source(path);
    if sequential {
        return paths.iter().map(load).collect();
    }
    match pool {
        Some(pool) => pool.install(|| paths.par_iter().map(load).collect()),
        None => paths.par_iter().map(load).collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::transformer::EsmTransformer;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    fn build(entry: &Path, options: BuildOptions) -> Result<UnitGraph> {
        GraphBuilder::new(&EsmTransformer, options).build(entry)
    }

    #[test]
    fn test_single_entry_without_dependencies() {
        let dir = TempDir::new().unwrap();
        let entry = write(&dir, "index.js", "console.log('hi');\n");

        let graph = build(&entry, BuildOptions::default()).unwrap();
        assert_eq!(graph.len(), 1);
        let unit = graph.entry().unwrap();
        assert_eq!(unit.id, UnitId::ENTRY);
        assert!(unit.path.is_absolute());
        assert!(unit.mapping.is_empty());
    }

    #[test]
    fn test_breadth_first_order() {
        let dir = TempDir::new().unwrap();
        let entry = write(&dir, "index.js", "import './a.js';\nimport './b.js';\n");
        write(&dir, "a.js", "import './deep.js';\n");
        write(&dir, "b.js", "");
        write(&dir, "deep.js", "");

        let graph = build(&entry, BuildOptions::default()).unwrap();
        let names: Vec<_> = graph
            .iter()
            .map(|u| u.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["index.js", "a.js", "b.js", "deep.js"]);
        graph.validate().unwrap();
    }

    #[test]
    fn test_specifiers_resolve_against_importing_unit() {
        let dir = TempDir::new().unwrap();
        let entry = write(&dir, "index.js", "import './lib/util.js';\n");
        write(&dir, "lib/util.js", "import '../shared.js';\n");
        write(&dir, "shared.js", "");

        let graph = build(&entry, BuildOptions::default()).unwrap();
        assert_eq!(graph.len(), 3);
        assert!(graph.get(UnitId::new(2)).unwrap().path.ends_with("shared.js"));
        assert!(
            !graph
                .get(UnitId::new(2))
                .unwrap()
                .path
                .to_string_lossy()
                .contains("..")
        );
    }

    #[test]
    fn test_duplicate_specifier_keeps_last_loaded_id() {
        let dir = TempDir::new().unwrap();
        let entry = write(&dir, "index.js", "import './a.js';\nimport './a.js';\n");
        write(&dir, "a.js", "");

        let graph = build(&entry, BuildOptions::default()).unwrap();
        assert_eq!(graph.len(), 3);
        let entry = graph.entry().unwrap();
        assert_eq!(entry.mapping.len(), 1);
        assert_eq!(entry.mapping["./a.js"], UnitId::new(2));
    }

    #[test]
    fn test_self_import_is_a_cycle_without_dedupe() {
        let dir = TempDir::new().unwrap();
        let entry = write(&dir, "index.js", "import './index.js';\n");

        let chain = match build(&entry, BuildOptions::default()) {
            Err(BundleError::Cycle { chain }) => chain,
            other => panic!("expected a cycle error, got {other:?}"),
        };
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0], chain[1]);
    }

    #[test]
    fn test_unit_budget_is_enforced() {
        let dir = TempDir::new().unwrap();
        let entry = write(&dir, "index.js", "import './a.js';\nimport './b.js';\n");
        write(&dir, "a.js", "");
        write(&dir, "b.js", "");

        let options = BuildOptions {
            max_units: Some(2),
            ..BuildOptions::default()
        };
        let err = build(&entry, options).unwrap_err();
        assert!(matches!(err, BundleError::UnitBudgetExceeded { limit: 2, .. }));

        let unlimited = BuildOptions {
            max_units: None,
            ..BuildOptions::default()
        };
        assert_eq!(build(&entry, unlimited).unwrap().len(), 3);
    }

    #[test]
    fn test_dedupe_reuses_ids_within_a_level() {
        let dir = TempDir::new().unwrap();
        let entry = write(&dir, "index.js", "import './a.js';\nimport './b.js';\n");
        write(&dir, "a.js", "import './shared.js';\n");
        write(&dir, "b.js", "import './shared.js';\n");
        write(&dir, "shared.js", "");

        let options = BuildOptions {
            dedupe: DedupePolicy::ByPath,
            ..BuildOptions::default()
        };
        let graph = build(&entry, options).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.get(UnitId::new(1)).unwrap().mapping["./shared.js"], UnitId::new(3));
        assert_eq!(graph.get(UnitId::new(2)).unwrap().mapping["./shared.js"], UnitId::new(3));
    }

    #[test]
    fn test_parallel_load_failure_aborts_build() {
        let dir = TempDir::new().unwrap();
        let mut index = String::new();
        for i in 0..16 {
            index.push_str(&format!("import './m{i}.js';\n"));
            if i != 11 {
                write(&dir, &format!("m{i}.js"), "import './leaf.js';\n");
            }
        }
        write(&dir, "leaf.js", "");
        let entry = write(&dir, "index.js", &index);

        for jobs in [Some(4), None] {
            let options = BuildOptions {
                jobs,
                ..BuildOptions::default()
            };
            match build(&entry, options) {
                Err(BundleError::Io { path, .. }) => assert!(path.ends_with("m11.js")),
                other => panic!("expected an io error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_job_count_does_not_change_ids() {
        let dir = TempDir::new().unwrap();
        let mut index = String::new();
        for i in 0..12 {
            index.push_str(&format!("import './m{i}.js';\n"));
            write(&dir, &format!("m{i}.js"), "import './leaf.js';\n");
        }
        write(&dir, "leaf.js", "");
        let entry = write(&dir, "index.js", &index);

        let paths = |jobs| {
            let options = BuildOptions {
                jobs,
                ..BuildOptions::default()
            };
            build(&entry, options)
                .unwrap()
                .iter()
                .map(|u| (u.id, u.path.clone()))
                .collect::<Vec<_>>()
        };
        let sequential = paths(Some(1));
        assert_eq!(sequential.len(), 25);
        assert_eq!(paths(Some(4)), sequential);
        assert_eq!(paths(None), sequential);
    }
}
