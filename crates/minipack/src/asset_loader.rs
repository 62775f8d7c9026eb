//! Loading one file into a [`Unit`].
//!
//! The loader reads the file, hands it to the source transformer and stamps
//! the result with the next id of the build. It never memoizes: loading the
//! same path twice yields two units with two ids.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
};

use log::debug;

use crate::{
    error::{BundleError, Result},
    transformer::SourceTransformer,
    types::FxIndexMap,
    unit_graph::{Unit, UnitId},
};

/// Monotonic id source scoped to a single build
///
/// Safe to share between loader threads; ids stay unique whatever the
/// interleaving. Dropped together with the build that created it.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next id
    pub fn next_id(&self) -> UnitId {
        UnitId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// A file that has been read and transformed but not yet given an id
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub path: PathBuf,
    pub dependencies: Vec<String>,
    pub code: String,
}

/// Turns file paths into units through a [`SourceTransformer`]
pub struct AssetLoader<'a> {
    transformer: &'a dyn SourceTransformer,
    ids: &'a IdAllocator,
}

impl std::fmt::Debug for AssetLoader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetLoader")
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

impl<'a> AssetLoader<'a> {
    pub fn new(transformer: &'a dyn SourceTransformer, ids: &'a IdAllocator) -> Self {
        Self { transformer, ids }
    }

    /// Load `path` as a fresh unit with the next id and an empty mapping
    pub fn load(&self, path: &Path) -> Result<Unit> {
        let source = self.read_source(path)?;
        Ok(self.assign_id(source))
    }

    /// Read and transform `path` without assigning an id
    ///
    /// Touches no shared state besides the transformer, so calls for
    /// different paths can run concurrently.
    pub fn read_source(&self, path: &Path) -> Result<LoadedSource> {
        let contents = fs::read_to_string(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let transformed =
            self.transformer
                .transform(&contents, path)
                .map_err(|source| BundleError::Transform {
                    path: path.to_path_buf(),
                    source,
                })?;

        Ok(LoadedSource {
            path: path.to_path_buf(),
            dependencies: transformed.dependencies,
            code: transformed.code,
        })
    }

    /// Stamp a loaded source with the next id of the build
    pub fn assign_id(&self, source: LoadedSource) -> Unit {
        let id = self.ids.next_id();
        debug!(
            "Loaded unit {id}: {} ({} dependencies)",
            source.path.display(),
            source.dependencies.len()
        );
        Unit {
            id,
            path: source.path,
            dependencies: source.dependencies,
            code: source.code,
            mapping: FxIndexMap::default(),
        }
    }
}
