//! Shared collection aliases.

use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

/// Insertion-ordered map with the Fx hasher; used wherever iteration order
/// ends up in the generated output
pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;
