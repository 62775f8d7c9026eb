//! The unit graph: every file visit discovered by one build, in discovery order.
//!
//! A [`Unit`] is created by the asset loader with everything but its mapping;
//! the graph builder attaches the mapping once the unit's edges are resolved,
//! after which the unit is never mutated again.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use log::debug;
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use serde::Serialize;

use crate::types::FxIndexMap;

/// Identifier of a unit, dense in `[0, N)` and assigned in discovery order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UnitId(u32);

impl UnitId {
    /// The entry unit always receives this id
    pub const ENTRY: Self = Self(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One loaded and transformed source file, for one discovery visit
#[derive(Debug, Clone, Serialize)]
pub struct Unit {
    pub id: UnitId,
    /// Normalized absolute path the unit was loaded from
    pub path: PathBuf,
    /// Raw specifiers in declaration order; duplicates are kept
    pub dependencies: Vec<String>,
    /// Transformed source, used verbatim as a factory body
    pub code: String,
    /// Distinct specifier -> id of the unit it resolved to
    pub mapping: FxIndexMap<String, UnitId>,
}

impl Unit {
    /// The directory specifiers of this unit are resolved against
    pub fn directory(&self) -> &Path {
        crate::resolver::unit_directory(&self.path)
    }
}

/// All units discovered by one build, indexed by id
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct UnitGraph {
    units: Vec<Unit>,
}

impl UnitGraph {
    /// Build a graph from units already in discovery order
    ///
    /// Fails unless the units carry ids `0..N` in order and every mapping
    /// target exists.
    pub fn from_units(units: Vec<Unit>) -> Result<Self> {
        let graph = Self { units };
        graph.validate()?;
        Ok(graph)
    }

    pub(crate) fn from_units_unchecked(units: Vec<Unit>) -> Self {
        Self { units }
    }

    /// The entry unit, if the graph is non-empty
    pub fn entry(&self) -> Option<&Unit> {
        self.units.first()
    }

    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Unit> {
        self.units.iter()
    }

    /// Check the structural invariants of a finished graph
    pub fn validate(&self) -> Result<()> {
        for (index, unit) in self.units.iter().enumerate() {
            if unit.id.index() != index {
                return Err(anyhow!(
                    "unit {} ({}) stored at index {index}",
                    unit.id,
                    unit.path.display()
                ));
            }
            for specifier in &unit.dependencies {
                if !unit.mapping.contains_key(specifier) {
                    return Err(anyhow!(
                        "unit {} has no mapping for specifier '{specifier}'",
                        unit.id
                    ));
                }
            }
            for (specifier, target) in &unit.mapping {
                if target.index() >= self.units.len() {
                    return Err(anyhow!(
                        "unit {} maps '{specifier}' to missing unit {target}",
                        unit.id
                    ));
                }
            }
        }
        Ok(())
    }

    /// Groups of units that import each other, smallest id first
    ///
    /// Only graphs built with path deduplication can contain cycles; a unit
    /// importing itself counts as a cycle of one.
    pub fn cycles(&self) -> Vec<Vec<UnitId>> {
        let mut graph = DiGraph::<UnitId, ()>::with_capacity(self.units.len(), 0);
        let nodes: Vec<_> = self.units.iter().map(|u| graph.add_node(u.id)).collect();
        for unit in &self.units {
            for target in unit.mapping.values() {
                graph.add_edge(nodes[unit.id.index()], nodes[target.index()], ());
            }
        }

        let mut cycles: Vec<Vec<UnitId>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || graph.contains_edge(component[0], component[0])
            })
            .map(|component| {
                let mut ids: Vec<UnitId> = component.into_iter().map(|n| graph[n]).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();

        debug!("Found {} cycle(s) in unit graph", cycles.len());
        cycles
    }
}

impl<'a> IntoIterator for &'a UnitGraph {
    type Item = &'a Unit;
    type IntoIter = std::slice::Iter<'a, Unit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.iter()
    }
}
