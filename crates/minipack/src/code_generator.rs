//! Emitting the bundle program for a [`UnitGraph`].
//!
//! The output is an immediately-invoked function receiving a registry literal
//! `{ id: [factory, mapping] }`. Its runtime defines `require(id)`, which runs
//! a unit's factory with a scoped `require` resolving specifiers through the
//! unit's mapping. The only top-level effect is `require(0)`.
//!
//! Generation is a pure function of the graph and the options.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    resolver,
    types::FxIndexMap,
    unit_graph::{UnitGraph, UnitId},
};

/// Whether the emitted runtime caches module instances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleCache {
    /// Every `require(id)` re-runs the factory with a fresh `exports`
    #[default]
    Off,
    /// The first `require(id)` caches the module record; later calls, including
    /// calls made while the factory is still running, return its exports
    Singleton,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodegenOptions {
    pub module_cache: ModuleCache,
    /// Emitted before the program, one `//` comment per line
    pub banner: Option<String>,
}

/// Produce the bundle program text
pub fn generate(graph: &UnitGraph, options: &CodegenOptions) -> String {
    if options.module_cache == ModuleCache::Off {
        let cycles = graph.cycles();
        if !cycles.is_empty() {
            warn!(
                "Unit graph contains {} import cycle(s) but the module cache is off; the bundle \
                 will recurse without bound when it reaches one",
                cycles.len()
            );
        }
    }

    let base = graph
        .entry()
        .map(|entry| entry.directory().to_path_buf())
        .unwrap_or_default();

    let mut out = String::new();
    if let Some(banner) = &options.banner {
        for line in banner.lines() {
            if line.is_empty() {
                out.push_str("//\n");
            } else {
                out.push_str(&format!("// {line}\n"));
            }
        }
    }

    out.push_str("(function (modules) {\n");
    out.push_str(&runtime(options.module_cache));
    out.push_str("  require(0);\n");
    out.push_str("})({\n");

    let count = graph.len();
    for (position, unit) in graph.iter().enumerate() {
        out.push_str(&format!(
            "  // {}\n",
            resolver::display_relative(&unit.path, &base)
        ));
        out.push_str(&format!("  {}: [\n", unit.id));
        out.push_str("    function (require, module, exports) {\n");
        out.push_str(&unit.code);
        if !unit.code.is_empty() && !unit.code.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("    },\n");
        out.push_str(&format!("    {}\n", mapping_literal(&unit.mapping)));
        out.push_str(if position + 1 < count { "  ],\n" } else { "  ]\n" });
    }
    out.push_str("});\n");

    debug!("Generated bundle with {count} unit(s), {} bytes", out.len());
    out
}

/// The `require` implementation placed at the top of the program
fn runtime(cache: ModuleCache) -> String {
    let singleton = cache == ModuleCache::Singleton;
    let mut lines: Vec<&str> = Vec::new();
    if singleton {
        lines.push("  var cache = {};");
    }
    lines.push("  function require(id) {");
    if singleton {
        lines.extend([
            "    if (Object.prototype.hasOwnProperty.call(cache, id)) {",
            "      return cache[id].exports;",
            "    }",
        ]);
    }
    lines.extend([
        "    var factory = modules[id][0];",
        "    var mapping = modules[id][1];",
        "    function localRequire(specifier) {",
        "      if (!Object.prototype.hasOwnProperty.call(mapping, specifier)) {",
        "        throw new Error(\"Cannot find module '\" + specifier + \"' from unit \" + id);",
        "      }",
        "      return require(mapping[specifier]);",
        "    }",
        "    var module = { exports: {} };",
    ]);
    if singleton {
        lines.push("    cache[id] = module;");
    }
    lines.extend([
        "    factory(localRequire, module, module.exports);",
        "    return module.exports;",
        "  }",
    ]);

    let mut runtime = lines.join("\n");
    runtime.push('\n');
    runtime
}

/// JSON object literal of a unit's mapping, in first-seen specifier order
fn mapping_literal(mapping: &FxIndexMap<String, UnitId>) -> String {
    let entries: Vec<String> = mapping
        .iter()
        .map(|(specifier, id)| format!("{}:{id}", serde_json::Value::from(specifier.as_str())))
        .collect();
    format!("{{{}}}", entries.join(","))
}
