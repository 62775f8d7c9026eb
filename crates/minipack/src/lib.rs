//! minipack: bundles a relative-import module graph into one self-contained
//! program with an embedded `require` runtime.

pub mod asset_loader;
pub mod code_generator;
pub mod config;
pub mod emitter;
pub mod error;
pub mod graph_builder;
pub mod orchestrator;
pub mod resolver;
pub mod transformer;
pub mod types;
pub mod unit_graph;
