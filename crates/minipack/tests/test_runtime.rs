#![allow(clippy::disallowed_methods)]

//! Executes generated bundles with `node` when it is available.

use std::{fs, path::Path, process::Command};

use minipack::{
    config::Config,
    emitter::Destination,
    orchestrator::BundleOrchestrator,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn node_available() -> bool {
    Command::new("node")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

fn bundle_and_run(root: &Path, dedupe: bool, memoize: bool) -> String {
    let out = root.join("dist/bundle.js");
    let config = Config {
        entry: Some(root.join("index.js")),
        output: Some(out.clone()),
        dedupe,
        memoize,
        ..Config::default()
    };
    BundleOrchestrator::new(config)
        .bundle(&Destination::File(out.clone()))
        .unwrap();

    let output = Command::new("node").arg(&out).output().unwrap();
    assert!(
        output.status.success(),
        "node failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn test_bundle_runs_entry_once() {
    if !node_available() {
        return;
    }
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::create_dir_all(root.join("lib")).unwrap();
    fs::write(
        root.join("index.js"),
        "import { add } from './lib/math.js';\nimport greet from './greet.js';\n\
         globalThis.entryRuns = (globalThis.entryRuns || 0) + 1;\n\
         console.log(greet(add(1, 2)));\nconsole.log('runs=' + globalThis.entryRuns);\n",
    )
    .unwrap();
    fs::write(
        root.join("lib/math.js"),
        "export function add(a, b) {\n  return a + b;\n}\n",
    )
    .unwrap();
    fs::write(
        root.join("greet.js"),
        "import { add } from './lib/math.js';\n\
         export default function greet(n) {\n  return 'result=' + add(n, 0);\n}\n",
    )
    .unwrap();

    assert_eq!(bundle_and_run(root, false, false), "result=3\nruns=1\n");
}

#[test]
fn test_module_cache_controls_shared_evaluation() {
    if !node_available() {
        return;
    }
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(
        root.join("index.js"),
        "import './a.js';\nimport './b.js';\nconsole.log('count=' + globalThis.count);\n",
    )
    .unwrap();
    fs::write(root.join("a.js"), "import './counter.js';\n").unwrap();
    fs::write(root.join("b.js"), "import './counter.js';\n").unwrap();
    fs::write(
        root.join("counter.js"),
        "globalThis.count = (globalThis.count || 0) + 1;\n",
    )
    .unwrap();

    assert_eq!(bundle_and_run(root, false, false), "count=2\n");
    assert_eq!(bundle_and_run(root, true, true), "count=1\n");
}

#[test]
fn test_cyclic_imports_run_with_dedupe_and_cache() {
    if !node_available() {
        return;
    }
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(
        root.join("index.js"),
        "import { ping } from './ping.js';\nconsole.log(ping(3));\n",
    )
    .unwrap();
    fs::write(
        root.join("ping.js"),
        "import * as pong from './pong.js';\n\
         export function ping(n) {\n  return n === 0 ? 'done' : pong.pong(n - 1);\n}\n",
    )
    .unwrap();
    fs::write(
        root.join("pong.js"),
        "import * as ping from './ping.js';\n\
         export function pong(n) {\n  return ping.ping(n);\n}\n",
    )
    .unwrap();

    assert_eq!(bundle_and_run(root, true, true), "done\n");
}

#[test]
fn test_exported_functions_are_visible_before_their_module_finishes() {
    if !node_available() {
        return;
    }
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(
        root.join("index.js"),
        "import { f } from './a.js';\nconsole.log(f());\n",
    )
    .unwrap();
    fs::write(
        root.join("a.js"),
        "import { g } from './b.js';\nexport function f() {\n  return g;\n}\n",
    )
    .unwrap();
    fs::write(
        root.join("b.js"),
        "import * as a from './a.js';\nexport const g = typeof a.f;\n",
    )
    .unwrap();

    assert_eq!(bundle_and_run(root, true, true), "function\n");
}

#[test]
fn test_every_declarator_of_an_export_is_visible() {
    if !node_available() {
        return;
    }
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::write(
        root.join("index.js"),
        "import { a, b } from './pair.js';\nconsole.log(a + b);\n",
    )
    .unwrap();
    fs::write(root.join("pair.js"), "export const a = 1, b = 2;\n").unwrap();

    assert_eq!(bundle_and_run(root, false, false), "3\n");
}
