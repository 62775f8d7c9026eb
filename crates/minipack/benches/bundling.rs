use std::{fs, hint::black_box, path::Path};

use criterion::{Criterion, criterion_group, criterion_main};
use minipack::{
    code_generator::{self, CodegenOptions},
    graph_builder::{BuildOptions, DedupePolicy, GraphBuilder},
    transformer::EsmTransformer,
};
use tempfile::TempDir;

/// A layered tree where every module imports the two modules of the next layer
fn write_tree(root: &Path, depth: usize) {
    for layer in 0..depth {
        for slot in 0..2 {
            let imports = if layer + 1 < depth {
                format!(
                    "import {{ value as left }} from './m{next}_0.js';\n\
                     import {{ value as right }} from './m{next}_1.js';\n\
                     export const value = left + right + {slot};\n",
                    next = layer + 1
                )
            } else {
                format!("export const value = {slot};\n")
            };
            fs::write(root.join(format!("m{layer}_{slot}.js")), imports)
                .expect("Failed to write bench module");
        }
    }
    fs::write(
        root.join("index.js"),
        "import { value } from './m0_0.js';\nconsole.log(value);\n",
    )
    .expect("Failed to write bench entry");
}

fn bench_bundling(c: &mut Criterion) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_tree(temp_dir.path(), 8);
    let entry = temp_dir.path().join("index.js");

    let mut group = c.benchmark_group("bundling");
    group.sample_size(20);

    for (name, dedupe) in [("fresh_units", DedupePolicy::Off), ("dedupe", DedupePolicy::ByPath)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let options = BuildOptions {
                    dedupe,
                    ..BuildOptions::default()
                };
                let graph = GraphBuilder::new(&EsmTransformer, options)
                    .build(black_box(&entry))
                    .expect("Failed to build graph");
                code_generator::generate(&graph, &CodegenOptions::default())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_bundling);
criterion_main!(benches);
