//! The source transformer seam.
//!
//! The bundler never parses source itself. A [`SourceTransformer`] turns file
//! contents into the declared import specifiers plus code that the emitted
//! runtime can execute as a factory body `(require, module, exports)`.
//!
//! [`EsmTransformer`] is the transformer the binary ships with. It parses the
//! file as an ES module with oxc and rewrites module syntax in place:
//!
//! - every import and re-export becomes a `require` hoisted to the top of the
//!   factory, in source order
//! - references to imported bindings are rewritten to member accesses on the
//!   required module, so they stay live like ES module bindings
//! - every export is an accessor defined on `exports` before any dependency is
//!   required, so a cyclic importer already sees hoisted functions
//!
//! Everything else is copied through untouched.

use std::path::Path;

use log::trace;
use oxc_allocator::Allocator;
use oxc_ast::{
    ast::{
        CallExpression, ExportAllDeclaration, ExportDefaultDeclaration,
        ExportDefaultDeclarationKind, ExportNamedDeclaration, Expression, IdentifierReference,
        ImportDeclaration, ImportDeclarationSpecifier, ImportExpression, ObjectProperty, Program,
        Statement,
    },
};
use oxc_ast_visit::{Visit, walk};
use oxc_diagnostics::OxcDiagnostic;
use oxc_ecmascript::BoundNames;
use oxc_parser::Parser;
use oxc_semantic::{Scoping, SemanticBuilder, SymbolId};
use oxc_span::{GetSpan, SourceType, Span};
use rustc_hash::FxHashMap;

use crate::error::TransformError;

/// What a transformer produces for one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transformed {
    /// Raw specifiers in declaration order, duplicates kept
    pub dependencies: Vec<String>,
    /// Code to be used verbatim as a factory body
    pub code: String,
}

/// Turns source text into dependencies and executable code
///
/// Implementations must be shareable across the loader's worker threads.
pub trait SourceTransformer: Send + Sync {
    fn transform(&self, contents: &str, path: &Path) -> Result<Transformed, TransformError>;
}

impl<F> SourceTransformer for F
where
    F: Fn(&str, &Path) -> Result<Transformed, TransformError> + Send + Sync,
{
    fn transform(&self, contents: &str, path: &Path) -> Result<Transformed, TransformError> {
        self(contents, path)
    }
}

const ESM_MARKER: &str = "Object.defineProperty(exports, \"__esModule\", { value: true });";

/// Gives non-ES modules a `default` export equal to their whole `exports`
const INTEROP_HELPER: &str = "function __minipack_interop(value) { return value && \
                              value.__esModule ? value : { default: value }; }";

/// Local name given to an anonymous or expression default export
const DEFAULT_BINDING: &str = "__minipack_default";

/// Rewrites ES module syntax into CommonJS calls against the factory's
/// `require`/`exports` parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct EsmTransformer;

impl EsmTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl SourceTransformer for EsmTransformer {
    fn transform(&self, contents: &str, path: &Path) -> Result<Transformed, TransformError> {
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, contents, SourceType::mjs()).parse();
        if let Some(error) = parsed.errors.first() {
            return Err(parse_error(contents, error));
        }
        let program = parsed.program;
        let semantic = SemanticBuilder::new().build(&program).semantic;

        let mut rewrite = Rewrite::new(contents, semantic.scoping());
        rewrite.collect(&program)?;
        let transformed = rewrite.finish();
        trace!(
            "Transformed {} with {} dependencies",
            path.display(),
            transformed.dependencies.len()
        );
        Ok(transformed)
    }
}

fn parse_error(source: &str, error: &OxcDiagnostic) -> TransformError {
    let line = error
        .labels
        .as_ref()
        .and_then(|labels| labels.first())
        .map_or(1, |label| line_of(source, label.offset()));
    TransformError::Parse {
        line,
        message: error.message.to_string(),
    }
}

/// A replacement of `source[start..end]`; insertions have `start == end`
#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    replacement: String,
}

impl Edit {
    fn new(start: u32, end: u32, replacement: impl Into<String>) -> Self {
        Self {
            start: start as usize,
            end: end as usize,
            replacement: replacement.into(),
        }
    }
}

struct Rewrite<'s> {
    source: &'s str,
    scoping: &'s Scoping,
    edits: Vec<Edit>,
    dependencies: Vec<String>,
    /// Export accessors keyed by the offset of the statement declaring them
    getters: Vec<(u32, String)>,
    requires: Vec<String>,
    /// Imported symbol -> expression reading it from its module
    bindings: FxHashMap<SymbolId, String>,
    /// Same, by local name, for `export { name }` lists
    imported_names: FxHashMap<String, String>,
    temporaries: usize,
    interop: bool,
    has_exports: bool,
}

impl<'s> Rewrite<'s> {
    fn new(source: &'s str, scoping: &'s Scoping) -> Self {
        Self {
            source,
            scoping,
            edits: Vec::new(),
            dependencies: Vec::new(),
            getters: Vec::new(),
            requires: Vec::new(),
            bindings: FxHashMap::default(),
            imported_names: FxHashMap::default(),
            temporaries: 0,
            interop: false,
            has_exports: false,
        }
    }

    fn collect(&mut self, program: &Program<'_>) -> Result<(), TransformError> {
        if let Some(hashbang) = &program.hashbang {
            self.remove(hashbang.span);
        }

        // Dependencies first, in source order, so exports can refer to imports
        // declared further down.
        for statement in &program.body {
            match statement {
                Statement::ImportDeclaration(decl) => self.import(decl),
                Statement::ExportAllDeclaration(decl) => self.export_all(decl),
                Statement::ExportNamedDeclaration(decl) if decl.source.is_some() => {
                    self.reexport(decl);
                }
                _ => {}
            }
        }
        for statement in &program.body {
            match statement {
                Statement::ExportNamedDeclaration(decl) if decl.source.is_none() => {
                    self.export_named(decl);
                }
                Statement::ExportDefaultDeclaration(decl) => self.export_default(decl),
                _ => {}
            }
        }

        let mut references = ImportReferences {
            scoping: self.scoping,
            bindings: &self.bindings,
            edits: Vec::new(),
            dynamic_import: None,
        };
        for statement in &program.body {
            let removed = match statement {
                Statement::ImportDeclaration(_) | Statement::ExportAllDeclaration(_) => true,
                Statement::ExportNamedDeclaration(decl) => decl.declaration.is_none(),
                _ => false,
            };
            if !removed {
                references.visit_statement(statement);
            }
        }
        let ImportReferences {
            edits,
            dynamic_import,
            ..
        } = references;

        if let Some(offset) = dynamic_import {
            return Err(TransformError::Unsupported {
                line: line_of(self.source, offset as usize),
                construct: "dynamic import()".to_string(),
            });
        }
        self.edits.extend(edits);
        Ok(())
    }

    fn import(&mut self, decl: &ImportDeclaration<'_>) {
        self.remove(decl.span);
        let specifier = decl.source.value.as_str();
        let Some(specifiers) = decl.specifiers.as_ref().filter(|s| !s.is_empty()) else {
            self.requires
                .push(format!("require({});", js_string(specifier)));
            self.dependencies.push(specifier.to_string());
            return;
        };

        let namespace = specifiers.iter().find_map(|s| match s {
            ImportDeclarationSpecifier::ImportNamespaceSpecifier(ns) => Some(ns.local.name.as_str()),
            _ => None,
        });
        let interop = specifiers
            .iter()
            .any(|s| matches!(s, ImportDeclarationSpecifier::ImportDefaultSpecifier(_)));
        let module = self.require(specifier, namespace, interop);

        for spec in specifiers {
            let (local, access) = match spec {
                ImportDeclarationSpecifier::ImportSpecifier(named) => {
                    (&named.local, member(&module, &named.imported.name()))
                }
                ImportDeclarationSpecifier::ImportDefaultSpecifier(default) => {
                    (&default.local, format!("{module}.default"))
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(_) => continue,
            };
            if let Some(symbol) = local.symbol_id.get() {
                self.bindings.insert(symbol, access.clone());
            }
            self.imported_names.insert(local.name.to_string(), access);
        }
    }

    fn export_all(&mut self, decl: &ExportAllDeclaration<'_>) {
        self.has_exports = true;
        self.remove(decl.span);
        let module = self.require(decl.source.value.as_str(), None, false);
        match &decl.exported {
            Some(name) => self.getter(decl.span.start, &name.name(), module),
            None => self.requires.push(format!(
                "Object.keys({module}).forEach(function (key) {{ if (key === \"default\" || key \
                 === \"__esModule\" || Object.prototype.hasOwnProperty.call(exports, key)) \
                 return; Object.defineProperty(exports, key, {{ enumerable: true, get: function \
                 () {{ return {module}[key]; }} }}); }});"
            )),
        }
    }

    fn reexport(&mut self, decl: &ExportNamedDeclaration<'_>) {
        let Some(source) = &decl.source else {
            return;
        };
        self.has_exports = true;
        self.remove(decl.span);
        let module = self.require(source.value.as_str(), None, false);
        for specifier in &decl.specifiers {
            let value = member(&module, &specifier.local.name());
            self.getter(decl.span.start, &specifier.exported.name(), value);
        }
    }

    fn export_named(&mut self, decl: &ExportNamedDeclaration<'_>) {
        self.has_exports = true;
        if let Some(declaration) = &decl.declaration {
            self.edits
                .push(Edit::new(decl.span.start, declaration.span().start, ""));
            let mut names = Vec::new();
            declaration.bound_names(&mut |ident| names.push(ident.name.to_string()));
            for name in names {
                self.getter(decl.span.start, &name, name.clone());
            }
            return;
        }

        self.remove(decl.span);
        for specifier in &decl.specifiers {
            let local = specifier.local.name();
            let value = self
                .imported_names
                .get(local.as_str())
                .cloned()
                .unwrap_or_else(|| local.to_string());
            self.getter(decl.span.start, &specifier.exported.name(), value);
        }
    }

    fn export_default(&mut self, decl: &ExportDefaultDeclaration<'_>) {
        self.has_exports = true;
        let start = decl.span.start;
        match &decl.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(function) => {
                self.edits.push(Edit::new(start, function.span.start, ""));
                let name = match &function.id {
                    Some(id) => id.name.to_string(),
                    None => {
                        self.name_anonymous_function(function.params.span.start);
                        DEFAULT_BINDING.to_string()
                    }
                };
                self.getter(start, "default", name);
            }
            ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    self.edits.push(Edit::new(start, class.span.start, ""));
                    self.getter(start, "default", id.name.to_string());
                } else {
                    self.edits.push(Edit::new(
                        start,
                        class.span.start,
                        format!("const {DEFAULT_BINDING} = "),
                    ));
                    self.edits.push(Edit::new(class.span.end, class.span.end, ";"));
                    self.getter(start, "default", DEFAULT_BINDING.to_string());
                }
            }
            kind => match kind.as_expression() {
                Some(expression) => {
                    let span = expression.span();
                    self.edits.push(Edit::new(
                        start,
                        span.start,
                        format!("const {DEFAULT_BINDING} = "),
                    ));
                    if !self.source[..decl.span.end as usize].ends_with(';') {
                        self.edits.push(Edit::new(span.end, span.end, ";"));
                    }
                    self.getter(start, "default", DEFAULT_BINDING.to_string());
                }
                None => self.remove(decl.span),
            },
        }
    }

    /// `function (` becomes `function __minipack_default(`
    fn name_anonymous_function(&mut self, params_start: u32) {
        let spaced = self.source[..params_start as usize]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        let name = if spaced {
            DEFAULT_BINDING.to_string()
        } else {
            format!(" {DEFAULT_BINDING}")
        };
        self.edits.push(Edit::new(params_start, params_start, name));
    }

    /// Record a dependency and hoist its `require`, returning the binding the
    /// module is stored in
    fn require(&mut self, specifier: &str, binding: Option<&str>, interop: bool) -> String {
        self.dependencies.push(specifier.to_string());
        let module = binding.map_or_else(|| self.temporary(), str::to_string);
        let require = format!("require({})", js_string(specifier));
        if interop {
            self.interop = true;
            self.requires
                .push(format!("var {module} = __minipack_interop({require});"));
        } else {
            self.requires.push(format!("var {module} = {require};"));
        }
        module
    }

    fn getter(&mut self, offset: u32, name: &str, value: String) {
        self.getters.push((
            offset,
            format!(
                "Object.defineProperty(exports, {}, {{ enumerable: true, get: function () {{ \
                 return {value}; }} }});",
                js_string(name)
            ),
        ));
    }

    fn temporary(&mut self) -> String {
        let name = format!("__minipack_import_{}", self.temporaries);
        self.temporaries += 1;
        name
    }

    fn remove(&mut self, span: Span) {
        self.edits.push(Edit::new(span.start, span.end, ""));
    }

    fn finish(mut self) -> Transformed {
        let mut code = String::with_capacity(self.source.len() + 256);
        code.push_str("\"use strict\";\n");
        if self.has_exports {
            code.push_str(ESM_MARKER);
            code.push('\n');
        }
        self.getters.sort_by_key(|(offset, _)| *offset);
        for (_, getter) in &self.getters {
            code.push_str(getter);
            code.push('\n');
        }
        for require in &self.requires {
            code.push_str(require);
            code.push('\n');
        }
        if self.interop {
            code.push_str(INTEROP_HELPER);
            code.push('\n');
        }

        self.edits.sort_by_key(|edit| (edit.start, edit.end));
        let mut cursor = 0;
        for edit in &self.edits {
            if edit.start < cursor {
                continue;
            }
            code.push_str(&self.source[cursor..edit.start]);
            code.push_str(&edit.replacement);
            cursor = edit.end;
        }
        code.push_str(&self.source[cursor..]);

        Transformed {
            dependencies: self.dependencies,
            code,
        }
    }
}

/// Rewrites references to imported bindings and spots dynamic imports
struct ImportReferences<'r> {
    scoping: &'r Scoping,
    bindings: &'r FxHashMap<SymbolId, String>,
    edits: Vec<Edit>,
    dynamic_import: Option<u32>,
}

impl ImportReferences<'_> {
    fn replacement(&self, ident: &IdentifierReference<'_>) -> Option<String> {
        let reference = ident.reference_id.get()?;
        let symbol = self.scoping.get_reference(reference).symbol_id()?;
        self.bindings.get(&symbol).cloned()
    }
}

impl<'a> Visit<'a> for ImportReferences<'_> {
    fn visit_identifier_reference(&mut self, it: &IdentifierReference<'a>) {
        if let Some(replacement) = self.replacement(it) {
            self.edits
                .push(Edit::new(it.span.start, it.span.end, replacement));
        }
    }

    fn visit_object_property(&mut self, it: &ObjectProperty<'a>) {
        if it.shorthand
            && let Expression::Identifier(ident) = &it.value
            && let Some(replacement) = self.replacement(ident)
        {
            self.edits.push(Edit::new(
                it.span.start,
                it.span.end,
                format!("{}: {replacement}", ident.name),
            ));
            return;
        }
        walk::walk_object_property(self, it);
    }

    // Imported functions are called without their module as `this`
    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if let Expression::Identifier(ident) = &it.callee
            && let Some(replacement) = self.replacement(ident)
        {
            self.edits.push(Edit::new(
                ident.span.start,
                ident.span.end,
                format!("(0, {replacement})"),
            ));
            for argument in &it.arguments {
                self.visit_argument(argument);
            }
            return;
        }
        walk::walk_call_expression(self, it);
    }

    fn visit_import_expression(&mut self, it: &ImportExpression<'a>) {
        self.dynamic_import.get_or_insert(it.span.start);
        walk::walk_import_expression(self, it);
    }
}

/// `object.name`, or `object["name"]` when `name` is not an identifier
fn member(object: &str, name: &str) -> String {
    if is_identifier(name) {
        format!("{object}.{name}")
    } else {
        format!("{object}[{}]", js_string(name))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())].matches('\n').count() + 1
}
