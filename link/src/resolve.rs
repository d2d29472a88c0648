//! Per-module import resolution.
//!
//! After parsing, each module's tree imports are flattened and every leaf is
//! bound to an export somewhere in the registry. The result is the module's
//! [`ResolveMap`]: the table consulted whenever a name used in that module
//! is not declared locally.

use indexmap::IndexMap;

use std::rc::Rc;

use crate::import_tree::FlatImport;
use crate::module::{GeneratorModule, Module, TextModule};
use crate::registry::Registry;

/// A resolved export target.
#[derive(Debug, Clone)]
pub enum ModuleExport {
    /// An exported declaration of a text module.
    Text {
        /// The exporting module.
        module: Rc<TextModule>,
        /// Index into the module's export table.
        export: usize,
    },
    /// An export backed by a generator function.
    Gen {
        /// The exporting module.
        module: Rc<GeneratorModule>,
        /// Index into the module's export table.
        export: usize,
    },
}

impl ModuleExport {
    /// Canonical path of the exporting module.
    #[must_use]
    pub fn module_name(&self) -> &str {
        match self {
            ModuleExport::Text { module, .. } => &module.name,
            ModuleExport::Gen { module, .. } => &module.name,
        }
    }

    /// The export's type parameter names.
    #[must_use]
    pub fn params(&self) -> &[String] {
        match self {
            ModuleExport::Text { module, export } => &module.exports[*export].params,
            ModuleExport::Gen { module, export } => &module.exports[*export].params,
        }
    }
}

/// One bound import leaf.
#[derive(Debug, Clone)]
pub struct ResolvedImport {
    /// Where the name leads.
    pub target: ModuleExport,
    /// Instantiation arguments from the import site.
    pub args: Option<Vec<String>>,
}

/// Everything a module imports, keyed by the name used locally.
#[derive(Debug, Default)]
pub struct ResolveMap {
    /// Leaf (or `as` alias) name → resolved export.
    pub imports: IndexMap<String, ResolvedImport>,
    /// `(import segments, export segments)` pairs, for diagnostics.
    pub pairs: Vec<(Vec<String>, Vec<String>)>,
}

impl ResolveMap {
    /// Build the map for `module`. Unresolvable leaves are reported and
    /// contribute nothing.
    #[must_use]
    pub fn build(module: &TextModule, registry: &Registry) -> Self {
        let mut map = Self::default();
        for &import_idx in &module.imports {
            let crate::elem::Elem::TreeImport(import) = &module.elems[import_idx] else {
                continue;
            };
            for flat in import.tree.flatten() {
                if flat.exp_segments.last().is_some_and(|leaf| leaf == "*") {
                    module.report_at("wildcard imports are not supported", import.span.0);
                    continue;
                }
                match resolve_flat(&flat, registry) {
                    Some(resolved) => {
                        map.pairs
                            .push((vec![flat.imp_name.clone()], flat.exp_segments.clone()));
                        map.imports.insert(flat.imp_name, resolved);
                    }
                    None => module.report_at(
                        &format!(
                            "export not found for import {} in module {}",
                            flat.exp_segments.join("::"),
                            module.name,
                        ),
                        import.span.0,
                    ),
                }
            }
        }
        map
    }
}

fn resolve_flat(flat: &FlatImport, registry: &Registry) -> Option<ResolvedImport> {
    let (leaf, path) = flat.exp_segments.split_last()?;
    let target = if path.is_empty() {
        // `import foo;` — search every module for a matching export.
        registry
            .modules()
            .iter()
            .find(|module| export_of(module, leaf).is_some())
            .cloned()?
    } else {
        registry.module_by_path(path)?
    };
    let target = export_of(&target, leaf)?;
    Some(ResolvedImport { target, args: flat.args.clone() })
}

pub(crate) fn export_of(module: &Module, name: &str) -> Option<ModuleExport> {
    match module {
        Module::Text(module) => module.export_named(name).map(|(export, _)| {
            ModuleExport::Text { module: Rc::clone(module), export }
        }),
        Module::Generator(module) => module.export_named(name).map(|(export, _)| {
            ModuleExport::Gen { module: Rc::clone(module), export }
        }),
    }
}
