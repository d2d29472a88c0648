//! The module registry: every module participating in one link operation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::cond;
use crate::grammar::{parse_module_text, relpath_segments};
use crate::module::{GeneratorModule, Module, TextModule};
use crate::resolve::ResolveMap;

/// A named string template the emitter may apply to a module's text.
///
/// The core only records which template a module selected via `#template`;
/// applying it is the emitter's concern.
pub struct Template {
    /// Name modules select the template by.
    pub name: String,
    /// Rewrites a module's emitted text.
    pub apply: Box<dyn Fn(&str) -> String>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template").field("name", &self.name).finish()
    }
}

/// Everything a [`Registry`] is built from.
#[derive(Default)]
pub struct RegistryParams {
    /// WGSL sources keyed by file path.
    pub wgsl: IndexMap<String, String>,
    /// Generator modules contributing synthetic exports.
    pub generators: Vec<GeneratorModule>,
    /// String templates, looked up by `#template` name.
    pub templates: Vec<Template>,
    /// Parameters for `#if` conditional compilation.
    pub conditions: HashMap<String, bool>,
}

/// Parsed modules indexed by canonical path and file path.
///
/// Construction runs the whole front half of the pipeline for every text
/// module: conditional preprocessing, then parsing into an element list.
/// Parse failures are reported through the sink; the failing module still
/// registers with whatever elements did parse.
pub struct Registry {
    modules: Vec<Module>,
    by_path: IndexMap<String, usize>,
    by_file: IndexMap<String, usize>,
    templates: IndexMap<String, Template>,
    resolve_maps: RefCell<HashMap<String, Rc<ResolveMap>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.modules.iter().map(Module::name).collect();
        f.debug_struct("Registry").field("modules", &names).finish_non_exhaustive()
    }
}

impl Registry {
    /// Parse `params` into a registry.
    #[must_use]
    pub fn new(params: RegistryParams) -> Self {
        let mut registry = Self {
            modules: Vec::new(),
            by_path: IndexMap::new(),
            by_file: IndexMap::new(),
            templates: params
                .templates
                .into_iter()
                .map(|template| (template.name.clone(), template))
                .collect(),
            resolve_maps: RefCell::new(HashMap::new()),
        };
        for (file, source) in params.wgsl {
            let src: Rc<str> = source.into();
            let prepped = cond::process(&src, &params.conditions);
            let elems = parse_module_text(&prepped.text, Some(Rc::clone(&prepped.src_map)), None);
            let module = TextModule::assemble(Some(file.clone()), src, &prepped, elems);
            let idx = registry.modules.len();
            registry.by_file.insert(relpath_segments(&file).join("/"), idx);
            registry.by_path.entry(module.name.clone()).or_insert(idx);
            registry.modules.push(Module::Text(module));
        }
        for generator in params.generators {
            let idx = registry.modules.len();
            registry
                .by_path
                .entry(generator.name.clone())
                .or_insert(idx);
            registry.modules.push(Module::Generator(Rc::new(generator)));
        }
        registry
    }

    /// Every module, text modules first, in registration order.
    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// The parsed text modules, in registration order.
    pub fn text_modules(&self) -> impl Iterator<Item = &Rc<TextModule>> {
        self.modules.iter().filter_map(|module| match module {
            Module::Text(module) => Some(module),
            Module::Generator(_) => None,
        })
    }

    /// Find a text module by canonical path or file path.
    #[must_use]
    pub fn find_text_module(&self, name: &str) -> Option<Rc<TextModule>> {
        let module = self
            .lookup(&relpath_segments(name).join("/"))
            .or_else(|| self.lookup(name))?;
        match module {
            Module::Text(module) => Some(Rc::clone(module)),
            Module::Generator(_) => None,
        }
    }

    /// Find any module by its canonical path segments.
    ///
    /// Falls back to file paths: an import path matches a file whose
    /// normalized path ends with the same segments, so `./file1` finds a
    /// module registered as `shaders/file1.wgsl`.
    #[must_use]
    pub fn module_by_path<S: AsRef<str>>(&self, segments: &[S]) -> Option<Module> {
        let joined = segments
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("/");
        self.lookup(&joined).cloned()
    }

    fn lookup(&self, joined: &str) -> Option<&Module> {
        if let Some(&idx) = self.by_path.get(joined).or_else(|| self.by_file.get(joined)) {
            return Some(&self.modules[idx]);
        }
        // Suffix match on file paths for source-relative imports.
        let suffix = format!("/{joined}");
        self.by_file
            .iter()
            .find(|(file, _)| file.ends_with(&suffix))
            .map(|(_, &idx)| &self.modules[idx])
    }

    /// The template registered under `name`.
    #[must_use]
    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// The import resolve map for `module`, built on first use.
    #[must_use]
    pub fn import_resolve_map(&self, module: &TextModule) -> Rc<ResolveMap> {
        if let Some(map) = self.resolve_maps.borrow().get(&module.name) {
            return Rc::clone(map);
        }
        let map = Rc::new(ResolveMap::build(module, self));
        self.resolve_maps
            .borrow_mut()
            .insert(module.name.clone(), Rc::clone(&map));
        map
    }
}
