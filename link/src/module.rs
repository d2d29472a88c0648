//! Parsed modules: text modules and generator modules.

use std::fmt;
use std::rc::Rc;

use weld_parse::sink;
use weld_parse::{Span, SourceMap};

use crate::cond::Prepped;
use crate::elem::{Elem, ExportElem, ExtendsElem};
use crate::grammar::relpath_segments;

/// A WGSL module parsed from text.
pub struct TextModule {
    /// Canonical path, `module a::b` declaration or the file path's stem.
    pub name: String,
    /// The registry key this module was loaded under, when it came from one.
    pub file_name: Option<String>,
    /// Original source.
    pub src: Rc<str>,
    /// Source after conditional preprocessing, what was actually parsed.
    pub prepped_src: Rc<str>,
    /// Maps `prepped_src` positions back to `src`.
    pub src_map: Rc<SourceMap>,
    /// `#template` selection, if any.
    pub template: Option<String>,
    /// Every parsed element, in source order.
    pub elems: Vec<Elem>,
    /// Indices of `Elem::Fn` entries.
    pub fns: Vec<usize>,
    /// Indices of `Elem::Struct` entries.
    pub structs: Vec<usize>,
    /// Indices of `Elem::Var` entries.
    pub vars: Vec<usize>,
    /// Indices of `Elem::Alias` entries.
    pub aliases: Vec<usize>,
    /// Indices of `Elem::TreeImport` entries.
    pub imports: Vec<usize>,
    /// Exported declarations.
    pub exports: Vec<TextExport>,
}

/// One exported declaration of a [`TextModule`].
#[derive(Debug, Clone)]
pub struct TextExport {
    /// Exported name (the declaration's own name).
    pub name: String,
    /// Type parameter names from `#export (A, B)`.
    pub params: Vec<String>,
    /// Index of the exported declaration in [`TextModule::elems`].
    pub elem: usize,
}

impl fmt::Debug for TextModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextModule")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("elems", &self.elems.len())
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

impl TextModule {
    /// Assemble a module from its parsed element list.
    ///
    /// This is where directive elements take effect: `module` fixes the
    /// canonical name, `export` markers become [`TextExport`]s bound to the
    /// following declaration, and `#extends` directives fold into the
    /// following struct. A dangling `export`/`#extends` is reported.
    #[must_use]
    pub fn assemble(
        file_name: Option<String>,
        src: Rc<str>,
        prepped: &Prepped,
        elems: Vec<Elem>,
    ) -> Rc<Self> {
        let mut module = Self {
            name: String::new(),
            file_name,
            src,
            prepped_src: Rc::clone(&prepped.text),
            src_map: Rc::clone(&prepped.src_map),
            template: None,
            elems: Vec::new(),
            fns: Vec::new(),
            structs: Vec::new(),
            vars: Vec::new(),
            aliases: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
        };
        module.fold_elems(elems);
        if module.name.is_empty() {
            module.name = module
                .file_name
                .as_deref()
                .map(|file| relpath_segments(file).join("/"))
                .unwrap_or_default();
        }
        Rc::new(module)
    }

    fn fold_elems(&mut self, elems: Vec<Elem>) {
        let mut pending_exports: Vec<ExportElem> = Vec::new();
        let mut pending_extends: Vec<ExtendsElem> = Vec::new();
        for elem in elems {
            let idx = self.elems.len();
            match elem {
                Elem::Module(module) => {
                    if self.name.is_empty() {
                        self.name = module.name.clone();
                    }
                    self.elems.push(Elem::Module(module));
                }
                Elem::Template(template) => {
                    self.template = Some(template.name.clone());
                    self.elems.push(Elem::Template(template));
                }
                Elem::Export(export) => pending_exports.push(export),
                Elem::Extends(extends) => pending_extends.push(extends),
                Elem::Fn(func) => {
                    self.drop_extends(&mut pending_extends);
                    self.take_exports(&mut pending_exports, &func.name, idx);
                    self.fns.push(idx);
                    self.elems.push(Elem::Fn(func));
                }
                Elem::Struct(mut strukt) => {
                    strukt.extends = std::mem::take(&mut pending_extends);
                    self.take_exports(&mut pending_exports, &strukt.name, idx);
                    self.structs.push(idx);
                    self.elems.push(Elem::Struct(strukt));
                }
                Elem::Var(var) => {
                    self.drop_extends(&mut pending_extends);
                    self.vars.push(idx);
                    self.elems.push(Elem::Var(var));
                }
                Elem::Alias(alias) => {
                    self.drop_extends(&mut pending_extends);
                    self.aliases.push(idx);
                    self.elems.push(Elem::Alias(alias));
                }
                Elem::TreeImport(import) => {
                    self.imports.push(idx);
                    self.elems.push(Elem::TreeImport(import));
                }
                elem @ Elem::GlobalDirective(_) => self.elems.push(elem),
            }
        }
        for export in pending_exports {
            self.report_at("export marks no declaration", export.span.0);
        }
        for extends in pending_extends {
            self.report_at("#extends is not followed by a struct", extends.span.0);
        }
    }

    fn take_exports(&mut self, pending: &mut Vec<ExportElem>, name: &str, elem: usize) {
        for export in pending.drain(..) {
            self.exports.push(TextExport {
                name: name.to_owned(),
                params: export.params,
                elem,
            });
        }
    }

    fn drop_extends(&mut self, pending: &mut Vec<ExtendsElem>) {
        for extends in pending.drain(..) {
            self.report_at("#extends is not followed by a struct", extends.span.0);
        }
    }

    /// The declaration named `name`, searching fns, structs and aliases.
    #[must_use]
    pub fn decl_named(&self, name: &str) -> Option<(usize, &Elem)> {
        self.fns
            .iter()
            .chain(&self.structs)
            .chain(&self.aliases)
            .map(|&idx| (idx, &self.elems[idx]))
            .find(|(_, elem)| elem.name() == Some(name))
    }

    /// The export named `name`, with its index in [`Self::exports`].
    #[must_use]
    pub fn export_named(&self, name: &str) -> Option<(usize, &TextExport)> {
        self.exports
            .iter()
            .enumerate()
            .find(|(_, export)| export.name == name)
    }

    /// Indices of every linkable top-level declaration, in source order.
    #[must_use]
    pub fn decls(&self) -> Vec<usize> {
        let mut decls: Vec<usize> = self
            .fns
            .iter()
            .chain(&self.structs)
            .chain(&self.vars)
            .chain(&self.aliases)
            .copied()
            .collect();
        decls.sort_unstable();
        decls
    }

    /// Report `msg` at `pos` (a position in the prepped text), remapped to
    /// the original source.
    pub fn report_at(&self, msg: &str, pos: u32) {
        match self.src_map.map_position(pos) {
            Some((src, mapped)) => sink::report_at(msg, &src, mapped),
            None => sink::report_at(msg, &self.prepped_src, pos),
        }
    }

    /// Like [`Self::report_at`], yielding the remapped source and position
    /// for callers that also collect structured issues.
    #[must_use]
    pub fn map_span(&self, span: Span) -> (Rc<str>, Span) {
        match (
            self.src_map.map_position(span.0),
            self.src_map.map_position(span.1.saturating_sub(1)),
        ) {
            (Some((src, start)), Some((_, end))) => (src, (start, end + 1)),
            (Some((src, start)), None) => (src, (start, start)),
            _ => (Rc::clone(&self.prepped_src), span),
        }
    }
}

/// A function producing WGSL text from `(param, argument)` pairs.
pub type GeneratorFn = Box<dyn Fn(&[(String, String)]) -> String>;

/// A module whose exports are produced by user code instead of parsed text.
///
/// Generator output is emitted verbatim and never re-parsed, so traversal
/// treats references into a generator as terminal.
pub struct GeneratorModule {
    /// Canonical module path.
    pub name: String,
    /// Exports, each backed by a generator function.
    pub exports: Vec<GeneratorExport>,
}

/// One export of a [`GeneratorModule`].
pub struct GeneratorExport {
    /// Exported name.
    pub name: String,
    /// Type parameter names.
    pub params: Vec<String>,
    /// Produces the WGSL text for one instantiation.
    pub generate: GeneratorFn,
}

impl fmt::Debug for GeneratorModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exports: Vec<&str> = self.exports.iter().map(|e| e.name.as_str()).collect();
        f.debug_struct("GeneratorModule")
            .field("name", &self.name)
            .field("exports", &exports)
            .finish()
    }
}

impl GeneratorModule {
    /// The export named `name`, with its index in [`Self::exports`].
    #[must_use]
    pub fn export_named(&self, name: &str) -> Option<(usize, &GeneratorExport)> {
        self.exports
            .iter()
            .enumerate()
            .find(|(_, export)| export.name == name)
    }
}

/// Either kind of module, as stored in the registry.
#[derive(Debug, Clone)]
pub enum Module {
    /// A parsed text module.
    Text(Rc<TextModule>),
    /// A generator module.
    Generator(Rc<GeneratorModule>),
}

impl Module {
    /// The module's canonical path.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Module::Text(module) => &module.name,
            Module::Generator(module) => &module.name,
        }
    }
}
