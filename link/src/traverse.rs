//! Transitive reference traversal.
//!
//! Starting from every top-level declaration of a root module, walks the
//! call/type-reference graph across modules, binding each use site to a
//! [`FoundRef`] naming the declaration it resolves to. Worklist processing
//! is breadth-first, grouped by exporting module, so refs into one module
//! arrive contiguously and resolve maps are built once per module.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;
use weld_parse::Span;

use crate::elem::{Elem, ExtendsElem, RefCellTarget};
use crate::module::{GeneratorModule, TextModule};
use crate::registry::Registry;
use crate::resolve::{export_of, ModuleExport, ResolvedImport};

/// How a reference reached its target: the export parameters of the target,
/// paired with the argument each was instantiated with at the import site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpInfo {
    /// `(export parameter, import argument)` pairs, in declaration order.
    pub exp_imp_args: Vec<(String, String)>,
}

/// A resolved reference to a declaration in a text module.
#[derive(Debug)]
pub struct TextRef {
    /// The exporting module.
    pub module: Rc<TextModule>,
    /// Index of the target declaration in [`TextModule::elems`].
    pub elem: usize,
    /// The name the referencing module used.
    pub proposed_name: String,
    /// Final link name, filled by the uniqueness pass.
    pub rename: RefCell<Option<String>>,
    /// Instantiation info when the reference crossed an import.
    pub exp_info: Option<ExpInfo>,
}

impl TextRef {
    /// The target declaration.
    #[must_use]
    pub fn elem(&self) -> &Elem {
        &self.module.elems[self.elem]
    }

    /// The target declaration's name.
    #[must_use]
    pub fn elem_name(&self) -> &str {
        self.elem().name().unwrap_or_default()
    }
}

/// A resolved reference into a generator module. Terminal for traversal:
/// generator output is emitted verbatim, never re-scanned.
#[derive(Debug)]
pub struct GenRef {
    /// The exporting module.
    pub module: Rc<GeneratorModule>,
    /// Index into the module's export table.
    pub export: usize,
    /// The name the referencing module used.
    pub proposed_name: String,
    /// Final link name, filled by the uniqueness pass.
    pub rename: RefCell<Option<String>>,
    /// Instantiation info.
    pub exp_info: ExpInfo,
}

/// A use site bound to the declaration it names, possibly across modules.
#[derive(Debug)]
pub enum FoundRef {
    /// Reference to a parsed declaration.
    Text(TextRef),
    /// Reference to a generator export.
    Gen(GenRef),
}

impl FoundRef {
    /// Canonical path of the exporting module.
    #[must_use]
    pub fn module_name(&self) -> &str {
        match self {
            FoundRef::Text(found) => &found.module.name,
            FoundRef::Gen(found) => &found.module.name,
        }
    }

    /// The target's declared name.
    #[must_use]
    pub fn elem_name(&self) -> &str {
        match self {
            FoundRef::Text(found) => found.elem_name(),
            FoundRef::Gen(found) => &found.module.exports[found.export].name,
        }
    }

    /// The instantiation info, when the reference crossed an import.
    #[must_use]
    pub fn exp_info(&self) -> Option<&ExpInfo> {
        match self {
            FoundRef::Text(found) => found.exp_info.as_ref(),
            FoundRef::Gen(found) => Some(&found.exp_info),
        }
    }

    /// The traversal's deduplication identity: exporting module path, target
    /// name, and a stable rendering of the instantiation arguments, so the
    /// same export instantiated differently yields distinct refs.
    #[must_use]
    pub fn ref_full_name(&self) -> String {
        let base = format!("{}::{}", self.module_name(), self.elem_name());
        match self.exp_info() {
            Some(info) if !info.exp_imp_args.is_empty() => {
                let mut hasher = DefaultHasher::new();
                info.exp_imp_args.hash(&mut hasher);
                format!("{base}#{:016x}", hasher.finish())
            }
            _ => base,
        }
    }

    /// The link-time rename, if the uniqueness pass assigned one.
    #[must_use]
    pub fn rename(&self) -> Option<String> {
        match self {
            FoundRef::Text(found) => found.rename.borrow().clone(),
            FoundRef::Gen(found) => found.rename.borrow().clone(),
        }
    }

    /// Assign the link-time name.
    pub fn set_rename(&self, rename: String) {
        match self {
            FoundRef::Text(found) => *found.rename.borrow_mut() = Some(rename),
            FoundRef::Gen(found) => *found.rename.borrow_mut() = Some(rename),
        }
    }
}

/// One resolution failure, with the failing position in the original source.
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
pub struct LinkIssue {
    message: Box<str>,
    #[source_code]
    src: NamedSource,
    #[label]
    span: SourceSpan,
}

impl LinkIssue {
    /// The issue's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Every issue one traversal produced. Resolution failures never abort the
/// walk; they are reported as they occur and aggregated here.
#[derive(Debug, Error, Diagnostic)]
#[error("linking failed with {} unresolved reference(s)", self.issues.len())]
pub struct Issues {
    #[related]
    issues: Vec<LinkIssue>,
}

impl Issues {
    /// The collected issues, in occurrence order.
    #[must_use]
    pub fn issues(&self) -> &[LinkIssue] {
        &self.issues
    }
}

enum Resolution {
    Found(Rc<FoundRef>),
    /// The name is an export parameter of the current instantiation.
    Arg,
    Missing,
}

/// Walk the reference graph from `root`'s top-level declarations.
///
/// `visit` is called once per distinct [`FoundRef::ref_full_name`]; its
/// return value decides whether the ref's own references are expanded.
/// References into one module are delivered contiguously.
pub fn traverse_refs(
    root: &Rc<TextModule>,
    registry: &Registry,
    mut visit: impl FnMut(&Rc<FoundRef>) -> bool,
) -> Result<(), Issues> {
    let mut traverser = Traverser {
        registry,
        visited: IndexSet::new(),
        issues: Vec::new(),
    };
    let mut wave: Vec<Rc<FoundRef>> = root
        .decls()
        .into_iter()
        .filter_map(|idx| {
            let name = root.elems[idx].name()?.to_owned();
            Some(Rc::new(FoundRef::Text(TextRef {
                module: Rc::clone(root),
                elem: idx,
                proposed_name: name,
                rename: RefCell::new(None),
                exp_info: None,
            })))
        })
        .collect();

    while !wave.is_empty() {
        let mut by_module: IndexMap<String, Vec<Rc<FoundRef>>> = IndexMap::new();
        for found in wave {
            by_module
                .entry(found.module_name().to_owned())
                .or_default()
                .push(found);
        }
        let mut next = Vec::new();
        for (_, group) in by_module {
            for found in group {
                if !traverser.visited.insert(found.ref_full_name()) {
                    continue;
                }
                if !visit(&found) {
                    continue;
                }
                traverser.expand(&found, &mut next);
            }
        }
        wave = next;
    }

    if traverser.issues.is_empty() {
        Ok(())
    } else {
        Err(Issues { issues: traverser.issues })
    }
}

struct Traverser<'r> {
    registry: &'r Registry,
    visited: IndexSet<String>,
    issues: Vec<LinkIssue>,
}

impl Traverser<'_> {
    fn expand(&mut self, found: &Rc<FoundRef>, next: &mut Vec<Rc<FoundRef>>) {
        let FoundRef::Text(parent) = found.as_ref() else {
            return;
        };
        match parent.elem() {
            Elem::Fn(func) => {
                for call in &func.calls {
                    if call.name == func.name {
                        continue;
                    }
                    self.bind(parent, &call.name, call.span, &call.target, next);
                }
                for type_ref in &func.type_refs {
                    self.bind(parent, &type_ref.name, type_ref.span, &type_ref.target, next);
                }
            }
            Elem::Struct(strukt) => {
                for member in &strukt.members {
                    for type_ref in &member.type_refs {
                        self.bind(parent, &type_ref.name, type_ref.span, &type_ref.target, next);
                    }
                }
                for extends in &strukt.extends {
                    self.bind_extends(parent, extends, next);
                }
            }
            Elem::Var(var) => {
                for type_ref in &var.type_refs {
                    self.bind(parent, &type_ref.name, type_ref.span, &type_ref.target, next);
                }
            }
            Elem::Alias(alias) => {
                for type_ref in &alias.type_refs {
                    self.bind(parent, &type_ref.name, type_ref.span, &type_ref.target, next);
                }
            }
            _ => {}
        }
    }

    fn bind(
        &mut self,
        parent: &TextRef,
        name: &str,
        span: Span,
        target: &RefCellTarget,
        next: &mut Vec<Rc<FoundRef>>,
    ) {
        match self.resolve(parent, name, span) {
            Resolution::Found(found) => {
                *target.borrow_mut() = Some(Rc::clone(&found));
                next.push(found);
            }
            Resolution::Arg => {}
            Resolution::Missing => {
                self.push_issue(&parent.module, span, format!("reference not found: {name}"));
            }
        }
    }

    fn resolve(&mut self, parent: &TextRef, name: &str, span: Span) -> Resolution {
        if let Some(info) = &parent.exp_info {
            if info.exp_imp_args.iter().any(|(param, _)| param == name) {
                return Resolution::Arg;
            }
        }
        // An export's own type parameters are placeholders, not references.
        let own_param = parent
            .module
            .exports
            .iter()
            .filter(|export| export.elem == parent.elem)
            .any(|export| export.params.iter().any(|param| param == name));
        if own_param {
            return Resolution::Arg;
        }
        let map = self.registry.import_resolve_map(&parent.module);
        if let Some(resolved) = map.imports.get(name) {
            return Resolution::Found(self.instantiate(parent, name, span, resolved));
        }
        if let Some((idx, _)) = parent.module.decl_named(name) {
            let exp_info = if cfg!(feature = "importing_chains") {
                parent.exp_info.clone()
            } else {
                None
            };
            return Resolution::Found(Rc::new(FoundRef::Text(TextRef {
                module: Rc::clone(&parent.module),
                elem: idx,
                proposed_name: name.to_owned(),
                rename: RefCell::new(None),
                exp_info,
            })));
        }
        Resolution::Missing
    }

    fn instantiate(
        &mut self,
        parent: &TextRef,
        name: &str,
        span: Span,
        resolved: &ResolvedImport,
    ) -> Rc<FoundRef> {
        let params = resolved.target.params().to_vec();
        let args = resolved.args.clone().unwrap_or_default();
        if params.len() != args.len() && !(params.is_empty() && args.is_empty()) {
            self.push_issue(
                &parent.module,
                span,
                format!(
                    "import of {name} passes {} argument(s), export declares {} parameter(s)",
                    args.len(),
                    params.len(),
                ),
            );
            if let ModuleExport::Text { module, export } = &resolved.target {
                let exp_span = module.elems[module.exports[*export].elem].span();
                module.report_at(
                    &format!("export {name} declares {} parameter(s)", params.len()),
                    exp_span.0,
                );
            }
        }
        let exp_imp_args: Vec<(String, String)> = params
            .into_iter()
            .zip(args.into_iter().map(|arg| substitute(parent, arg)))
            .collect();
        match &resolved.target {
            ModuleExport::Text { module, export } => Rc::new(FoundRef::Text(TextRef {
                module: Rc::clone(module),
                elem: module.exports[*export].elem,
                proposed_name: name.to_owned(),
                rename: RefCell::new(None),
                exp_info: Some(ExpInfo { exp_imp_args }),
            })),
            ModuleExport::Gen { module, export } => Rc::new(FoundRef::Gen(GenRef {
                module: Rc::clone(module),
                export: *export,
                proposed_name: name.to_owned(),
                rename: RefCell::new(None),
                exp_info: ExpInfo { exp_imp_args },
            })),
        }
    }

    fn bind_extends(&mut self, parent: &TextRef, extends: &ExtendsElem, next: &mut Vec<Rc<FoundRef>>) {
        let target = self
            .registry
            .module_by_path(&extends.from_path)
            .and_then(|module| export_of(&module, &extends.name));
        let Some(target) = target else {
            self.push_issue(
                &parent.module,
                extends.span,
                format!("export not found for #extends {}", extends.name),
            );
            return;
        };
        let resolved = ResolvedImport { target, args: Some(extends.args.clone()) };
        let found = self.instantiate(parent, &extends.name, extends.span, &resolved);
        *extends.target.borrow_mut() = Some(Rc::clone(&found));
        next.push(found);
    }

    #[cold]
    fn push_issue(&mut self, module: &TextModule, span: Span, message: String) {
        module.report_at(&message, span.0);
        let (src, mapped) = module.map_span(span);
        let name = module
            .file_name
            .clone()
            .unwrap_or_else(|| module.name.clone());
        let span = (mapped.0 as usize..mapped.1 as usize).into();
        self.issues.push(LinkIssue {
            message: message.into(),
            src: NamedSource::new(name, src.to_string()),
            span,
        });
    }
}

fn substitute(parent: &TextRef, arg: String) -> String {
    #[cfg(feature = "importing_chains")]
    if let Some(info) = &parent.exp_info {
        if let Some((_, outer)) = info.exp_imp_args.iter().find(|(param, _)| *param == arg) {
            return outer.clone();
        }
    }
    #[cfg(not(feature = "importing_chains"))]
    let _ = parent;
    arg
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use weld_parse::sink::capture_reports;

    use super::*;
    use crate::module::GeneratorExport;
    use crate::registry::RegistryParams;

    fn registry(entries: &[(&str, &str)]) -> Registry {
        Registry::new(RegistryParams {
            wgsl: entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            ..RegistryParams::default()
        })
    }

    fn visit_order(registry: &Registry, root: &str) -> Vec<(String, String)> {
        let root = registry.find_text_module(root).unwrap();
        let mut order = Vec::new();
        let result = traverse_refs(&root, registry, |found| {
            order.push((
                found.module_name().to_owned(),
                found.elem_name().to_owned(),
            ));
            true
        });
        assert!(result.is_ok(), "unexpected issues: {result:?}");
        order
    }

    #[test]
    fn imported_fn_follows_root_fn() {
        let registry = registry(&[
            (
                "./main.wgsl",
                "import bar::foo; module main; fn main() { foo(); }",
            ),
            ("./bar.wgsl", "module bar; export fn foo() { }"),
        ]);
        let order = visit_order(&registry, "main");
        assert_eq!(order[0], ("main".to_owned(), "main".to_owned()));
        assert_eq!(order[1], ("bar".to_owned(), "foo".to_owned()));

        // The call site's back-pointer is bound to the same target.
        let main = registry.find_text_module("main").unwrap();
        let Elem::Fn(func) = &main.elems[main.fns[0]] else {
            panic!("expected fn")
        };
        let target = func.calls[0].target.borrow();
        let target = target.as_ref().unwrap();
        assert_eq!(target.module_name(), "bar");
        assert!(matches!(target.as_ref(), FoundRef::Text(t) if matches!(t.elem(), Elem::Fn(_))));
    }

    #[test]
    fn import_args_instantiate_export_params() {
        let registry = registry(&[
            (
                "./main.wgsl",
                "import foo(u32) from ./file1; fn bar() { foo(8u); }",
            ),
            (
                "./file1.wgsl",
                "import zap from ./file2; export(A) fn foo(a: A) { support(a); zap(); } fn support() {}",
            ),
            ("./file2.wgsl", "export fn zap() {}"),
        ]);
        let root = registry.find_text_module("main").unwrap();
        let mut found_refs = Vec::new();
        traverse_refs(&root, &registry, |found| {
            found_refs.push(Rc::clone(found));
            true
        })
        .unwrap();

        assert_eq!(found_refs[1].elem_name(), "foo");
        let info = found_refs[1].exp_info().unwrap();
        assert_eq!(
            info.exp_imp_args,
            [("A".to_owned(), "u32".to_owned())]
        );
        // `support` is local to file1 and resolves before file2's `zap`.
        assert_eq!(found_refs[2].elem_name(), "support");
        assert_eq!(found_refs[2].module_name(), "file1");
        assert_eq!(found_refs[3].elem_name(), "zap");
        assert_eq!(found_refs[3].module_name(), "file2");
    }

    #[test]
    fn mutually_recursive_structs_terminate() {
        let registry = registry(&[(
            "./main.wgsl",
            "struct A { a: A, b: B } struct B { f: f32 }",
        )]);
        let ((), reports) = capture_reports(|| {
            let order = visit_order(&registry, "main");
            let names: Vec<&str> = order.iter().map(|(_, name)| name.as_str()).collect();
            assert_eq!(names, ["A", "B"]);
        });
        assert_eq!(reports, Vec::<String>::new());
    }

    #[test]
    fn distinct_instantiations_get_distinct_identities() {
        let registry = registry(&[
            (
                "./main.wgsl",
                "import foo(u32) as foo32 from ./lib; import foo(f32) as foof from ./lib; \
                 fn main() { foo32(); foof(); }",
            ),
            ("./lib.wgsl", "export(T) fn foo(t: T) {}"),
        ]);
        let root = registry.find_text_module("main").unwrap();
        let mut names = Vec::new();
        traverse_refs(&root, &registry, |found| {
            names.push(found.ref_full_name());
            true
        })
        .unwrap();
        // main, plus one ref per instantiation.
        assert_eq!(names.len(), 3);
        assert_ne!(names[1], names[2]);
    }

    #[test]
    fn unresolved_reference_is_reported_and_skipped() {
        let registry = registry(&[(
            "./main.wgsl",
            "fn main() { missing(); after(); } fn after() {}",
        )]);
        let root = registry.find_text_module("main").unwrap();
        let ((), reports) = capture_reports(|| {
            let mut order = Vec::new();
            let result = traverse_refs(&root, &registry, |found| {
                order.push(found.elem_name().to_owned());
                true
            });
            let issues = result.unwrap_err();
            assert_eq!(issues.issues().len(), 1);
            assert_eq!(issues.issues()[0].message(), "reference not found: missing");
            // Traversal continued past the failure.
            assert!(order.contains(&"after".to_owned()));
        });
        assert!(reports.iter().any(|r| r.contains("reference not found: missing")));
        assert!(reports.iter().any(|r| r.contains('^')));
    }

    #[test]
    fn generator_refs_are_terminal() {
        let generator = GeneratorModule {
            name: "gen".to_owned(),
            exports: vec![GeneratorExport {
                name: "lights".to_owned(),
                params: vec!["COUNT".to_owned()],
                generate: Box::new(|args| format!("// {} lights", args[0].1)),
            }],
        };
        let registry = Registry::new(RegistryParams {
            wgsl: [(
                "./main.wgsl".to_owned(),
                "import gen::lights(4); fn main() { lights(); }".to_owned(),
            )]
            .into_iter()
            .collect(),
            generators: vec![generator],
            ..RegistryParams::default()
        });
        let root = registry.find_text_module("main").unwrap();
        let mut gen_refs = 0;
        traverse_refs(&root, &registry, |found| {
            if let FoundRef::Gen(found) = found.as_ref() {
                gen_refs += 1;
                assert_eq!(found.exp_info.exp_imp_args[0].1, "4");
                let generated = (found.module.exports[found.export].generate)(
                    &found.exp_info.exp_imp_args,
                );
                assert_eq!(generated, "// 4 lights");
            }
            true
        })
        .unwrap();
        assert_eq!(gen_refs, 1);
    }

    #[test]
    fn parameter_count_mismatch_logs_both_sites_and_proceeds() {
        let registry = registry(&[
            (
                "./main.wgsl",
                "import foo(u32, f32) from ./lib; fn main() { foo(); }",
            ),
            ("./lib.wgsl", "export(T) fn foo(t: T) {}"),
        ]);
        let root = registry.find_text_module("main").unwrap();
        let (result, reports) = capture_reports(|| {
            let mut order = Vec::new();
            let result = traverse_refs(&root, &registry, |found| {
                order.push(found.elem_name().to_owned());
                true
            });
            assert_eq!(order, ["main", "foo"]);
            result
        });
        assert!(result.is_err());
        assert!(reports.iter().any(|r| r.contains("passes 2 argument(s)")));
        assert!(reports.iter().any(|r| r.contains("declares 1 parameter(s)")));
    }

    #[test]
    fn extends_resolves_like_an_import() {
        let registry = registry(&[
            (
                "./main.wgsl",
                "#extends Light from ./lib\nstruct Scene { n: u32 }",
            ),
            ("./lib.wgsl", "export struct Light { dir: vec3<f32> }"),
        ]);
        let order = visit_order(&registry, "main");
        let names: Vec<&str> = order.iter().map(|(_, name)| name.as_str()).collect();
        assert_eq!(names, ["Scene", "Light"]);

        let main = registry.find_text_module("main").unwrap();
        let Elem::Struct(scene) = &main.elems[main.structs[0]] else {
            panic!("expected struct")
        };
        assert!(scene.extends[0].target.borrow().is_some());
    }
}
