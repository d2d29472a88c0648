//! The typed element list a parsed module boils down to.
//!
//! Elements are immutable after parsing, with one exception: the `target`
//! cells on [`CallElem`], [`TypeRefElem`] and [`ExtendsElem`] are filled in
//! by the reference traversal. Targets are `Rc`s into other modules' element
//! lists; they never point back, so mutual recursion between declarations
//! cannot create an ownership cycle.

use std::cell::RefCell;
use std::rc::Rc;

use weld_parse::Span;

use crate::import_tree::ImportTree;
use crate::traverse::FoundRef;

/// A back-pointer filled during traversal.
pub type RefCellTarget = RefCell<Option<Rc<FoundRef>>>;

/// One top-level construct discovered in a module, in source order.
#[derive(Debug)]
pub enum Elem {
    /// `fn name(...) { ... }`
    Fn(FnElem),
    /// `struct name { ... }`
    Struct(StructElem),
    /// Module-scope `var`, `const`, `override` or `let`.
    Var(VarElem),
    /// `alias name = type;`
    Alias(AliasElem),
    /// An `import` directive in any of the accepted syntaxes.
    TreeImport(TreeImportElem),
    /// `module a::b::c` canonical path declaration.
    Module(ModuleElem),
    /// `export` / `#export (A, B)`, marking the next fn or struct.
    Export(ExportElem),
    /// `#extends Name(args) as Alias from path`, merged into the next struct.
    Extends(ExtendsElem),
    /// `#template name` string-template selection.
    Template(TemplateElem),
    /// `diagnostic`, `enable`, `requires` or a module-scope `const_assert`.
    GlobalDirective(GlobalDirectiveElem),
}

impl Elem {
    /// The declared name, for elements that have one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Elem::Fn(elem) => Some(&elem.name),
            Elem::Struct(elem) => Some(&elem.name),
            Elem::Var(elem) => Some(&elem.name),
            Elem::Alias(elem) => Some(&elem.name),
            _ => None,
        }
    }

    /// The source range this element covers.
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Elem::Fn(elem) => elem.span,
            Elem::Struct(elem) => elem.span,
            Elem::Var(elem) => elem.span,
            Elem::Alias(elem) => elem.span,
            Elem::TreeImport(elem) => elem.span,
            Elem::Module(elem) => elem.span,
            Elem::Export(elem) => elem.span,
            Elem::Extends(elem) => elem.span,
            Elem::Template(elem) => elem.span,
            Elem::GlobalDirective(elem) => elem.span,
        }
    }
}

/// A function declaration with the references found inside it.
#[derive(Debug)]
pub struct FnElem {
    /// Declared name.
    pub name: String,
    /// Span of the name token, where a rename would be applied.
    pub name_span: Span,
    /// Span of the whole declaration, attributes through closing brace.
    pub span: Span,
    /// Calls found in the body, in source order.
    pub calls: Vec<CallElem>,
    /// Type references from the signature and the body's declarations.
    pub type_refs: Vec<TypeRefElem>,
}

/// A call site inside a function body.
#[derive(Debug)]
pub struct CallElem {
    /// Called name.
    pub name: String,
    /// Span of the called name.
    pub span: Span,
    /// Resolved during traversal; `None` if resolution failed or never ran.
    pub target: RefCellTarget,
}

impl CallElem {
    /// An unresolved call.
    #[must_use]
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self { name: name.into(), span, target: RefCell::new(None) }
    }
}

/// A reference to a (possibly imported) type.
#[derive(Debug)]
pub struct TypeRefElem {
    /// Referenced type name.
    pub name: String,
    /// Span of the referenced name.
    pub span: Span,
    /// Resolved during traversal; `None` if resolution failed or never ran.
    pub target: RefCellTarget,
}

impl TypeRefElem {
    /// An unresolved type reference.
    #[must_use]
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self { name: name.into(), span, target: RefCell::new(None) }
    }
}

/// A struct declaration.
#[derive(Debug)]
pub struct StructElem {
    /// Declared name.
    pub name: String,
    /// Span of the name token.
    pub name_span: Span,
    /// Span of the whole declaration.
    pub span: Span,
    /// Members in source order.
    pub members: Vec<MemberElem>,
    /// `#extends` directives merged into this struct, filled in when the
    /// element list is assembled into a module.
    pub extends: Vec<ExtendsElem>,
}

/// One struct member.
#[derive(Debug)]
pub struct MemberElem {
    /// Member name.
    pub name: String,
    /// Span of the member name.
    pub span: Span,
    /// Type references in the member's type.
    pub type_refs: Vec<TypeRefElem>,
}

/// A module-scope variable, constant or override.
#[derive(Debug)]
pub struct VarElem {
    /// Declared name.
    pub name: String,
    /// Span of the name token.
    pub name_span: Span,
    /// Span of the whole declaration.
    pub span: Span,
    /// Type references in the declared type.
    pub type_refs: Vec<TypeRefElem>,
}

/// A type alias.
#[derive(Debug)]
pub struct AliasElem {
    /// Declared name.
    pub name: String,
    /// Span of the name token.
    pub name_span: Span,
    /// Span of the whole declaration.
    pub span: Span,
    /// First identifier of the aliased type.
    pub target_name: String,
    /// Non-builtin type references in the aliased type.
    pub type_refs: Vec<TypeRefElem>,
}

/// An import directive, folded to a tree.
#[derive(Debug)]
pub struct TreeImportElem {
    /// Span of the directive.
    pub span: Span,
    /// The imported paths.
    pub tree: ImportTree,
}

/// A `module a::b::c` declaration.
#[derive(Debug)]
pub struct ModuleElem {
    /// Canonical path, segments joined by `/`.
    pub name: String,
    /// Span of the declaration.
    pub span: Span,
}

/// An export marker applying to the next fn or struct.
#[derive(Debug)]
pub struct ExportElem {
    /// Type parameter names from `#export (A, B)`; empty for plain `export`.
    pub params: Vec<String>,
    /// Span of the directive.
    pub span: Span,
}

/// `#extends Name(args) as Alias from path`.
#[derive(Debug)]
pub struct ExtendsElem {
    /// Exporter-side struct name.
    pub name: String,
    /// Instantiation arguments.
    pub args: Vec<String>,
    /// Optional local rename.
    pub as_name: Option<String>,
    /// Exporting module path segments.
    pub from_path: Vec<String>,
    /// Span of the directive.
    pub span: Span,
    /// Resolved during traversal.
    pub target: RefCellTarget,
}

/// `#template name`.
#[derive(Debug)]
pub struct TemplateElem {
    /// Name of the registered string template to apply to this module.
    pub name: String,
    /// Span of the directive.
    pub span: Span,
}

/// A directive passed through to the emitter unchanged.
#[derive(Debug)]
pub struct GlobalDirectiveElem {
    /// Span of the directive, up to and including its `;`.
    pub span: Span,
}
