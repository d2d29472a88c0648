#![doc = include_str!("../README.md")]
#![warn(clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(
    clippy::use_self,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation
)]

pub mod builtin;
pub mod cond;
mod elem;
mod grammar;
mod import_tree;
mod module;
mod registry;
mod resolve;
mod traverse;

pub use elem::{
    AliasElem, CallElem, Elem, ExportElem, ExtendsElem, FnElem, GlobalDirectiveElem, MemberElem,
    ModuleElem, StructElem, TemplateElem, TreeImportElem, TypeRefElem, VarElem,
};
pub use grammar::parse_module_text;
pub use import_tree::{FlatImport, ImportTree, Segment, SimpleSegment};
pub use module::{GeneratorExport, GeneratorFn, GeneratorModule, Module, TextExport, TextModule};
pub use registry::{Registry, RegistryParams, Template};
pub use resolve::{ModuleExport, ResolveMap, ResolvedImport};
pub use traverse::{traverse_refs, ExpInfo, FoundRef, GenRef, Issues, LinkIssue, TextRef};
