#![doc = include_str!("../README.md")]
#![warn(clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(
    clippy::use_self,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation
)]

pub mod combinator;
mod lexer;
pub mod line;
mod matcher;
mod parser;
pub mod sink;
mod source_map;

pub use lexer::{IgnoreSet, Lexer};
pub use matcher::{one_of, Span, Token, TokenCursor, TokenMatcher, UNKNOWN};
pub use parser::{
    ErrMode, Error, Match, PResult, ParseCtx, Parser, ParserExt, Taggable, Tags, DEFAULT_BUDGET,
};
pub use source_map::{MapEntry, SourceMap};
