//! The parser primitive.
//!
//! A grammar rule is anything implementing [`Parser`]: most rules are plain
//! functions `fn(&mut ParseCtx) -> PResult<T>`, composed with the adapters in
//! [`crate::combinator`] and on [`ParserExt`]. Tuples of parsers sequence
//! their members and produce a tuple of values.
//!
//! Failure comes in two flavors, mirrored on winnow's error model:
//! [`ErrMode::Backtrack`] restores the lexer position so the caller may try
//! an alternative, [`ErrMode::Cut`] aborts the whole parse (only the parse
//! budget produces it here).
//!
//! Left recursion is not supported and not detected: a rule must consume at
//! least one token before recursing into itself.

use std::rc::Rc;

use smallvec::SmallVec;
use thiserror::Error;

use crate::lexer::Lexer;
use crate::matcher::{Span, Token};
use crate::sink;
use crate::source_map::SourceMap;

/// Default primitive-consumption budget for one top-level parse.
pub const DEFAULT_BUDGET: u32 = 1 << 20;

/// Parse errors. `Expected` is the routine backtracking case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A primitive did not match the current token.
    #[error("expected {wanted}. Instead got {got}")]
    Expected {
        /// Literal text or token kind the parser wanted.
        wanted: &'static str,
        /// Kind of the token found instead, or `"eof"`.
        got: &'static str,
    },
    /// The parse consumed more primitive tokens than its budget allows.
    #[error("parse budget exhausted")]
    BudgetExhausted,
}

/// Recoverable vs fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrMode {
    /// The parser did not match; the lexer position has been restored.
    Backtrack(Error),
    /// Abort the whole parse. Alternatives must not catch this.
    Cut(Error),
}

impl ErrMode {
    /// True for the fatal variant.
    #[must_use]
    pub const fn is_cut(&self) -> bool {
        matches!(self, Self::Cut(_))
    }

    /// The wrapped error.
    #[must_use]
    pub const fn error(&self) -> Error {
        match self {
            Self::Backtrack(err) | Self::Cut(err) => *err,
        }
    }
}

/// Tagged-result buckets: ordered `name → tokens` accumulation.
///
/// Buckets bubble up through sequencing, alternation and repetition, merged
/// by concatenation in source order. Empty by default without allocating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags<'s>(Option<Box<Vec<(&'static str, Vec<Token<'s>>)>>>);

impl<'s> Tags<'s> {
    /// Append `tokens` to the `name` bucket. No-op when `tokens` is empty.
    pub fn add(&mut self, name: &'static str, tokens: Vec<Token<'s>>) {
        if tokens.is_empty() {
            return;
        }
        let buckets = self.0.get_or_insert_with(Box::default);
        match buckets.iter_mut().find(|(n, _)| *n == name) {
            Some((_, bucket)) => bucket.extend(tokens),
            None => buckets.push((name, tokens)),
        }
    }

    /// Concatenate `other`'s buckets onto this map.
    pub fn merge(&mut self, other: Tags<'s>) {
        let Some(buckets) = other.0 else { return };
        for (name, tokens) in *buckets {
            self.add(name, tokens);
        }
    }

    /// Tokens collected under `name`, in source order.
    #[must_use]
    pub fn get(&self, name: &str) -> &[Token<'s>] {
        self.0
            .as_ref()
            .and_then(|buckets| buckets.iter().find(|(n, _)| *n == name))
            .map_or(&[], |(_, bucket)| bucket.as_slice())
    }

    /// True when no bucket holds any token.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// A successful parse step: the typed value, the tag buckets collected under
/// it, and the source span it covered.
#[derive(Debug, Clone)]
pub struct Match<'s, O> {
    /// The parsed value.
    pub value: O,
    /// Tag buckets accumulated by this parser and its children.
    pub tags: Tags<'s>,
    /// Bytes covered, `(pos, pos)` when nothing was consumed.
    pub span: Span,
}

impl<'s, O> Match<'s, O> {
    /// A match covering nothing at `pos`.
    pub fn empty(value: O, pos: u32) -> Self {
        Self { value, tags: Tags::default(), span: (pos, pos) }
    }

    /// Transform the value, keeping tags and span.
    pub fn map<O2>(self, f: impl FnOnce(O) -> O2) -> Match<'s, O2> {
        Match { value: f(self.value), tags: self.tags, span: self.span }
    }
}

impl<'s> Match<'s, Token<'s>> {
    /// A match for one consumed token.
    #[must_use]
    pub fn from_token(token: Token<'s>) -> Self {
        Self { value: token, tags: Tags::default(), span: token.span }
    }
}

/// Union of two spans; `(p, p)` spans count as empty.
pub(crate) fn join_spans(a: Span, b: Span) -> Span {
    if a.0 == a.1 {
        b
    } else if b.0 == b.1 {
        a
    } else {
        (a.0.min(b.0), a.1.max(b.1))
    }
}

/// Result of one parser step.
pub type PResult<'s, O> = Result<Match<'s, O>, ErrMode>;

type SkipParser<'s, St> = Rc<dyn Parser<'s, St, ()> + 's>;

/// Everything a parser runs against: the lexer, the caller's accumulation
/// state, the diagnostic remapping, and the parse budget.
pub struct ParseCtx<'s, St> {
    /// Token source. Parsers may push scoped matcher frames on it.
    pub lexer: Lexer<'s>,
    /// Application state; grammar callbacks append parsed elements here.
    pub state: St,
    /// When the lexed text is derived (preprocessed), maps positions back to
    /// the original source for diagnostics.
    pub src_map: Option<Rc<SourceMap>>,
    budget: u32,
    pre_parse: SmallVec<[SkipParser<'s, St>; 2]>,
    pre_parse_depth: u32,
    pre_parse_disabled: u32,
}

impl<'s, St> ParseCtx<'s, St> {
    /// A context with the default budget and no source map.
    pub fn new(lexer: Lexer<'s>, state: St) -> Self {
        Self {
            lexer,
            state,
            src_map: None,
            budget: DEFAULT_BUDGET,
            pre_parse: SmallVec::new(),
            pre_parse_depth: 0,
            pre_parse_disabled: 0,
        }
    }

    /// Cap the number of primitive token consumptions for this parse.
    #[must_use]
    pub fn with_budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    /// Remap diagnostics through `map` (the lexed text is derived).
    #[must_use]
    pub fn with_src_map(mut self, map: Rc<SourceMap>) -> Self {
        self.src_map = Some(map);
        self
    }

    /// Current lexer position, used to backtrack on failure.
    #[must_use]
    pub fn checkpoint(&self) -> u32 {
        self.lexer.position()
    }

    /// Restore a [`Self::checkpoint`].
    pub fn reset(&mut self, pos: u32) {
        self.lexer.set_position(pos);
    }

    /// Consume one primitive token: run pre-parse skips, charge the budget.
    ///
    /// All primitive combinators go through here; the budget is the
    /// cooperative cancellation point for pathological backtracking.
    pub fn take_token(&mut self) -> Result<Option<Token<'s>>, ErrMode> {
        self.run_pre_parse()?;
        if self.budget == 0 {
            return Err(ErrMode::Cut(Error::BudgetExhausted));
        }
        self.budget -= 1;
        Ok(self.lexer.next())
    }

    /// Report `msg` with a caret excerpt at `pos`, remapped through the
    /// source map when one is installed.
    pub fn report_at(&self, msg: &str, pos: u32) {
        if let Some((src, mapped)) = self
            .src_map
            .as_ref()
            .and_then(|map| map.map_position(pos))
        {
            sink::report_at(msg, &src, mapped);
        } else {
            sink::report_at(msg, self.lexer.src(), pos);
        }
    }

    pub(crate) fn push_pre_parse(&mut self, skip: SkipParser<'s, St>) {
        self.pre_parse.push(skip);
    }

    pub(crate) fn pop_pre_parse(&mut self) {
        self.pre_parse.pop();
    }

    pub(crate) fn disable_pre_parse(&mut self) {
        self.pre_parse_disabled += 1;
    }

    pub(crate) fn enable_pre_parse(&mut self) {
        self.pre_parse_disabled -= 1;
    }

    fn run_pre_parse(&mut self) -> Result<(), ErrMode> {
        let skipping = self.pre_parse_depth > 0 || self.pre_parse_disabled > 0;
        if skipping || self.pre_parse.is_empty() {
            return Ok(());
        }
        self.pre_parse_depth += 1;
        let result = self.run_pre_parse_loop();
        self.pre_parse_depth -= 1;
        result
    }

    // Each skip parser runs until none of them advances the lexer.
    fn run_pre_parse_loop(&mut self) -> Result<(), ErrMode> {
        loop {
            let mut advanced = false;
            for skip in self.pre_parse.clone() {
                let start = self.lexer.position();
                match skip.parse_next(self) {
                    Ok(_) => advanced |= self.lexer.position() > start,
                    Err(ErrMode::Backtrack(_)) => self.lexer.set_position(start),
                    Err(cut @ ErrMode::Cut(_)) => return Err(cut),
                }
            }
            if !advanced {
                return Ok(());
            }
        }
    }
}

/// A parser over a [`ParseCtx`] with application state `St`, producing `O`.
///
/// Implemented by matching `Fn`s, so grammar rules are plain functions, and
/// by tuples of parsers, which sequence their members.
pub trait Parser<'s, St, O> {
    /// Attempt to parse at the current position.
    ///
    /// On [`ErrMode::Backtrack`] the lexer position is restored to where it
    /// was when this parser started.
    fn parse_next(&self, ctx: &mut ParseCtx<'s, St>) -> PResult<'s, O>;
}

impl<'s, St, O, F> Parser<'s, St, O> for F
where
    F: Fn(&mut ParseCtx<'s, St>) -> PResult<'s, O>,
{
    fn parse_next(&self, ctx: &mut ParseCtx<'s, St>) -> PResult<'s, O> {
        self(ctx)
    }
}

macro_rules! impl_seq {
    ($($idx:tt $parser:ident $out:ident),+) => {
        impl<'s, St, $($parser, $out),+> Parser<'s, St, ($($out,)+)> for ($($parser,)+)
        where
            $($parser: Parser<'s, St, $out>),+
        {
            fn parse_next(&self, ctx: &mut ParseCtx<'s, St>) -> PResult<'s, ($($out,)+)> {
                let start = ctx.checkpoint();
                let mut tags = Tags::default();
                let mut span = (start, start);
                let value = ($(
                    match self.$idx.parse_next(ctx) {
                        Ok(m) => {
                            tags.merge(m.tags);
                            span = join_spans(span, m.span);
                            m.value
                        }
                        Err(err) => {
                            if !err.is_cut() {
                                ctx.reset(start);
                            }
                            return Err(err);
                        }
                    },
                )+);
                Ok(Match { value, tags, span })
            }
        }
    };
}

impl_seq!(0 P0 O0, 1 P1 O1);
impl_seq!(0 P0 O0, 1 P1 O1, 2 P2 O2);
impl_seq!(0 P0 O0, 1 P1 O1, 2 P2 O2, 3 P3 O3);
impl_seq!(0 P0 O0, 1 P1 O1, 2 P2 O2, 3 P3 O3, 4 P4 O4);
impl_seq!(0 P0 O0, 1 P1 O1, 2 P2 O2, 3 P3 O3, 4 P4 O4, 5 P5 O5);
impl_seq!(0 P0 O0, 1 P1 O1, 2 P2 O2, 3 P3 O3, 4 P4 O4, 5 P5 O5, 6 P6 O6);
impl_seq!(0 P0 O0, 1 P1 O1, 2 P2 O2, 3 P3 O3, 4 P4 O4, 5 P5 O5, 6 P6 O6, 7 P7 O7);

/// Values that can land in a tag bucket as tokens.
pub trait Taggable<'s> {
    /// Append this value's tokens to `out` in source order.
    fn tag_tokens(&self, out: &mut Vec<Token<'s>>);
}

impl<'s> Taggable<'s> for Token<'s> {
    fn tag_tokens(&self, out: &mut Vec<Token<'s>>) {
        out.push(*self);
    }
}

impl<'s, T: Taggable<'s>> Taggable<'s> for Option<T> {
    fn tag_tokens(&self, out: &mut Vec<Token<'s>>) {
        if let Some(value) = self {
            value.tag_tokens(out);
        }
    }
}

impl<'s, T: Taggable<'s>> Taggable<'s> for Vec<T> {
    fn tag_tokens(&self, out: &mut Vec<Token<'s>>) {
        for value in self {
            value.tag_tokens(out);
        }
    }
}

impl<'s, A: Taggable<'s>, B: Taggable<'s>> Taggable<'s> for (A, B) {
    fn tag_tokens(&self, out: &mut Vec<Token<'s>>) {
        self.0.tag_tokens(out);
        self.1.tag_tokens(out);
    }
}

/// Adapters available on every parser.
pub trait ParserExt<'s, St, O>: Parser<'s, St, O> + Sized {
    /// Transform the parsed value.
    fn map<O2>(self, f: impl Fn(O) -> O2) -> impl Parser<'s, St, O2> {
        move |ctx: &mut ParseCtx<'s, St>| self.parse_next(ctx).map(|m| m.map(&f))
    }

    /// On success, hand the match to `f` along with the application state.
    ///
    /// This is how the WGSL grammar appends elements to its element list.
    fn collect(self, f: impl Fn(&Match<'s, O>, &mut St)) -> impl Parser<'s, St, O> {
        move |ctx: &mut ParseCtx<'s, St>| {
            let m = self.parse_next(ctx)?;
            f(&m, &mut ctx.state);
            Ok(m)
        }
    }

    /// On success, append the matched tokens to the `name` tag bucket.
    fn tag(self, name: &'static str) -> impl Parser<'s, St, O>
    where
        O: Taggable<'s>,
    {
        move |ctx: &mut ParseCtx<'s, St>| {
            let mut m = self.parse_next(ctx)?;
            let mut tokens = Vec::new();
            m.value.tag_tokens(&mut tokens);
            m.tags.add(name, tokens);
            Ok(m)
        }
    }

    /// Pair the value with the span it covered.
    fn spanned(self) -> impl Parser<'s, St, (O, Span)> {
        move |ctx: &mut ParseCtx<'s, St>| {
            let m = self.parse_next(ctx)?;
            let span = m.span;
            Ok(m.map(|value| (value, span)))
        }
    }
}

impl<'s, St, O, P: Parser<'s, St, O>> ParserExt<'s, St, O> for P {}
