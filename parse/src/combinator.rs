//! Combinators building [`Parser`]s out of other parsers.
//!
//! Sequencing is done with plain tuples (`(text("fn"), kind("ident"))`),
//! alternation with [`or`], which tries members in declaration order and
//! backtracks the lexer between attempts. There is no longest-match rule.

use std::rc::Rc;

use crate::lexer::IgnoreSet;
use crate::matcher::{Token, TokenMatcher};
use crate::parser::{join_spans, ErrMode, Error, Match, ParseCtx, Parser, PResult};
#[cfg(feature = "trace_parser")]
use crate::sink;

fn got_kind(got: Option<Token>) -> &'static str {
    got.map_or("eof", |token| token.kind)
}

/// Match a token whose text equals `lit`.
pub fn text<'s, St>(lit: &'static str) -> impl Parser<'s, St, Token<'s>> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let start = ctx.checkpoint();
        match ctx.take_token()? {
            Some(token) if token.text == lit => Ok(Match::from_token(token)),
            got => {
                ctx.reset(start);
                Err(ErrMode::Backtrack(Error::Expected { wanted: lit, got: got_kind(got) }))
            }
        }
    }
}

/// Match a token of kind `k`.
pub fn kind<'s, St>(k: &'static str) -> impl Parser<'s, St, Token<'s>> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let start = ctx.checkpoint();
        match ctx.take_token()? {
            Some(token) if token.kind == k => Ok(Match::from_token(token)),
            got => {
                ctx.reset(start);
                Err(ErrMode::Backtrack(Error::Expected { wanted: k, got: got_kind(got) }))
            }
        }
    }
}

/// Match any single token.
pub fn any<'s, St>() -> impl Parser<'s, St, Token<'s>> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let start = ctx.checkpoint();
        match ctx.take_token()? {
            Some(token) => Ok(Match::from_token(token)),
            None => {
                ctx.reset(start);
                Err(ErrMode::Backtrack(Error::Expected { wanted: "any token", got: "eof" }))
            }
        }
    }
}

/// List of alternatives for [`or`]. Implemented for tuples of parsers that
/// share an output type.
pub trait AltList<'s, St, O> {
    /// Try each alternative in order, backtracking between attempts.
    fn choice(&self, ctx: &mut ParseCtx<'s, St>) -> PResult<'s, O>;
}

macro_rules! impl_alt {
    ($($idx:tt $parser:ident),+) => {
        impl<'s, St, O, $($parser: Parser<'s, St, O>),+> AltList<'s, St, O> for ($($parser,)+) {
            fn choice(&self, ctx: &mut ParseCtx<'s, St>) -> PResult<'s, O> {
                let start = ctx.checkpoint();
                let mut last = Error::Expected { wanted: "one of the alternatives", got: "eof" };
                $(
                    match self.$idx.parse_next(ctx) {
                        Ok(m) => return Ok(m),
                        Err(ErrMode::Backtrack(err)) => {
                            ctx.reset(start);
                            last = err;
                        }
                        Err(cut) => return Err(cut),
                    }
                )+
                Err(ErrMode::Backtrack(last))
            }
        }
    };
}

impl_alt!(0 P0, 1 P1);
impl_alt!(0 P0, 1 P1, 2 P2);
impl_alt!(0 P0, 1 P1, 2 P2, 3 P3);
impl_alt!(0 P0, 1 P1, 2 P2, 3 P3, 4 P4);
impl_alt!(0 P0, 1 P1, 2 P2, 3 P3, 4 P4, 5 P5);
impl_alt!(0 P0, 1 P1, 2 P2, 3 P3, 4 P4, 5 P5, 6 P6);
impl_alt!(0 P0, 1 P1, 2 P2, 3 P3, 4 P4, 5 P5, 6 P6, 7 P7);

/// First alternative that matches wins. No longest-match.
pub fn or<'s, St, O>(alternatives: impl AltList<'s, St, O>) -> impl Parser<'s, St, O> {
    move |ctx: &mut ParseCtx<'s, St>| alternatives.choice(ctx)
}

/// Always succeeds; `None` without advancing when `p` does not match.
pub fn opt<'s, St, O>(p: impl Parser<'s, St, O>) -> impl Parser<'s, St, Option<O>> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let start = ctx.checkpoint();
        match p.parse_next(ctx) {
            Ok(m) => Ok(m.map(Some)),
            Err(ErrMode::Backtrack(_)) => {
                ctx.reset(start);
                Ok(Match::empty(None, start))
            }
            Err(cut) => Err(cut),
        }
    }
}

/// Zero or more `p`, stopping at the first failure without consuming it.
pub fn repeat<'s, St, O>(p: impl Parser<'s, St, O>) -> impl Parser<'s, St, Vec<O>> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let start = ctx.checkpoint();
        let mut out = Match::empty(Vec::new(), start);
        repeat_into(&p, ctx, &mut out)?;
        Ok(out)
    }
}

/// One or more `p`.
pub fn repeat_plus<'s, St, O>(p: impl Parser<'s, St, O>) -> impl Parser<'s, St, Vec<O>> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let first = p.parse_next(ctx)?;
        let mut out = first.map(|value| vec![value]);
        repeat_into(&p, ctx, &mut out)?;
        Ok(out)
    }
}

fn repeat_into<'s, St, O>(
    p: &impl Parser<'s, St, O>,
    ctx: &mut ParseCtx<'s, St>,
    out: &mut Match<'s, Vec<O>>,
) -> Result<(), ErrMode> {
    loop {
        let attempt = ctx.checkpoint();
        match p.parse_next(ctx) {
            // A parser that succeeds without consuming would repeat forever.
            Ok(_) if ctx.checkpoint() == attempt => return Ok(()),
            Ok(m) => {
                out.tags.merge(m.tags);
                out.span = join_spans(out.span, m.span);
                out.value.push(m.value);
            }
            Err(ErrMode::Backtrack(_)) => {
                ctx.reset(attempt);
                return Ok(());
            }
            Err(cut) => return Err(cut),
        }
    }
}

/// `p (sep p)*` with an optional trailing separator. An empty list succeeds.
pub fn with_sep<'s, St, O, S>(
    sep: impl Parser<'s, St, S>,
    p: impl Parser<'s, St, O>,
) -> impl Parser<'s, St, Vec<O>> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let start = ctx.checkpoint();
        let mut out = Match::empty(Vec::new(), start);
        let first = match p.parse_next(ctx) {
            Ok(m) => m,
            Err(ErrMode::Backtrack(_)) => {
                ctx.reset(start);
                return Ok(out);
            }
            Err(cut) => return Err(cut),
        };
        out.tags.merge(first.tags);
        out.span = join_spans(out.span, first.span);
        out.value.push(first.value);
        loop {
            let attempt = ctx.checkpoint();
            let sep_match = match sep.parse_next(ctx) {
                Ok(m) => m,
                Err(ErrMode::Backtrack(_)) => {
                    ctx.reset(attempt);
                    return Ok(out);
                }
                Err(cut) => return Err(cut),
            };
            match p.parse_next(ctx) {
                Ok(m) => {
                    out.tags.merge(sep_match.tags);
                    out.tags.merge(m.tags);
                    out.span = join_spans(out.span, m.span);
                    out.value.push(m.value);
                }
                // Trailing separator: keep it consumed.
                Err(ErrMode::Backtrack(_)) => {
                    out.span = join_spans(out.span, sep_match.span);
                    return Ok(out);
                }
                Err(cut) => return Err(cut),
            }
        }
    }
}

/// If `p` fails, report `expected {wanted}` at the failure position and
/// continue with a `None` value so the caller can resynchronize.
pub fn req<'s, St, O>(
    p: impl Parser<'s, St, O>,
    wanted: &'static str,
) -> impl Parser<'s, St, Option<O>> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let start = ctx.checkpoint();
        match p.parse_next(ctx) {
            Ok(m) => Ok(m.map(Some)),
            Err(ErrMode::Backtrack(_)) => {
                ctx.reset(start);
                let pos = ctx.lexer.peek().map_or(start, |token| token.span.0);
                ctx.report_at(&format!("expected {wanted}"), pos);
                Ok(Match::empty(None, start))
            }
            Err(cut) => Err(cut),
        }
    }
}

/// Like [`req`], but anchor the diagnostic caret at `at` instead of the
/// failure position.
///
/// Delimited rules use this to point at the opening delimiter when the
/// closing one never arrives, which reads better than a caret at wherever
/// the list happened to stop.
pub fn req_at<'s, St, O>(
    p: impl Parser<'s, St, O>,
    wanted: &'static str,
    at: u32,
) -> impl Parser<'s, St, Option<O>> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let start = ctx.checkpoint();
        match p.parse_next(ctx) {
            Ok(m) => Ok(m.map(Some)),
            Err(ErrMode::Backtrack(_)) => {
                ctx.reset(start);
                ctx.report_at(&format!("expected {wanted}"), at);
                Ok(Match::empty(None, start))
            }
            Err(cut) => Err(cut),
        }
    }
}

/// Consume one token, unless `p` would match at the current position.
pub fn any_not<'s, St, O>(p: impl Parser<'s, St, O>) -> impl Parser<'s, St, Token<'s>> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let start = ctx.checkpoint();
        match p.parse_next(ctx) {
            Ok(_) => {
                ctx.reset(start);
                Err(ErrMode::Backtrack(Error::Expected {
                    wanted: "any other token",
                    got: "stop parser match",
                }))
            }
            Err(ErrMode::Backtrack(_)) => {
                ctx.reset(start);
                match ctx.take_token()? {
                    Some(token) => Ok(Match::from_token(token)),
                    None => {
                        ctx.reset(start);
                        Err(ErrMode::Backtrack(Error::Expected {
                            wanted: "any token",
                            got: "eof",
                        }))
                    }
                }
            }
            Err(cut) => Err(cut),
        }
    }
}

/// Consume tokens up to and including the first match of `p`; produces `p`'s
/// value, spanning from the first consumed token.
pub fn any_through<'s, St, O>(p: impl Parser<'s, St, O>) -> impl Parser<'s, St, O> {
    move |ctx: &mut ParseCtx<'s, St>| {
        let start = ctx.checkpoint();
        let mut span = (start, start);
        loop {
            let attempt = ctx.checkpoint();
            match p.parse_next(ctx) {
                Ok(mut m) => {
                    m.span = join_spans(span, m.span);
                    return Ok(m);
                }
                Err(ErrMode::Backtrack(_)) => {
                    ctx.reset(attempt);
                    match ctx.take_token()? {
                        Some(token) => span = join_spans(span, token.span),
                        None => {
                            ctx.reset(start);
                            return Err(ErrMode::Backtrack(Error::Expected {
                                wanted: "stop parser before eof",
                                got: "eof",
                            }));
                        }
                    }
                }
                Err(cut) => return Err(cut),
            }
        }
    }
}

/// Run `p` with `matcher` (and `ignore`) active on the lexer; the outer
/// matcher resumes wherever `p` stopped.
pub fn tokens<'s, St, O>(
    matcher: &'static TokenMatcher,
    ignore: IgnoreSet,
    p: impl Parser<'s, St, O>,
) -> impl Parser<'s, St, O> {
    move |ctx: &mut ParseCtx<'s, St>| {
        ctx.lexer.push_matcher(matcher, ignore);
        let result = p.parse_next(ctx);
        ctx.lexer.pop_frame();
        result
    }
}

/// While `p` runs, try `skip` before every primitive token consumption.
///
/// Used for constructs the ignore set cannot express, like nestable block
/// comments.
pub fn pre_parse<'s, St: 's, O>(
    skip: impl Parser<'s, St, ()> + 's,
    p: impl Parser<'s, St, O>,
) -> impl Parser<'s, St, O> {
    let skip: Rc<dyn Parser<'s, St, ()> + 's> = Rc::new(skip);
    move |ctx: &mut ParseCtx<'s, St>| {
        ctx.push_pre_parse(Rc::clone(&skip));
        let result = p.parse_next(ctx);
        ctx.pop_pre_parse();
        result
    }
}

/// Suppress any enclosing [`pre_parse`] skips while `p` runs.
pub fn disable_pre_parse<'s, St, O>(p: impl Parser<'s, St, O>) -> impl Parser<'s, St, O> {
    move |ctx: &mut ParseCtx<'s, St>| {
        ctx.disable_pre_parse();
        let result = p.parse_next(ctx);
        ctx.enable_pre_parse();
        result
    }
}

/// Name a parser for tracing. Entry/exit lines go through the report sink
/// when the `trace_parser` feature is on and tracing is enabled at runtime.
pub fn trace<'s, St, O>(name: &'static str, p: impl Parser<'s, St, O>) -> impl Parser<'s, St, O> {
    move |ctx: &mut ParseCtx<'s, St>| {
        #[cfg(feature = "trace_parser")]
        if sink::trace_enabled() {
            let token = ctx.lexer.peek();
            let pos = ctx.lexer.position();
            sink::trace_line(&format!("{name}? @{pos} {token:?}"));
            let result = p.parse_next(ctx);
            let outcome = if result.is_ok() { "ok" } else { "fail" };
            sink::trace_line(&format!("{name} {outcome}"));
            return result;
        }
        #[cfg(not(feature = "trace_parser"))]
        let _ = name;
        p.parse_next(ctx)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::sync::LazyLock;

    use super::*;
    use crate::lexer::Lexer;
    use crate::matcher::one_of;
    use crate::parser::ParserExt;
    use crate::sink::capture_reports;

    static MATCHER: LazyLock<TokenMatcher> = LazyLock::new(|| {
        TokenMatcher::new(&[
            ("ident", r"[a-z]+"),
            ("ws", r"\s+"),
            ("symbol", &one_of("( ) [ ] { } @ ; ,")),
        ])
    });

    const WS: IgnoreSet = &["ws"];

    fn ctx(src: &str) -> ParseCtx<'_, ()> {
        ParseCtx::new(Lexer::new(&MATCHER, src, WS), ())
    }

    #[test]
    fn seq_parses_fn_signature() {
        // `seq("fn", ident, "(", ")")` over `fn foo()`.
        let src = "fn foo()";
        let mut ctx = ctx(src);
        let p = (text("fn"), kind("ident"), text("("), text(")"));
        let m = p.parse_next(&mut ctx).unwrap();
        assert_eq!(m.value.1.text, "foo");
        assert_eq!(ctx.lexer.position(), src.len() as u32);
    }

    #[test]
    fn or_backtracks_to_entry_position() {
        let mut ctx = ctx("fn foo");
        ctx.lexer.next();
        let before = ctx.checkpoint();
        let p = or(((text("fn"), text("bar")), (kind("ident"), text("zip"))));
        assert!(p.parse_next(&mut ctx).is_err());
        assert_eq!(ctx.checkpoint(), before);
    }

    #[test]
    fn or_first_success_wins() {
        let mut ctx = ctx("foo");
        let p = or((text("foo").map(|_| 1), kind("ident").map(|_| 2)));
        assert_eq!(p.parse_next(&mut ctx).unwrap().value, 1);
    }

    #[test]
    fn opt_success_without_advance_on_failure() {
        let mut ctx = ctx("foo");
        let m = opt(text("bar")).parse_next(&mut ctx).unwrap();
        assert_eq!(m.value, None);
        assert_eq!(ctx.checkpoint(), 0);
    }

    #[test]
    fn repeat_collects_in_order() {
        let mut ctx = ctx("a b c;");
        let m = repeat(kind("ident")).parse_next(&mut ctx).unwrap();
        let texts: Vec<_> = m.value.iter().map(|t| t.text).collect();
        assert_eq!(texts, ["a", "b", "c"]);
        // The `;` is left unconsumed.
        assert_eq!(ctx.lexer.next().unwrap().text, ";");
    }

    #[test]
    fn with_sep_allows_trailing_separator() {
        let mut ctx = ctx("a, b, )");
        let m = with_sep(text(","), kind("ident")).parse_next(&mut ctx).unwrap();
        assert_eq!(m.value.len(), 2);
        assert_eq!(ctx.lexer.next().unwrap().text, ")");
    }

    #[test]
    fn req_reports_and_resynchronizes() {
        let (value, reports) = capture_reports(|| {
            let mut ctx = ctx("fn foo;");
            let p = (text("fn"), kind("ident"), req(text("("), "text '('"));
            let m = p.parse_next(&mut ctx).unwrap();
            assert_eq!(m.value.2, None);
            // Parsing continues after the report.
            text(";").parse_next(&mut ctx).unwrap().value.text.to_owned()
        });
        assert_eq!(value, ";");
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("expected text '('"), "{}", reports[0]);
        assert!(reports[0].contains('^'), "{}", reports[0]);
    }

    #[test]
    fn req_at_anchors_the_caret_on_the_opener() {
        let ((), reports) = capture_reports(|| {
            let mut ctx = ctx("( a ;");
            let open = text("(").parse_next(&mut ctx).unwrap();
            kind("ident").parse_next(&mut ctx).unwrap();
            let m = req_at(text(")"), "text ')'", open.value.span.0)
                .parse_next(&mut ctx)
                .unwrap();
            assert_eq!(m.value, None);
        });
        assert_eq!(reports.len(), 1);
        let lines: Vec<&str> = reports[0].lines().collect();
        assert_eq!(lines[0], "expected text ')'");
        assert_eq!(lines[1], "( a ;");
        assert_eq!(lines[2], "^");
    }

    #[test]
    fn tags_bubble_and_merge_in_source_order() {
        let mut ctx = ctx("a b c");
        let p = (
            kind("ident").tag("name"),
            kind("ident").tag("name"),
            kind("ident").tag("other"),
        );
        let m = p.parse_next(&mut ctx).unwrap();
        let names: Vec<_> = m.tags.get("name").iter().map(|t| t.text).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(m.tags.get("other")[0].text, "c");
    }

    #[test]
    fn any_through_consumes_up_to_stop() {
        let mut ctx = ctx("a b ; c");
        let m = any_through(text(";")).parse_next(&mut ctx).unwrap();
        assert_eq!(m.value.text, ";");
        assert_eq!(ctx.lexer.next().unwrap().text, "c");
    }

    #[test]
    fn any_not_refuses_stop_token() {
        let mut ctx = ctx("; a");
        assert!(any_not(text(";")).parse_next(&mut ctx).is_err());
        assert_eq!(ctx.checkpoint(), 0);
    }

    #[test]
    fn budget_exhaustion_is_fatal() {
        let src = "a a a a a a a a";
        let lexer = Lexer::new(&MATCHER, src, WS);
        let mut ctx = ParseCtx::new(lexer, ()).with_budget(3);
        let result = repeat(kind("ident")).parse_next(&mut ctx);
        assert_eq!(result.unwrap_err(), ErrMode::Cut(Error::BudgetExhausted));
    }

    #[test]
    fn pre_parse_skips_before_primitives() {
        static COMMENT: LazyLock<TokenMatcher> = LazyLock::new(|| {
            TokenMatcher::new(&[
                ("comment", r"//[^\n]*"),
                ("ident", r"[a-z]+"),
                ("ws", r"\s+"),
                ("symbol", &one_of("( ) ;")),
            ])
        });
        let src = "a // note\nb";
        let mut ctx = ParseCtx::new(Lexer::new(&COMMENT, src, WS), ());
        let skip = kind("comment").map(|_| ());
        let p = pre_parse(skip, (kind("ident"), kind("ident")));
        let m = p.parse_next(&mut ctx).unwrap();
        assert_eq!(m.value.1.text, "b");
    }

    #[test]
    fn spanned_covers_consumed_bytes() {
        let mut ctx = ctx("fn foo()");
        let p = (text("fn"), kind("ident")).spanned();
        let m = p.parse_next(&mut ctx).unwrap();
        assert_eq!(m.value.1, (0, 6));
    }
}
