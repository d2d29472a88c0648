//! Regex-set token matchers.
//!
//! A [`TokenMatcher`] is an ordered list of `(kind, pattern)` pairs compiled
//! into a single regex alternation. Alternation in the `regex` crate is
//! preference-ordered, so earlier patterns win ties, which is exactly the
//! priority rule we want for things like keywords vs identifiers.

use std::fmt;

use regex::Regex;

/// Token kind emitted for a character no pattern matches.
pub const UNKNOWN: &str = "unknown";

/// Half-open byte range `[start, end)` into a specific source string.
pub type Span = (u32, u32);

/// One lexed token. Borrows its text from the source it was matched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'s> {
    /// Name of the pattern that matched, or [`UNKNOWN`].
    pub kind: &'static str,
    /// The matched text.
    pub text: &'s str,
    /// Where `text` sits in the source the matcher was started on.
    pub span: Span,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.text, self.kind)
    }
}

/// An ordered set of named patterns, compiled once, cheap to clone.
///
/// Patterns must not be able to match the empty string and should not use
/// named capture groups (the matcher claims the `g<i>` names for itself).
#[derive(Debug, Clone)]
pub struct TokenMatcher {
    combined: Regex,
    kinds: Vec<&'static str>,
    groups: Vec<String>,
}

impl TokenMatcher {
    /// Compile `patterns` into a matcher.
    ///
    /// # Panics
    /// Panics if a pattern is not a valid regex. Matchers are built from
    /// grammar tables at startup, so this is a programming error.
    #[must_use]
    pub fn new(patterns: &[(&'static str, &str)]) -> Self {
        let group = |i| format!("g{i}");
        let alternation = patterns
            .iter()
            .enumerate()
            .map(|(i, (_, pat))| format!("(?P<{}>{pat})", group(i)))
            .collect::<Vec<_>>()
            .join("|");
        let combined = Regex::new(&alternation)
            .unwrap_or_else(|err| panic!("invalid token pattern in matcher: {err}"));
        let kinds = patterns.iter().map(|(kind, _)| *kind).collect();
        let groups = (0..patterns.len()).map(group).collect();
        Self { combined, kinds, groups }
    }

    /// Bind this matcher to `src`, with the cursor placed at `pos`.
    #[must_use]
    pub fn start<'s>(&self, src: &'s str, pos: u32) -> TokenCursor<'s> {
        TokenCursor { matcher: self.clone(), src, pos }
    }
}

/// A [`TokenMatcher`] bound to one source string.
#[derive(Debug, Clone)]
pub struct TokenCursor<'s> {
    matcher: TokenMatcher,
    src: &'s str,
    pos: u32,
}

impl<'s> TokenCursor<'s> {
    /// The source this cursor reads from.
    #[must_use]
    pub const fn src(&self) -> &'s str {
        self.src
    }

    /// Current byte offset into the source.
    #[must_use]
    pub const fn position(&self) -> u32 {
        self.pos
    }

    /// Move the cursor. `pos` must be a char boundary in the source.
    pub fn set_position(&mut self, pos: u32) {
        debug_assert!(self.src.is_char_boundary(pos as usize));
        self.pos = pos;
    }

    /// Lex the next token, or `None` at end of input.
    ///
    /// A character no pattern matches produces a one-character [`UNKNOWN`]
    /// token rather than an error, so the caller can recover.
    pub fn next(&mut self) -> Option<Token<'s>> {
        let start = self.pos as usize;
        if start >= self.src.len() {
            return None;
        }
        let caps = self.matcher.combined.captures_at(self.src, start);
        let matched = caps.as_ref().and_then(|caps| {
            let full = caps.get(0)?;
            (full.start() == start && full.end() > full.start()).then_some(caps)
        });
        let Some(caps) = matched else {
            return Some(self.unknown_token(start));
        };
        for (kind, group) in self.matcher.kinds.iter().zip(&self.matcher.groups) {
            if let Some(m) = caps.name(group) {
                let span = (m.start() as u32, m.end() as u32);
                self.pos = span.1;
                return Some(Token { kind, text: m.as_str(), span });
            }
        }
        // A group always corresponds to the full match.
        unreachable!("combined regex matched without a named group")
    }

    fn unknown_token(&mut self, start: usize) -> Token<'s> {
        let char_len = self.src[start..]
            .chars()
            .next()
            .map_or(1, char::len_utf8);
        let span = (start as u32, (start + char_len) as u32);
        self.pos = span.1;
        Token { kind: UNKNOWN, text: &self.src[start..start + char_len], span }
    }
}

/// Escape a space-separated list of literal symbols into a single pattern.
///
/// Longer symbols sort first so `->` is preferred over `-` by the
/// alternation's preference order.
#[must_use]
pub fn one_of(symbols: &str) -> String {
    let mut symbols: Vec<&str> = symbols.split_ascii_whitespace().collect();
    symbols.sort_by_key(|sym| std::cmp::Reverse(sym.len()));
    let escaped: Vec<String> = symbols.iter().map(|sym| regex::escape(sym)).collect();
    escaped.join("|")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn wgsl_like() -> TokenMatcher {
        TokenMatcher::new(&[
            ("ident", r"[a-zA-Z_][a-zA-Z0-9_]*"),
            ("ws", r"\s+"),
            ("symbol", &one_of("( ) { } -> ; , -")),
        ])
    }

    fn kinds<'s>(cursor: &mut TokenCursor<'s>) -> Vec<Token<'s>> {
        std::iter::from_fn(|| cursor.next()).collect()
    }

    #[test]
    fn tokens_in_priority_order() {
        let matcher = wgsl_like();
        let mut cursor = matcher.start("fn foo()", 0);
        let texts: Vec<_> = kinds(&mut cursor).iter().map(|t| t.text).collect();
        assert_eq!(texts, ["fn", " ", "foo", "(", ")"]);
        assert_eq!(cursor.position(), 8);
    }

    #[test]
    fn longest_symbol_wins() {
        let matcher = wgsl_like();
        let mut cursor = matcher.start("->-", 0);
        let texts: Vec<_> = kinds(&mut cursor).iter().map(|t| t.text).collect();
        assert_eq!(texts, ["->", "-"]);
    }

    #[test]
    fn unknown_character_is_one_token() {
        let matcher = wgsl_like();
        let mut cursor = matcher.start("a % b", 0);
        let tokens = kinds(&mut cursor);
        assert_eq!(tokens[2].kind, UNKNOWN);
        assert_eq!(tokens[2].text, "%");
        assert_eq!(tokens[2].span, (2, 3));
    }

    #[test]
    fn spans_index_the_bound_source() {
        let matcher = wgsl_like();
        let mut cursor = matcher.start("fn foo()", 3);
        let token = cursor.next().unwrap();
        assert_eq!(token.text, "foo");
        assert_eq!(token.span, (3, 6));
    }

    #[test]
    fn restart_is_cheap_realignment() {
        let matcher = wgsl_like();
        let mut cursor = matcher.start("fn foo", 0);
        cursor.next();
        cursor.set_position(0);
        assert_eq!(cursor.next().unwrap().text, "fn");
    }
}
