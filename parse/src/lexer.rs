//! Stateful lexer with scoped matcher frames.

use crate::matcher::{Token, TokenCursor, TokenMatcher, UNKNOWN};
use crate::sink;

/// Token kinds a [`Lexer`] silently skips, typically whitespace and comments.
pub type IgnoreSet = &'static [&'static str];

enum Frame<'s> {
    /// `with_matcher`: restores cursor and ignore set.
    Matcher(TokenCursor<'s>, IgnoreSet),
    /// `with_ignore`: restores the ignore set only.
    Ignore(IgnoreSet),
}

/// A cursor over one source string.
///
/// Wraps a [`TokenCursor`] with an ignore set and a stack of scoped frames.
/// Entering a frame swaps the active matcher (or just the ignore set) for the
/// duration of a closure; on exit the outer matcher resumes exactly where the
/// inner one stopped.
pub struct Lexer<'s> {
    src: &'s str,
    cursor: TokenCursor<'s>,
    ignore: IgnoreSet,
    frames: Vec<Frame<'s>>,
    /// Highest position an unrecognized character was reported at, so
    /// backtracking does not report the same character again.
    unknown_reported: Option<u32>,
}

impl<'s> Lexer<'s> {
    /// Lex `src` from the beginning with `matcher`, skipping `ignore` kinds.
    #[must_use]
    pub fn new(matcher: &TokenMatcher, src: &'s str, ignore: IgnoreSet) -> Self {
        Self {
            src,
            cursor: matcher.start(src, 0),
            ignore,
            frames: Vec::new(),
            unknown_reported: None,
        }
    }

    /// The source being lexed.
    #[must_use]
    pub const fn src(&self) -> &'s str {
        self.src
    }

    /// Next non-ignored token, or `None` at end of input.
    ///
    /// An unrecognized character comes back as a one-character [`UNKNOWN`]
    /// token, reported through the sink the first time it is reached.
    pub fn next(&mut self) -> Option<Token<'s>> {
        loop {
            let token = self.cursor.next()?;
            if token.kind == UNKNOWN && self.unknown_reported.map_or(true, |at| token.span.0 > at) {
                self.unknown_reported = Some(token.span.0);
                sink::report_at(
                    &format!("unrecognized character '{}'", token.text),
                    self.src,
                    token.span.0,
                );
            }
            if !self.ignore.contains(&token.kind) {
                return Some(token);
            }
        }
    }

    /// Like [`Self::next`] without advancing.
    pub fn peek(&mut self) -> Option<Token<'s>> {
        let pos = self.position();
        let token = self.next();
        self.set_position(pos);
        token
    }

    /// Current byte offset into the source.
    #[must_use]
    pub fn position(&self) -> u32 {
        self.cursor.position()
    }

    /// Move the cursor to `pos`.
    pub fn set_position(&mut self, pos: u32) {
        self.cursor.set_position(pos);
    }

    /// True when only ignored tokens (or nothing) remain.
    pub fn eof(&mut self) -> bool {
        self.peek().is_none()
    }

    /// Run `f` with `matcher` active, then restore this lexer's matcher and
    /// ignore set, re-aligned to wherever the inner matcher stopped.
    ///
    /// Restoration happens on every exit path, including unwinding.
    pub fn with_matcher<R>(
        &mut self,
        matcher: &TokenMatcher,
        ignore: IgnoreSet,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        self.push_matcher(matcher, ignore);
        let mut guard = FrameGuard { lexer: self };
        f(guard.lexer)
    }

    /// Run `f` with a different ignore set, restoring the old one after.
    pub fn with_ignore<R>(&mut self, ignore: IgnoreSet, f: impl FnOnce(&mut Self) -> R) -> R {
        self.push_ignore(ignore);
        let mut guard = FrameGuard { lexer: self };
        f(guard.lexer)
    }

    pub(crate) fn push_matcher(&mut self, matcher: &TokenMatcher, ignore: IgnoreSet) {
        let inner = matcher.start(self.src, self.position());
        let outer = std::mem::replace(&mut self.cursor, inner);
        let outer_ignore = std::mem::replace(&mut self.ignore, ignore);
        self.frames.push(Frame::Matcher(outer, outer_ignore));
    }

    pub(crate) fn push_ignore(&mut self, ignore: IgnoreSet) {
        let outer = std::mem::replace(&mut self.ignore, ignore);
        self.frames.push(Frame::Ignore(outer));
    }

    pub(crate) fn pop_frame(&mut self) {
        match self.frames.pop() {
            Some(Frame::Matcher(mut outer, outer_ignore)) => {
                outer.set_position(self.position());
                self.cursor = outer;
                self.ignore = outer_ignore;
            }
            Some(Frame::Ignore(outer)) => self.ignore = outer,
            None => unreachable!("lexer frame push/pop must be balanced"),
        }
    }
}

struct FrameGuard<'a, 's> {
    lexer: &'a mut Lexer<'s>,
}

impl Drop for FrameGuard<'_, '_> {
    fn drop(&mut self) {
        self.lexer.pop_frame();
    }
}
