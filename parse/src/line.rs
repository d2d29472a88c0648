//! Source-line lookup for diagnostics.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// The source line containing a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcLine<'s> {
    /// The full line, without its terminator.
    pub line: &'s str,
    /// 1-based line number.
    pub line_num: u32,
    /// Byte offset of the position within `line`.
    pub line_pos: u32,
}

// Line-start arrays are memoized per source. Sources are owned by the module
// registry and outlive the link operation, so identity keying is sound here.
fn line_starts(src: &str) -> Rc<[u32]> {
    thread_local! {
        static CACHE: RefCell<HashMap<(usize, usize), Rc<[u32]>>> =
            RefCell::new(HashMap::new());
    }
    let key = (src.as_ptr() as usize, src.len());
    CACHE.with(|cache| {
        Rc::clone(cache.borrow_mut().entry(key).or_insert_with(|| {
            std::iter::once(0)
                .chain(src.match_indices('\n').map(|(i, _)| (i + 1) as u32))
                .collect()
        }))
    })
}

/// Locate `pos` in `src`. Positions past the end land on the last line.
#[must_use]
pub fn src_line(src: &str, pos: u32) -> SrcLine<'_> {
    let starts = line_starts(src);
    let line_idx = starts.partition_point(|&start| start <= pos).max(1) - 1;
    let start = starts[line_idx] as usize;
    let end = src[start..]
        .find('\n')
        .map_or(src.len(), |nl| start + nl);
    let line = src[start..end].trim_end_matches('\r');
    SrcLine {
        line,
        line_num: (line_idx + 1) as u32,
        line_pos: pos.min(end as u32).saturating_sub(start as u32),
    }
}

/// The line at `pos` with a `^` aligned under the position's column.
#[must_use]
pub fn caret_excerpt(src: &str, pos: u32) -> String {
    let SrcLine { line, line_pos, .. } = src_line(src, pos);
    let column = line
        .get(..line_pos as usize)
        .map_or(line_pos as usize, |prefix| prefix.chars().count());
    format!("{line}\n{:column$}^", "")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn first_line_is_one_based() {
        let found = src_line("fn foo()\nfn bar()", 3);
        assert_eq!(found, SrcLine { line: "fn foo()", line_num: 1, line_pos: 3 });
    }

    #[test]
    fn position_after_newline_is_next_line() {
        let found = src_line("ab\ncd", 3);
        assert_eq!(found, SrcLine { line: "cd", line_num: 2, line_pos: 0 });
    }

    #[test]
    fn caret_aligns_under_column() {
        let excerpt = caret_excerpt("let x = ?;", 8);
        assert_eq!(excerpt, "let x = ?;\n        ^");
    }

    #[test]
    fn past_the_end_lands_on_last_line() {
        let found = src_line("ab\ncd", 40);
        assert_eq!(found.line_num, 2);
        assert_eq!(found.line_pos, 2);
    }
}
