//! Conditional compilation: `#if cond` / `#else` / `#endif`.
//!
//! Runs before parsing. Disabled regions and the directive lines themselves
//! are replaced by spaces of the same byte length, so every surviving
//! character keeps its original position and diagnostics stay accurate
//! without any arithmetic. The returned source map covers the enabled runs.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use weld_parse::sink::report;
use weld_parse::{line::src_line, MapEntry, SourceMap};

/// A preprocessed module source: derived text plus its source map.
#[derive(Debug, Clone)]
pub struct Prepped {
    /// The derived text, same length as the input.
    pub text: Rc<str>,
    /// Maps positions in `text` back to the input.
    pub src_map: Rc<SourceMap>,
}

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?://\s*)?#(if|else|endif)\b\s*(.*?)\s*$").expect("valid directive regex")
});

struct Frame {
    /// Whether the surrounding region is enabled.
    parent: bool,
    /// Whether the current branch of this `#if` is enabled.
    branch: bool,
    /// Whether any branch of this `#if` has been taken.
    taken: bool,
    /// Position of the `#if`, for unterminated-directive reports.
    pos: u32,
}

/// Evaluate conditional-compilation directives over `conditions`.
///
/// Unknown parameters evaluate to `false`. Stray or unterminated directives
/// are reported through the sink and otherwise ignored.
#[must_use]
pub fn process(src: &Rc<str>, conditions: &HashMap<String, bool>) -> Prepped {
    if !src.contains('#') {
        return Prepped {
            text: Rc::clone(src),
            src_map: Rc::new(SourceMap::identity(src)),
        };
    }

    let mut text = String::with_capacity(src.len());
    let mut stack: Vec<Frame> = Vec::new();
    let mut run_start: Option<u32> = None;
    let mut entries: Vec<(u32, u32)> = Vec::new();

    let mut close_run = |run_start: &mut Option<u32>, end: u32| {
        if let Some(start) = run_start.take() {
            if start < end {
                entries.push((start, end));
            }
        }
    };

    for (line, start) in lines_with_offsets(src) {
        let enabled = stack.last().map_or(true, |frame| frame.parent && frame.branch);
        let directive = DIRECTIVE.captures(line);
        let keep = directive.is_none() && enabled;

        if let Some(caps) = &directive {
            let expr = caps.get(2).map_or("", |m| m.as_str());
            match &caps[1] {
                "if" => {
                    let branch = eval_term(expr, conditions, src, start);
                    stack.push(Frame { parent: enabled, branch, taken: branch, pos: start });
                }
                "else" => match stack.last_mut() {
                    Some(frame) => {
                        frame.branch = !frame.taken;
                        frame.taken = true;
                    }
                    None => report_at_line(src, start, "#else without a matching #if"),
                },
                "endif" => {
                    if stack.pop().is_none() {
                        report_at_line(src, start, "#endif without a matching #if");
                    }
                }
                _ => unreachable!(),
            }
        }

        if keep {
            run_start.get_or_insert(start);
            text.push_str(line);
        } else {
            close_run(&mut run_start, start);
            text.extend(std::iter::repeat(' ').take(line.len()));
        }
        // The line terminator survives either way, keeping line numbers.
        let terminator_start = start as usize + line.len();
        let terminator_end = terminator(src, terminator_start);
        text.push_str(&src[terminator_start..terminator_end]);
    }
    close_run(&mut run_start, src.len() as u32);

    for frame in &stack {
        report_at_line(src, frame.pos, "#if without a matching #endif");
    }

    let text: Rc<str> = Rc::from(text);
    let mut map = SourceMap::new(Rc::clone(&text));
    for (start, end) in entries {
        map.add(MapEntry::copied(src, start, end, start));
    }
    Prepped { text, src_map: Rc::new(map) }
}

fn terminator(src: &str, from: usize) -> usize {
    let bytes = src.as_bytes();
    let mut end = from;
    if bytes.get(end) == Some(&b'\r') {
        end += 1;
    }
    if bytes.get(end) == Some(&b'\n') {
        end += 1;
    }
    end
}

fn lines_with_offsets(src: &str) -> impl Iterator<Item = (&str, u32)> {
    let mut offset = 0usize;
    std::iter::from_fn(move || {
        if offset >= src.len() {
            return None;
        }
        let start = offset;
        let rest = &src[start..];
        let line_len = rest.find('\n').map_or(rest.len(), |nl| nl);
        let line = rest[..line_len].strip_suffix('\r').unwrap_or(&rest[..line_len]);
        offset = terminator(src, start + line.len());
        Some((line, start as u32))
    })
}

fn eval_term(expr: &str, conditions: &HashMap<String, bool>, src: &str, pos: u32) -> bool {
    let expr = expr.trim();
    match expr {
        "true" => true,
        "false" => false,
        _ => {
            let (negated, name) = expr
                .strip_prefix('!')
                .map_or((false, expr), |rest| (true, rest.trim()));
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                report_at_line(src, pos, &format!("cannot evaluate #if condition '{expr}'"));
                return false;
            }
            let value = conditions.get(name).copied().unwrap_or(false);
            value != negated
        }
    }
}

fn report_at_line(src: &str, pos: u32, msg: &str) {
    let line = src_line(src, pos);
    report(&format!("{msg}\n{}", line.line));
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use weld_parse::sink::capture_reports;

    use super::*;

    fn conditions(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
    }

    fn run(src: &str, pairs: &[(&str, bool)]) -> Prepped {
        process(&Rc::from(src), &conditions(pairs))
    }

    #[test]
    fn no_directives_is_identity() {
        let src: Rc<str> = Rc::from("fn f() {}\n");
        let prepped = process(&src, &HashMap::new());
        assert!(Rc::ptr_eq(&prepped.text, &src));
    }

    #[test]
    fn disabled_region_becomes_spaces_with_lines_kept() {
        let prepped = run("#if foo\nfn f(){}\n#endif\n", &[("foo", false)]);
        assert_eq!(&*prepped.text, "       \n        \n      \n");
        assert_eq!(prepped.text.len(), "#if foo\nfn f(){}\n#endif\n".len());
    }

    #[test]
    fn enabled_region_keeps_positions() {
        let src = "#if foo\nfn f(){}\n#endif\n";
        let prepped = run(src, &[("foo", true)]);
        assert_eq!(&*prepped.text, "       \nfn f(){}\n      \n");
        let body_pos = src.find("fn").unwrap() as u32;
        let (mapped_src, mapped_pos) = prepped.src_map.map_position(body_pos).unwrap();
        assert_eq!(mapped_pos, body_pos);
        assert_eq!(&mapped_src[mapped_pos as usize..][..2], "fn");
    }

    #[test]
    fn else_takes_the_other_branch() {
        let prepped = run("#if foo\na\n#else\nb\n#endif\n", &[("foo", false)]);
        assert_eq!(&*prepped.text, "       \n \n     \nb\n      \n");
    }

    #[test]
    fn negation_and_comment_prefix() {
        let prepped = run("// #if !foo\nkept\n// #endif\n", &[("foo", false)]);
        assert!(prepped.text.contains("kept"));
    }

    #[test]
    fn nested_ifs_use_a_stack() {
        let src = "#if a\nx\n#if b\ny\n#endif\nz\n#endif\n";
        let prepped = run(src, &[("a", true), ("b", false)]);
        assert!(prepped.text.contains('x'));
        assert!(!prepped.text.contains('y'));
        assert!(prepped.text.contains('z'));
    }

    #[test]
    fn map_round_trips_enabled_characters() {
        let src = "lead\n#if foo\ngone\n#endif\ntail\n";
        let prepped = run(src, &[("foo", false)]);
        for (pos, ch) in prepped.text.char_indices() {
            if ch.is_whitespace() {
                continue;
            }
            let (mapped_src, mapped_pos) = prepped.src_map.map_position(pos as u32).unwrap();
            assert_eq!(
                mapped_src.as_bytes()[mapped_pos as usize] as char,
                ch,
                "position {pos}"
            );
        }
    }

    #[test]
    fn stray_endif_is_reported_not_fatal() {
        let (prepped, reports) = capture_reports(|| run("a\n#endif\nb\n", &[]));
        assert!(prepped.text.contains('a') && prepped.text.contains('b'));
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("#endif without a matching #if"));
    }

    #[test]
    fn unterminated_if_is_reported() {
        let ((), reports) = capture_reports(|| {
            run("#if foo\nx\n", &[("foo", true)]);
        });
        assert!(reports[0].contains("#if without a matching #endif"));
    }
}
