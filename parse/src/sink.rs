//! The report sink.
//!
//! All parser diagnostics and trace lines funnel through one thread-local
//! sink function. By default reports go to the [`log`] facade; tests and
//! embedders can swap in a capturing sink for the duration of a closure with
//! [`with_sink`]. The binding is scoped and restored on every exit path, so
//! a panicking closure cannot leak a sink into unrelated code.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::line::caret_excerpt;

type SinkFn = Rc<dyn Fn(&str)>;

thread_local! {
    static SINK: RefCell<Option<SinkFn>> = const { RefCell::new(None) };
    static TRACE: Cell<bool> = const { Cell::new(false) };
}

/// Send one diagnostic line to the current sink.
pub fn report(msg: &str) {
    let sink = SINK.with(|slot| slot.borrow().clone());
    match sink {
        Some(sink) => sink(msg),
        None => log::error!("{msg}"),
    }
}

/// Report `msg` with the source line at `pos` and a caret under the column.
pub fn report_at(msg: &str, src: &str, pos: u32) {
    report(&format!("{msg}\n{}", caret_excerpt(src, pos)));
}

/// Run `f` with `sink` receiving every report, then restore the old sink.
pub fn with_sink<R>(sink: impl Fn(&str) + 'static, f: impl FnOnce() -> R) -> R {
    let old = SINK.with(|slot| slot.replace(Some(Rc::new(sink))));
    let _restore = RestoreSink(old);
    f()
}

/// Run `f` and collect every report it produced.
pub fn capture_reports<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
    let buffer = Rc::new(RefCell::new(Vec::new()));
    let writer = Rc::clone(&buffer);
    let result = with_sink(move |msg| writer.borrow_mut().push(msg.to_owned()), f);
    let reports = buffer.take();
    (result, reports)
}

struct RestoreSink(Option<SinkFn>);

impl Drop for RestoreSink {
    fn drop(&mut self) {
        SINK.with(|slot| *slot.borrow_mut() = self.0.take());
    }
}

/// Whether parser tracing is enabled on this thread.
///
/// Without the `trace_parser` cargo feature this flag is never read.
#[must_use]
pub fn trace_enabled() -> bool {
    TRACE.with(Cell::get)
}

/// Run `f` with parser tracing enabled.
pub fn with_trace<R>(f: impl FnOnce() -> R) -> R {
    let old = TRACE.with(|flag| flag.replace(true));
    let _restore = RestoreTrace(old);
    f()
}

struct RestoreTrace(bool);

impl Drop for RestoreTrace {
    fn drop(&mut self) {
        TRACE.with(|flag| flag.set(self.0));
    }
}

#[cfg(feature = "trace_parser")]
pub(crate) fn trace_line(msg: &str) {
    let sink = SINK.with(|slot| slot.borrow().clone());
    match sink {
        Some(sink) => sink(msg),
        None => log::debug!("{msg}"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn capture_sees_reports_in_order() {
        let ((), reports) = capture_reports(|| {
            report("first");
            report("second");
        });
        assert_eq!(reports, ["first", "second"]);
    }

    #[test]
    fn nested_sinks_restore() {
        let ((), outer) = capture_reports(|| {
            report("outer before");
            let ((), inner) = capture_reports(|| report("inner"));
            assert_eq!(inner, ["inner"]);
            report("outer after");
        });
        assert_eq!(outer, ["outer before", "outer after"]);
    }

    #[test]
    fn trace_flag_is_scoped() {
        assert!(!trace_enabled());
        with_trace(|| assert!(trace_enabled()));
        assert!(!trace_enabled());
    }
}
