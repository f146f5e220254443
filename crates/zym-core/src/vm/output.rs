//! Capturing `print` output
//!
//! Hosts and tests can run a program with its output collected in memory
//! instead of written to stdout.

use std::cell::RefCell;

thread_local! {
    static CAPTURE: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Lines printed while capture was active
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputCapture {
    pub stdout: Vec<String>,
}

impl OutputCapture {
    /// All lines joined with newlines, each line terminated
    pub fn text(&self) -> String {
        let mut text = String::new();
        for line in &self.stdout {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

/// Run `f` with every `print` on this thread captured.
///
/// Captures nest: the inner call collects its own lines and the outer
/// capture resumes afterwards.
///
/// ```ignore
/// let (result, output) = with_output_capture(|| vm.run(script));
/// assert_eq!(output.stdout, vec!["hello"]);
/// ```
pub fn with_output_capture<F, R>(f: F) -> (R, OutputCapture)
where
    F: FnOnce() -> R,
{
    let outer = CAPTURE.with(|cell| cell.borrow_mut().replace(Vec::new()));
    let result = f();
    let stdout = CAPTURE
        .with(|cell| std::mem::replace(&mut *cell.borrow_mut(), outer))
        .unwrap_or_default();
    (result, OutputCapture { stdout })
}

/// Record one printed line. Returns false when nothing is capturing and the
/// line should go to stdout.
pub(crate) fn capture_line(line: &str) -> bool {
    CAPTURE.with(|cell| match cell.borrow_mut().as_mut() {
        Some(lines) => {
            lines.push(line.to_string());
            true
        }
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_collected_in_order() {
        let ((), output) = with_output_capture(|| {
            assert!(capture_line("first"));
            assert!(capture_line("second"));
        });
        assert_eq!(output.stdout, vec!["first", "second"]);
        assert_eq!(output.text(), "first\nsecond\n");
    }

    #[test]
    fn nothing_captured_outside() {
        assert!(!capture_line("stdout"));
    }

    #[test]
    fn nested_capture_restores_outer() {
        let (inner, outer) = with_output_capture(|| {
            capture_line("outer 1");
            let ((), inner) = with_output_capture(|| {
                capture_line("inner");
            });
            capture_line("outer 2");
            inner
        });
        assert_eq!(inner.stdout, vec!["inner"]);
        assert_eq!(outer.stdout, vec!["outer 1", "outer 2"]);
    }
}
