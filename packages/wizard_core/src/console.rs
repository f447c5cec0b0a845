//! Diagnostics buffer fed by `console` push messages.

/// Append-only log of backend diagnostic lines.
///
/// Lines are kept in arrival order and never dropped. Appending a line
/// reveals a hidden buffer; the user may hide it again with `toggle`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleBuffer {
    lines: Vec<String>,
    visible: bool,
}

impl ConsoleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
        self.visible = true;
    }

    pub fn toggle(&mut self) {
        self.visible = !self.visible;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> &[String] {
        &self.lines[self.lines.len().saturating_sub(n)..]
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Full text, one line per entry.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_in_order() {
        let mut console = ConsoleBuffer::new();
        for line in ["a", "b", "c"] {
            console.append(line);
        }
        assert_eq!(console.lines(), ["a", "b", "c"]);
        assert_eq!(console.text(), "a\nb\nc\n");
    }

    #[test]
    fn first_line_reveals() {
        let mut console = ConsoleBuffer::new();
        assert!(!console.is_visible());
        console.append("hello");
        assert!(console.is_visible());
    }

    #[test]
    fn toggle_hides_until_next_line() {
        let mut console = ConsoleBuffer::new();
        console.append("one");
        console.toggle();
        assert!(!console.is_visible());
        console.append("two");
        assert!(console.is_visible());
        assert_eq!(console.len(), 2);
    }

    #[test]
    fn tail_is_the_newest_lines() {
        let mut console = ConsoleBuffer::new();
        for line in ["a", "b", "c", "d"] {
            console.append(line);
        }
        assert_eq!(console.tail(2), ["c", "d"]);
        assert_eq!(console.tail(10), ["a", "b", "c", "d"]);
        assert!(console.tail(0).is_empty());
    }

    #[test]
    fn empty_lines_are_kept() {
        let mut console = ConsoleBuffer::new();
        console.append("");
        console.append("");
        assert_eq!(console.len(), 2);
        assert!(!console.is_empty());
    }
}
