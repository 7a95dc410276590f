// Source positions, spans, and the diagnostics carried alongside a
// compiled program. Spans are attached to instructions through a
// sparse map owned by the program; nothing here depends on the rest
// of the engine.

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub utf8_offset: usize,
}

impl Position {
    pub fn start() -> Position {
        Position { line: 1, column: 1, utf8_offset: 0 }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// Half-open source range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Span {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// Converts byte offsets into line/column positions. Built once per
// compilation from the source text, used by the parser whenever it
// mints a span.
pub struct LineIndex {
    // Byte offset at which each line starts; line_starts[0] == 0.
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(source: &str) -> LineIndex {
        let mut line_starts = vec![0];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        LineIndex { line_starts, len: source.len() }
    }

    pub fn position(&self, utf8_offset: usize) -> Position {
        let utf8_offset = utf8_offset.min(self.len);
        let line = match self.line_starts.binary_search(&utf8_offset) {
            Ok(exact) => exact,
            Err(next) => next - 1,
        };
        Position {
            line: line + 1,
            column: utf8_offset - self.line_starts[line] + 1,
            utf8_offset,
        }
    }

    pub fn span(&self, start: usize, end: usize) -> Span {
        Span::new(self.position(start), self.position(end))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Option<Span>) -> Diagnostic {
        Diagnostic { severity: Severity::Error, message: message.into(), span }
    }

    pub fn warning(message: impl Into<String>, span: Option<Span>) -> Diagnostic {
        Diagnostic { severity: Severity::Warning, message: message.into(), span }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "{}: {} ({})", self.severity, self.message, span),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index_positions() {
        let index = LineIndex::new("let x = 1\nlet y = 2\n");
        assert_eq!(index.position(0), Position { line: 1, column: 1, utf8_offset: 0 });
        assert_eq!(index.position(4), Position { line: 1, column: 5, utf8_offset: 4 });
        assert_eq!(index.position(10), Position { line: 2, column: 1, utf8_offset: 10 });
        assert_eq!(index.position(14), Position { line: 2, column: 5, utf8_offset: 14 });
    }

    #[test]
    fn test_line_index_clamps_past_end() {
        let index = LineIndex::new("ab");
        assert_eq!(index.position(99).utf8_offset, 2);
    }

    #[test]
    fn test_span_ordering() {
        let index = LineIndex::new("a + b");
        let span = index.span(0, 5);
        assert!(span.end >= span.start);
        assert!(span.end.utf8_offset >= span.start.utf8_offset);
    }

    #[test]
    fn test_merge_covers_both() {
        let index = LineIndex::new("abc\ndef");
        let merged = index.span(0, 2).merge(index.span(4, 7));
        assert_eq!(merged.start.utf8_offset, 0);
        assert_eq!(merged.end.utf8_offset, 7);
    }
}
