use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Location {
    /// The file in which the location is found.
    #[serde(default)]
    pub file: String,
    /// The line number of the location.
    pub line: usize,
    /// The column number of the location.
    #[serde(default)]
    pub column: usize,
}

impl Location {
    /// Creates a new `Location`.
    pub fn new(file: String, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }

    /// A location that only knows its line, as handed out by parsers that
    /// do not track columns.
    pub fn at_line(line: usize) -> Self {
        Self { file: String::new(), line, column: 0 }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let file = if self.file.is_empty() { "-" } else { self.file.as_str() };
        write!(f, "{}:{}:{}", file, self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Span {
    /// The starting location of the span.
    pub start: Location,
    /// The ending location of the span.
    pub end: Location,
}

impl Span {
    /// Creates a new `Span` from two `Location`s.
    pub fn new(start: Location, end: Location) -> Self {
        Self { start, end }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}
