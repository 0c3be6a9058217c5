use std::fmt::Display;

use itertools::Itertools;

/// A zero-indexed location in a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.column + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    /// Placeholder range for nodes synthesized by the compiler
    pub const DUMMY: Range = Range {
        start: Position::new(0, 0),
        end: Position::new(0, 0),
    };

    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn contains_position(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }

    pub fn contains_range(&self, other: &Range) -> bool {
        self.contains_position(other.start) && self.contains_position(other.end)
    }

    /// Smallest range covering both `self` and `other`
    pub fn union(&self, other: &Range) -> Range {
        Range {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Path-like identity of a module, `a.b.c` for the file `a/b/c.sam`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleReference {
    pub parts: Vec<String>,
}

impl ModuleReference {
    pub const ROOT: ModuleReference = ModuleReference { parts: Vec::new() };

    pub fn new<S: Into<String>>(parts: impl IntoIterator<Item = S>) -> Self {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a dotted reference such as `foo.bar`
    pub fn from_dotted(dotted: &str) -> Self {
        Self::new(dotted.split('.').filter(|part| !part.is_empty()))
    }

    pub fn to_filename(&self) -> String {
        format!("{}.sam", self.parts.join("/"))
    }

    /// Name fragment used when building global symbol names
    pub fn encoded(&self) -> String {
        self.parts.iter().map(|part| part.replace('-', "_")).join("$")
    }
}

impl Display for ModuleReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.parts.join("."))
    }
}
