//! Source locations attached to syntax nodes.

use std::fmt;

/// Position span of a node in the source text.
///
/// Lines are 1-based, columns are 0-based byte offsets within the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Location {
    /// Location used for nodes that have no located ancestor.
    pub const ROOT: Location = Location {
        line: 1,
        col: 0,
        end_line: 1,
        end_col: 0,
    };

    pub fn new(line: u32, col: u32, end_line: u32, end_col: u32) -> Self {
        Location {
            line,
            col,
            end_line,
            end_col,
        }
    }

    /// Smallest location covering both `self` and `other`.
    pub fn to(self, other: Location) -> Location {
        Location {
            line: self.line,
            col: self.col,
            end_line: other.end_line,
            end_col: other.end_col,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}
