//! Cell positions and the A1-style codec.
//!
//! A `Position` is a zero-based `(row, col)` pair. Edges in the dependency
//! graph are keyed by `Position`, never by reference to a cell, so a cell can
//! be replaced or removed without leaving anything dangling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of addressable rows.
pub const MAX_ROWS: usize = 16384;
/// Number of addressable columns.
pub const MAX_COLS: usize = 16384;

const LETTERS: usize = 26;
const MAX_LETTERS: usize = 3;
const MAX_DIGITS: usize = 5;

/// Grid coordinate, zero-based. Ordered by row, then column.
///
/// Serializes as its A1 text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    #[inline]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// True if the position lies inside the addressable grid.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.row < MAX_ROWS && self.col < MAX_COLS
    }

    /// Parse an A1-style reference (`A1`, `AB12`, ...).
    ///
    /// Column letters must be uppercase. Returns `None` for anything that is
    /// not exactly letters followed by digits, or that falls outside the grid.
    pub fn parse(s: &str) -> Option<Self> {
        let split = s.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = s.split_at(split);

        if letters.is_empty() || letters.len() > MAX_LETTERS || digits.len() > MAX_DIGITS {
            return None;
        }
        if !letters.bytes().all(|b| b.is_ascii_uppercase()) {
            return None;
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let row: usize = digits.parse().ok()?;
        if row == 0 {
            return None;
        }

        // A=1 .. Z=26, AA=27 ...; shifted to zero-based afterwards
        let col = letters
            .bytes()
            .fold(0usize, |acc, b| acc * LETTERS + (b - b'A') as usize + 1);

        let pos = Position::new(row - 1, col - 1);
        pos.is_valid().then_some(pos)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return Ok(());
        }
        write!(f, "{}{}", col_to_letters(self.col), self.row + 1)
    }
}

/// Error returned by `Position::from_str`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cell position: {0:?}")]
pub struct ParsePositionError(pub String);

impl FromStr for Position {
    type Err = ParsePositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Position::parse(s).ok_or_else(|| ParsePositionError(s.to_string()))
    }
}

impl TryFrom<String> for Position {
    type Error = ParsePositionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Position> for String {
    fn from(pos: Position) -> Self {
        pos.to_string()
    }
}

/// Convert 0-based column index to letter(s): 0 -> A, 25 -> Z, 26 -> AA.
pub(crate) fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col + 1;
    while n > 0 {
        n -= 1;
        result.insert(0, (b'A' + (n % LETTERS) as u8) as char);
        n /= LETTERS;
    }
    result
}

/// Dimensions of the printable area: the smallest origin-anchored rectangle
/// containing every present cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub rows: usize,
    pub cols: usize,
}

impl Size {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }
}
