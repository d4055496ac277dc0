//! Structural errors surfaced by sheet operations.
//!
//! Formula evaluation errors (`#REF!`, `#VALUE!`, `#DIV/0!`) are not here:
//! they are cell values, see [`crate::formula::eval::FormulaError`].

use crate::formula::parser::FormulaParseError;
use crate::position::Position;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SheetError {
    /// Position outside the grid or outside the sheet's configured limits.
    #[error("invalid position (row {}, col {})", .0.row, .0.col)]
    InvalidPosition(Position),

    /// The write would make a formula depend on itself. Nothing was changed.
    #[error("circular dependency through {0}")]
    CircularDependency(Position),

    /// The formula text could not be parsed. Nothing was changed.
    #[error("formula parse error: {0}")]
    FormulaParse(#[from] FormulaParseError),
}

pub type Result<T> = std::result::Result<T, SheetError>;
