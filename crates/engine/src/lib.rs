//! In-memory spreadsheet engine.
//!
//! A [`Sheet`](sheet::Sheet) stores cells sparsely by [`Position`](position::Position),
//! keeps forward and reverse dependency edges in sync, rejects writes that
//! would introduce a circular dependency, and memoizes formula results until
//! one of their inputs changes.

pub mod cell;
pub mod dep_graph;
pub mod error;
pub mod formula;
pub mod position;
pub mod sheet;

pub use cell::{Cell, CellContent};
pub use error::{Result, SheetError};
pub use formula::eval::{CellLookup, FormulaError, Value};
pub use formula::parser::FormulaParseError;
pub use formula::Formula;
pub use position::{Position, Size, MAX_COLS, MAX_ROWS};
pub use sheet::{Sheet, SheetLimits};
