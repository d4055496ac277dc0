use std::collections::BTreeSet;

use super::formula::eval::{CellLookup, FormulaError, Value};
use super::formula::parser::FormulaParseError;
use super::formula::Formula;
use super::position::Position;

/// Leading character that marks cell input as a formula.
pub const FORMULA_SIGN: char = '=';
/// Leading character that forces the rest of the input to be literal text.
pub const ESCAPE_SIGN: char = '\'';

/// What a cell holds.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellContent {
    #[default]
    Empty,
    Text(String),
    Formula(Formula),
}

impl CellContent {
    /// Interpret raw user input.
    ///
    /// `=` followed by at least one character is a formula; everything else
    /// (including a lone `=`) is literal text. Empty input is `Empty`.
    pub fn from_input(input: &str) -> Result<Self, FormulaParseError> {
        if input.is_empty() {
            return Ok(CellContent::Empty);
        }

        if let Some(expression) = input.strip_prefix(FORMULA_SIGN) {
            if !expression.is_empty() {
                return Ok(CellContent::Formula(Formula::parse(expression)?));
            }
        }

        Ok(CellContent::Text(input.to_string()))
    }

    /// Text as the user would re-enter it. Formulas come back in canonical
    /// form with the leading `=`.
    pub fn text(&self) -> String {
        match self {
            CellContent::Empty => String::new(),
            CellContent::Text(s) => s.clone(),
            CellContent::Formula(f) => format!("{}{}", FORMULA_SIGN, f.expression()),
        }
    }

    /// Positions read by this content (only formulas read anything).
    pub fn referenced_cells(&self) -> &[Position] {
        match self {
            CellContent::Formula(f) => f.referenced_cells(),
            _ => &[],
        }
    }
}

/// One grid slot.
///
/// Edges point at positions, never at other cells. The owning sheet keeps
/// `forward_refs` and `reverse_refs` symmetric; a cell never touches another
/// cell's edges itself.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    content: CellContent,
    /// Memoized result of a formula, errors included. Interior mutability
    /// lets reads populate it through a shared reference.
    cache: std::cell::Cell<Option<Result<f64, FormulaError>>>,
    /// Cells this cell's formula reads.
    forward_refs: BTreeSet<Position>,
    /// Cells whose formulas read this cell.
    reverse_refs: BTreeSet<Position>,
}

impl Cell {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty cell that already has readers (a position that was cleared
    /// while formulas still referenced it).
    pub(crate) fn with_readers(readers: BTreeSet<Position>) -> Self {
        Self {
            reverse_refs: readers,
            ..Self::default()
        }
    }

    /// Replace the content. Edges are left to the sheet.
    pub(crate) fn set(&mut self, content: CellContent) {
        self.content = content;
        self.cache.set(None);
    }

    /// Reset to empty and hand back the edge sets so the sheet can unlink
    /// the other ends: `(forward_refs, reverse_refs)`.
    pub(crate) fn clear(&mut self) -> (BTreeSet<Position>, BTreeSet<Position>) {
        self.content = CellContent::Empty;
        self.cache.set(None);
        (
            std::mem::take(&mut self.forward_refs),
            std::mem::take(&mut self.reverse_refs),
        )
    }

    /// Current value. Formula results are memoized on first evaluation and
    /// stay cached until the sheet invalidates them.
    pub fn value<L>(&self, lookup: &L) -> Value
    where
        L: CellLookup + ?Sized,
    {
        match &self.content {
            CellContent::Empty => Value::default(),
            CellContent::Text(s) => {
                let literal = s.strip_prefix(ESCAPE_SIGN).unwrap_or(s);
                Value::Text(literal.to_string())
            }
            CellContent::Formula(formula) => {
                let result = match self.cache.get() {
                    Some(cached) => cached,
                    None => {
                        let computed = formula.evaluate(lookup);
                        self.cache.set(Some(computed));
                        computed
                    }
                };
                Value::from(result)
            }
        }
    }

    pub fn text(&self) -> String {
        self.content.text()
    }

    pub fn content(&self) -> &CellContent {
        &self.content
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.content, CellContent::Empty)
    }

    pub fn is_formula(&self) -> bool {
        matches!(self.content, CellContent::Formula(_))
    }

    /// Positions the formula reads, sorted and deduplicated.
    pub fn referenced_cells(&self) -> &[Position] {
        self.content.referenced_cells()
    }

    pub fn forward_refs(&self) -> &BTreeSet<Position> {
        &self.forward_refs
    }

    pub fn reverse_refs(&self) -> &BTreeSet<Position> {
        &self.reverse_refs
    }

    /// True if some formula reads this cell.
    pub fn is_referenced(&self) -> bool {
        !self.reverse_refs.is_empty()
    }

    pub fn cached_value(&self) -> Option<Value> {
        self.cache.get().map(Value::from)
    }

    pub fn has_cached_value(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Drop the memoized value. Returns whether there was one.
    pub(crate) fn clear_cache(&self) -> bool {
        self.cache.take().is_some()
    }

    pub(crate) fn replace_forward_refs(&mut self, refs: BTreeSet<Position>) -> BTreeSet<Position> {
        std::mem::replace(&mut self.forward_refs, refs)
    }

    pub(crate) fn add_reader(&mut self, reader: Position) {
        self.reverse_refs.insert(reader);
    }

    pub(crate) fn remove_reader(&mut self, reader: Position) {
        self.reverse_refs.remove(&reader);
    }
}
