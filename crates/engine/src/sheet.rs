use std::collections::BTreeSet;
use std::io::{self, Write};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::cell::{Cell, CellContent};
use super::error::{Result, SheetError};
use super::formula::eval::{CellLookup, Value};
use super::position::{Position, Size, MAX_COLS, MAX_ROWS};

/// Largest addressable area of a sheet. Defaults to the whole grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetLimits {
    pub max_rows: usize,
    pub max_cols: usize,
}

impl Default for SheetLimits {
    fn default() -> Self {
        Self {
            max_rows: MAX_ROWS,
            max_cols: MAX_COLS,
        }
    }
}

impl SheetLimits {
    /// Limits are clamped to `1..=MAX_ROWS` and `1..=MAX_COLS`.
    pub fn new(max_rows: usize, max_cols: usize) -> Self {
        Self {
            max_rows: max_rows.clamp(1, MAX_ROWS),
            max_cols: max_cols.clamp(1, MAX_COLS),
        }
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos.is_valid() && pos.row < self.max_rows && pos.col < self.max_cols
    }
}

/// Sparse cell store with dependency tracking.
///
/// Every formula cell has a forward edge to each cell it reads, and every
/// read cell has the matching reverse edge. Referencing an absent position
/// materializes an empty cell there. The graph never contains a cycle.
#[derive(Debug, Default)]
pub struct Sheet {
    pub(crate) cells: FxHashMap<Position, Cell>,
    /// Bounding box of all stored cells, anchored at A1.
    pub(crate) size: Size,
    pub(crate) limits: SheetLimits,
    /// Readers of positions that were cleared while formulas still pointed
    /// at them. Moved back onto the cell when the position is materialized.
    pub(crate) detached_readers: FxHashMap<Position, BTreeSet<Position>>,
}

impl Sheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: SheetLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> SheetLimits {
        self.limits
    }

    fn check_position(&self, pos: Position) -> Result<()> {
        if self.limits.contains(pos) {
            Ok(())
        } else {
            Err(SheetError::InvalidPosition(pos))
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write user input into a cell.
    ///
    /// Writing the text a cell already shows is a no-op. On any error
    /// (invalid position, parse failure, circular dependency) the sheet is
    /// left exactly as it was.
    pub fn set_cell(&mut self, pos: Position, text: &str) -> Result<()> {
        self.check_position(pos)?;

        if let Some(cell) = self.cells.get(&pos) {
            if cell.text() == text {
                return Ok(());
            }
        }

        let content = CellContent::from_input(text)?;
        let new_refs: BTreeSet<Position> = content.referenced_cells().iter().copied().collect();
        for &target in &new_refs {
            self.check_position(target)?;
        }

        if self.would_create_cycle(pos, &new_refs) {
            log::warn!("rejected write to {}: circular dependency", pos);
            return Err(SheetError::CircularDependency(pos));
        }

        self.commit(pos, content, new_refs);
        log::debug!("set {} = {:?}", pos, text);
        Ok(())
    }

    /// Store validated content and rewire edges. Cannot fail.
    fn commit(&mut self, pos: Position, content: CellContent, new_refs: BTreeSet<Position>) {
        let detached = &mut self.detached_readers;
        let cell = self
            .cells
            .entry(pos)
            .or_insert_with(|| Cell::with_readers(detached.remove(&pos).unwrap_or_default()));
        cell.set(content);
        let old_refs = cell.replace_forward_refs(new_refs.clone());
        self.grow(pos);

        for &target in old_refs.difference(&new_refs) {
            self.unlink(pos, target);
        }
        for &target in new_refs.difference(&old_refs) {
            self.link(pos, target);
        }

        self.invalidate_dependents(pos);
    }

    /// Remove the cell at `pos`. Absent cells are a no-op.
    ///
    /// Formulas that read the cleared position keep their references; they
    /// see an empty operand until something is written there again.
    pub fn clear_cell(&mut self, pos: Position) -> Result<()> {
        self.check_position(pos)?;

        let Some(mut cell) = self.cells.remove(&pos) else {
            return Ok(());
        };

        let (forward, readers) = cell.clear();
        for target in forward {
            self.unlink(pos, target);
        }

        if !readers.is_empty() {
            self.invalidate_from(readers.iter().copied());
            self.detached_readers.insert(pos, readers);
        }

        if pos.row + 1 == self.size.rows || pos.col + 1 == self.size.cols {
            self.recompute_size();
        }

        log::debug!("cleared {}", pos);
        Ok(())
    }

    /// Add the edge `reader -> target`, materializing `target` if needed.
    fn link(&mut self, reader: Position, target: Position) {
        let detached = &mut self.detached_readers;
        let created = !self.cells.contains_key(&target);
        self.cells
            .entry(target)
            .or_insert_with(|| Cell::with_readers(detached.remove(&target).unwrap_or_default()))
            .add_reader(reader);
        if created {
            self.grow(target);
        }
    }

    /// Remove the reverse half of `reader -> target`.
    fn unlink(&mut self, reader: Position, target: Position) {
        if let Some(cell) = self.cells.get_mut(&target) {
            cell.remove_reader(reader);
            return;
        }
        if let Some(readers) = self.detached_readers.get_mut(&target) {
            readers.remove(&reader);
            if readers.is_empty() {
                self.detached_readers.remove(&target);
            }
        }
    }

    fn grow(&mut self, pos: Position) {
        self.size.rows = self.size.rows.max(pos.row + 1);
        self.size.cols = self.size.cols.max(pos.col + 1);
    }

    fn recompute_size(&mut self) {
        self.size = self.cells.keys().fold(Size::default(), |size, pos| Size {
            rows: size.rows.max(pos.row + 1),
            cols: size.cols.max(pos.col + 1),
        });
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The cell stored at `pos`, if any.
    pub fn get_cell(&self, pos: Position) -> Result<Option<&Cell>> {
        self.check_position(pos)?;
        Ok(self.cells.get(&pos))
    }

    /// Value of the cell at `pos`, evaluating (and caching) formulas.
    pub fn value(&self, pos: Position) -> Result<Option<Value>> {
        self.check_position(pos)?;
        self.fill_caches(pos);
        Ok(self.cells.get(&pos).map(|cell| cell.value(self)))
    }

    /// Text of the cell at `pos`.
    pub fn text(&self, pos: Position) -> Result<Option<String>> {
        self.check_position(pos)?;
        Ok(self.cells.get(&pos).map(Cell::text))
    }

    /// Bounding box of stored cells; `0x0` when the sheet is empty.
    pub fn printable_size(&self) -> Size {
        self.size
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Positions of all stored cells, in row-major order.
    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.cells.keys().copied().collect();
        positions.sort_unstable();
        positions
    }

    /// Cells whose formulas read `pos`. Also answers for cleared positions
    /// that are still referenced.
    pub fn dependents(&self, pos: Position) -> impl Iterator<Item = Position> + '_ {
        let readers = match self.cells.get(&pos) {
            Some(cell) => Some(cell.reverse_refs()),
            None => self.detached_readers.get(&pos),
        };
        readers.into_iter().flat_map(|s| s.iter().copied())
    }

    /// Cells the formula at `pos` reads.
    pub fn precedents(&self, pos: Position) -> impl Iterator<Item = Position> + '_ {
        self.cells
            .get(&pos)
            .into_iter()
            .flat_map(|cell| cell.forward_refs().iter().copied())
    }

    // =========================================================================
    // Printing
    // =========================================================================

    /// Write every value in the bounding box as tab-separated rows.
    pub fn print_values<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.print_cells(out, |cell| cell.value(self).to_string())
    }

    /// Write every cell's text in the bounding box as tab-separated rows.
    pub fn print_texts<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.print_cells(out, Cell::text)
    }

    fn print_cells<W, F>(&self, out: &mut W, render: F) -> io::Result<()>
    where
        W: Write,
        F: Fn(&Cell) -> String,
    {
        for row in 0..self.size.rows {
            for col in 0..self.size.cols {
                if col > 0 {
                    out.write_all(b"\t")?;
                }
                if let Some(cell) = self.cells.get(&Position::new(row, col)) {
                    out.write_all(render(cell).as_bytes())?;
                }
            }
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl CellLookup for Sheet {
    fn lookup(&self, pos: Position) -> Option<Value> {
        self.fill_caches(pos);
        self.cells.get(&pos).map(|cell| cell.value(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::eval::FormulaError;
    use crate::formula::parser::FormulaParseError;

    fn pos(s: &str) -> Position {
        Position::parse(s).unwrap()
    }

    fn values(sheet: &Sheet) -> String {
        let mut out = Vec::new();
        sheet.print_values(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn texts(sheet: &Sheet) -> String {
        let mut out = Vec::new();
        sheet.print_texts(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_empty_sheet() {
        let sheet = Sheet::new();
        assert_eq!(sheet.printable_size(), Size::new(0, 0));
        assert_eq!(sheet.get_cell(pos("A1")).unwrap().map(Cell::text), None);
        assert_eq!(values(&sheet), "");
    }

    #[test]
    fn test_set_and_get_text() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("B2"), "hello").unwrap();

        assert_eq!(sheet.text(pos("B2")).unwrap().as_deref(), Some("hello"));
        assert_eq!(sheet.value(pos("B2")).unwrap(), Some(Value::Text("hello".into())));
        assert_eq!(sheet.printable_size(), Size::new(2, 2));
        sheet.assert_consistent();
    }

    #[test]
    fn test_invalid_position_rejected() {
        let mut sheet = Sheet::new();
        let bad = Position::new(MAX_ROWS, 0);

        assert_eq!(sheet.set_cell(bad, "1"), Err(SheetError::InvalidPosition(bad)));
        assert_eq!(sheet.get_cell(bad).unwrap_err(), SheetError::InvalidPosition(bad));
        assert_eq!(sheet.clear_cell(bad), Err(SheetError::InvalidPosition(bad)));
        assert!(sheet.is_empty());
    }

    #[test]
    fn test_limits_restrict_positions_and_references() {
        let mut sheet = Sheet::with_limits(SheetLimits::new(10, 3));
        sheet.set_cell(pos("C10"), "ok").unwrap();

        assert_eq!(
            sheet.set_cell(pos("D1"), "x"),
            Err(SheetError::InvalidPosition(pos("D1")))
        );
        // a formula may not pull a cell outside the limits into existence
        assert_eq!(
            sheet.set_cell(pos("A1"), "=A11"),
            Err(SheetError::InvalidPosition(pos("A11")))
        );
        assert!(sheet.get_cell(pos("A1")).unwrap().is_none());
    }

    #[test]
    fn test_formula_reads_other_cells() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=1+2").unwrap();
        sheet.set_cell(pos("B1"), "=A1*10").unwrap();

        assert_eq!(sheet.value(pos("B1")).unwrap(), Some(Value::Number(30.0)));
        assert_eq!(values(&sheet), "3\t30\n");
        assert_eq!(texts(&sheet), "=1+2\t=A1*10\n");
    }

    #[test]
    fn test_reference_materializes_empty_cell() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=C3+1").unwrap();

        let target = sheet.get_cell(pos("C3")).unwrap().unwrap();
        assert!(target.is_empty());
        assert_eq!(target.reverse_refs().iter().copied().collect::<Vec<_>>(), vec![pos("A1")]);
        assert_eq!(sheet.printable_size(), Size::new(3, 3));
        assert_eq!(sheet.value(pos("A1")).unwrap(), Some(Value::Number(1.0)));
        sheet.assert_consistent();
    }

    #[test]
    fn test_same_text_is_noop() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=1+2").unwrap();
        sheet.value(pos("A1")).unwrap();

        // canonical text matches, so the cache survives
        sheet.set_cell(pos("A1"), "=1+2").unwrap();
        assert!(sheet.get_cell(pos("A1")).unwrap().unwrap().has_cached_value());
    }

    #[test]
    fn test_same_text_keeps_reader_caches() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "4").unwrap();
        sheet.set_cell(pos("B1"), "=A1").unwrap();
        sheet.set_cell(pos("C1"), "=B1*2").unwrap();
        assert_eq!(sheet.value(pos("C1")).unwrap(), Some(Value::Number(8.0)));

        sheet.set_cell(pos("A1"), "4").unwrap();
        sheet.set_cell(pos("B1"), "=A1").unwrap();
        assert!(sheet.get_cell(pos("B1")).unwrap().unwrap().has_cached_value());
        assert!(sheet.get_cell(pos("C1")).unwrap().unwrap().has_cached_value());
    }

    #[test]
    fn test_deeply_nested_formula_leaves_sheet_unchanged() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=2").unwrap();

        let nested = format!("={}1{}", "(".repeat(50_000), ")".repeat(50_000));
        assert_eq!(
            sheet.set_cell(pos("A1"), &nested),
            Err(SheetError::FormulaParse(FormulaParseError::TooDeep))
        );
        assert_eq!(
            sheet.set_cell(pos("C3"), &format!("={}", vec!["B1"; 10_000].join("+"))),
            Err(SheetError::FormulaParse(FormulaParseError::TooDeep))
        );

        assert_eq!(sheet.text(pos("A1")).unwrap().as_deref(), Some("=2"));
        assert_eq!(sheet.cell_count(), 1);
        assert_eq!(sheet.printable_size(), Size::new(1, 1));
        sheet.assert_consistent();
    }

    #[test]
    fn test_parse_error_leaves_sheet_unchanged() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=2").unwrap();

        let err = sheet.set_cell(pos("A1"), "=1+").unwrap_err();
        assert!(matches!(err, SheetError::FormulaParse(_)));
        assert_eq!(sheet.text(pos("A1")).unwrap().as_deref(), Some("=2"));

        // a failed write to a new position does not grow the sheet
        assert!(sheet.set_cell(pos("E5"), "=)").is_err());
        assert_eq!(sheet.printable_size(), Size::new(1, 1));
        assert!(sheet.get_cell(pos("E5")).unwrap().is_none());
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut sheet = Sheet::new();
        assert_eq!(
            sheet.set_cell(pos("A1"), "=A1"),
            Err(SheetError::CircularDependency(pos("A1")))
        );
        assert!(sheet.is_empty());
        assert_eq!(sheet.printable_size(), Size::new(0, 0));
    }

    #[test]
    fn test_cycle_rejected_without_side_effects() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=B1").unwrap();
        sheet.set_cell(pos("B1"), "=C1").unwrap();
        sheet.set_cell(pos("C1"), "5").unwrap();
        assert_eq!(sheet.value(pos("A1")).unwrap(), Some(Value::Number(5.0)));

        let err = sheet.set_cell(pos("C1"), "=A1+D9").unwrap_err();
        assert_eq!(err, SheetError::CircularDependency(pos("C1")));

        // D9 was not materialized and C1 kept its text and edges
        assert!(sheet.get_cell(pos("D9")).unwrap().is_none());
        assert_eq!(sheet.text(pos("C1")).unwrap().as_deref(), Some("5"));
        assert_eq!(sheet.precedents(pos("C1")).count(), 0);
        assert_eq!(sheet.printable_size(), Size::new(1, 3));
        assert!(sheet.get_cell(pos("A1")).unwrap().unwrap().has_cached_value());
        sheet.assert_consistent();
    }

    #[test]
    fn test_rewire_drops_old_edges() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("C1"), "=A1+B1").unwrap();
        sheet.set_cell(pos("C1"), "=B1+D1").unwrap();

        assert_eq!(sheet.dependents(pos("A1")).count(), 0);
        assert_eq!(sheet.dependents(pos("B1")).collect::<Vec<_>>(), vec![pos("C1")]);
        assert_eq!(sheet.dependents(pos("D1")).collect::<Vec<_>>(), vec![pos("C1")]);
        sheet.assert_consistent();
    }

    #[test]
    fn test_write_invalidates_dependents() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "2").unwrap();
        sheet.set_cell(pos("B1"), "=A1*3").unwrap();
        sheet.set_cell(pos("C1"), "=B1+1").unwrap();
        assert_eq!(sheet.value(pos("C1")).unwrap(), Some(Value::Number(7.0)));

        sheet.set_cell(pos("A1"), "10").unwrap();
        assert!(!sheet.get_cell(pos("B1")).unwrap().unwrap().has_cached_value());
        assert!(!sheet.get_cell(pos("C1")).unwrap().unwrap().has_cached_value());
        assert_eq!(sheet.value(pos("C1")).unwrap(), Some(Value::Number(31.0)));
    }

    #[test]
    fn test_text_coercion_in_formulas() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "12").unwrap();
        sheet.set_cell(pos("A2"), "twelve").unwrap();
        sheet.set_cell(pos("B1"), "=A1+1").unwrap();
        sheet.set_cell(pos("B2"), "=A2+1").unwrap();

        assert_eq!(sheet.value(pos("B1")).unwrap(), Some(Value::Number(13.0)));
        assert_eq!(sheet.value(pos("B2")).unwrap(), Some(Value::Error(FormulaError::Value)));
    }

    #[test]
    fn test_invalid_reference_evaluates_to_ref_error() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "=ZZZZ1+1").unwrap();

        assert_eq!(sheet.value(pos("A1")).unwrap(), Some(Value::Error(FormulaError::Ref)));
        assert_eq!(sheet.text(pos("A1")).unwrap().as_deref(), Some("=ZZZZ1+1"));
        assert_eq!(sheet.cell_count(), 1);
    }

    #[test]
    fn test_clear_cell_shrinks_bounding_box() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "a").unwrap();
        sheet.set_cell(pos("C3"), "c").unwrap();
        assert_eq!(sheet.printable_size(), Size::new(3, 3));

        sheet.clear_cell(pos("C3")).unwrap();
        assert_eq!(sheet.printable_size(), Size::new(1, 1));
        sheet.clear_cell(pos("A1")).unwrap();
        assert_eq!(sheet.printable_size(), Size::new(0, 0));

        // clearing an absent cell is fine
        sheet.clear_cell(pos("B7")).unwrap();
    }

    #[test]
    fn test_clear_referenced_cell_keeps_reader_edges() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "4").unwrap();
        sheet.set_cell(pos("B1"), "=A1*2").unwrap();
        assert_eq!(sheet.value(pos("B1")).unwrap(), Some(Value::Number(8.0)));

        sheet.clear_cell(pos("A1")).unwrap();
        assert!(sheet.get_cell(pos("A1")).unwrap().is_none());
        assert!(!sheet.get_cell(pos("B1")).unwrap().unwrap().has_cached_value());
        assert_eq!(sheet.value(pos("B1")).unwrap(), Some(Value::Number(0.0)));
        assert_eq!(sheet.dependents(pos("A1")).collect::<Vec<_>>(), vec![pos("B1")]);
        sheet.assert_consistent();

        // writing the position again picks the reader back up
        sheet.set_cell(pos("A1"), "5").unwrap();
        assert_eq!(sheet.value(pos("B1")).unwrap(), Some(Value::Number(10.0)));
        sheet.set_cell(pos("A1"), "6").unwrap();
        assert_eq!(sheet.value(pos("B1")).unwrap(), Some(Value::Number(12.0)));
        sheet.assert_consistent();
    }

    #[test]
    fn test_clear_formula_cell_unlinks_targets() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("B1"), "=A1+1").unwrap();
        sheet.clear_cell(pos("B1")).unwrap();

        assert_eq!(sheet.dependents(pos("A1")).count(), 0);
        assert!(!sheet.get_cell(pos("A1")).unwrap().unwrap().is_referenced());
        sheet.assert_consistent();
    }

    #[test]
    fn test_rewiring_away_from_cleared_position() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("B1"), "=A1").unwrap();
        sheet.clear_cell(pos("A1")).unwrap();
        sheet.set_cell(pos("B1"), "=1").unwrap();

        assert_eq!(sheet.dependents(pos("A1")).count(), 0);
        assert!(sheet.detached_readers.is_empty());
        sheet.assert_consistent();
    }

    #[test]
    fn test_cleared_position_cannot_close_a_cycle() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("B1"), "=A1").unwrap();
        sheet.clear_cell(pos("A1")).unwrap();

        assert_eq!(
            sheet.set_cell(pos("A1"), "=B1"),
            Err(SheetError::CircularDependency(pos("A1")))
        );
        assert!(sheet.get_cell(pos("A1")).unwrap().is_none());
        sheet.assert_consistent();
    }

    #[test]
    fn test_escaped_text() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "'=not a formula").unwrap();

        assert_eq!(texts(&sheet), "'=not a formula\n");
        assert_eq!(values(&sheet), "=not a formula\n");
    }

    #[test]
    fn test_print_layout_has_gaps() {
        let mut sheet = Sheet::new();
        sheet.set_cell(pos("A1"), "x").unwrap();
        sheet.set_cell(pos("C2"), "=1/0").unwrap();

        assert_eq!(values(&sheet), "x\t\t\n\t\t#DIV/0!\n");
        assert_eq!(texts(&sheet), "x\t\t\n\t\t=1/0\n");
    }
}
