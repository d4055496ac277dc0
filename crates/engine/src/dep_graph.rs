//! Graph walks over the sheet's cell edges.
//!
//! # Edge Direction
//!
//! ```text
//! B → A  (forward)   B's formula reads A
//! A → B  (reverse)   A is read by B
//! ```
//!
//! Cycle detection and cache filling follow forward edges; cache
//! invalidation follows reverse edges. All three walks are iterative, and a
//! formula is only evaluated once every formula it reads holds a cached
//! result, so deep chains cannot overflow the stack.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::position::Position;
use crate::sheet::Sheet;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    /// On the current DFS path.
    Grey,
    /// Fully explored, known to reach no grey node.
    Black,
}

impl Sheet {
    // =========================================================================
    // Cycle detection
    // =========================================================================

    /// Would giving `cell` the forward edges `proposed` close a cycle?
    ///
    /// Three-colour DFS over forward edges starting at `cell`. `cell` itself
    /// uses `proposed`; every other node uses its stored edges. Reaching a
    /// grey node means a cycle. Does not modify the sheet.
    pub(crate) fn would_create_cycle(&self, cell: Position, proposed: &BTreeSet<Position>) -> bool {
        struct DfsFrame {
            neighbours: Vec<Position>,
            next_idx: usize,
            cell: Position,
        }

        let neighbours_of = |pos: Position| -> Vec<Position> {
            self.cells
                .get(&pos)
                .map(|c| c.forward_refs().iter().copied().collect())
                .unwrap_or_default()
        };

        let mut colours: FxHashMap<Position, Colour> = FxHashMap::default();
        colours.insert(cell, Colour::Grey);
        let mut dfs_stack = vec![DfsFrame {
            neighbours: proposed.iter().copied().collect(),
            next_idx: 0,
            cell,
        }];

        while let Some(frame) = dfs_stack.last_mut() {
            if frame.next_idx < frame.neighbours.len() {
                let w = frame.neighbours[frame.next_idx];
                frame.next_idx += 1;

                match colours.get(&w) {
                    Some(Colour::Grey) => {
                        log::trace!("cycle: {} reaches {} on the current path", frame.cell, w);
                        return true;
                    }
                    Some(Colour::Black) => {}
                    None => {
                        colours.insert(w, Colour::Grey);
                        dfs_stack.push(DfsFrame {
                            neighbours: neighbours_of(w),
                            next_idx: 0,
                            cell: w,
                        });
                    }
                }
            } else {
                let done = frame.cell;
                dfs_stack.pop();
                colours.insert(done, Colour::Black);
            }
        }

        false
    }

    // =========================================================================
    // Cache filling
    // =========================================================================

    /// Evaluate every uncached formula that `cell` depends on, deepest first,
    /// then `cell` itself.
    ///
    /// Post-order DFS over forward edges. When a formula is evaluated, each
    /// formula it reads is already cached, so evaluation never recurses into
    /// another cell. Cells that are not formulas, or are already cached, end
    /// the walk.
    pub(crate) fn fill_caches(&self, cell: Position) {
        struct FillFrame {
            refs: Vec<Position>,
            next_idx: usize,
            cell: Position,
        }

        let pending = |pos: Position| -> Option<Vec<Position>> {
            self.cells
                .get(&pos)
                .filter(|c| c.is_formula() && !c.has_cached_value())
                .map(|c| c.forward_refs().iter().copied().collect())
        };

        let Some(refs) = pending(cell) else {
            return;
        };

        let mut seen: FxHashSet<Position> = FxHashSet::default();
        seen.insert(cell);
        let mut stack = vec![FillFrame { refs, next_idx: 0, cell }];
        let mut evaluated = 0usize;

        while let Some(frame) = stack.last_mut() {
            if frame.next_idx < frame.refs.len() {
                let w = frame.refs[frame.next_idx];
                frame.next_idx += 1;

                if seen.insert(w) {
                    if let Some(refs) = pending(w) {
                        stack.push(FillFrame { refs, next_idx: 0, cell: w });
                    }
                }
            } else {
                let done = frame.cell;
                stack.pop();
                if let Some(c) = self.cells.get(&done) {
                    c.value(self);
                    evaluated += 1;
                }
            }
        }

        log::trace!("filled {} cache(s) for {}", evaluated, cell);
    }

    // =========================================================================
    // Cache invalidation
    // =========================================================================

    /// Drop cached values of every cell that transitively reads `cell`.
    ///
    /// `cell`'s own cache is not touched here; writing its content resets it.
    pub(crate) fn invalidate_dependents(&self, cell: Position) {
        let readers: Vec<Position> = self.dependents(cell).collect();
        self.invalidate_from(readers);
    }

    /// Invalidate each start cell and everything downstream of it.
    ///
    /// A cell that had no cached value stops the walk: nothing downstream
    /// of it can hold a value computed from the stale input.
    pub(crate) fn invalidate_from<I>(&self, start: I)
    where
        I: IntoIterator<Item = Position>,
    {
        let mut worklist: Vec<Position> = start.into_iter().collect();
        let mut cleared = 0usize;

        while let Some(pos) = worklist.pop() {
            let Some(cell) = self.cells.get(&pos) else {
                continue;
            };
            if cell.clear_cache() {
                cleared += 1;
                worklist.extend(cell.reverse_refs().iter().copied());
            }
        }

        if cleared > 0 {
            log::debug!("invalidated {} cached value(s)", cleared);
        }
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    /// Check all graph invariants. Panics if any are violated.
    ///
    /// Only available in test builds.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (pos, cell) in &self.cells {
            // forward → reverse
            for target in cell.forward_refs() {
                assert!(
                    self.dependents(*target).any(|r| r == *pos),
                    "Missing reverse edge: {} should list {} as a reader",
                    target,
                    pos
                );
            }
            // reverse → forward
            for reader in cell.reverse_refs() {
                assert!(
                    self.cells.get(reader).map_or(false, |r| r.forward_refs().contains(pos)),
                    "Dangling reverse edge: {} lists {} as a reader",
                    pos,
                    reader
                );
            }
            // edges mirror the formula
            let expected: BTreeSet<Position> = cell.referenced_cells().iter().copied().collect();
            assert_eq!(cell.forward_refs(), &expected, "Forward edges of {} out of sync", pos);
            // every stored cell lies inside the printable size
            assert!(
                pos.row < self.size.rows && pos.col < self.size.cols,
                "{} lies outside the printable size {:?}",
                pos,
                self.size
            );
        }

        for (pos, readers) in &self.detached_readers {
            assert!(!self.cells.contains_key(pos), "Detached readers kept for present cell {}", pos);
            assert!(!readers.is_empty(), "Empty detached reader set stored for {}", pos);
            for reader in readers {
                assert!(
                    self.cells.get(reader).map_or(false, |r| r.forward_refs().contains(pos)),
                    "Detached reader {} no longer reads {}",
                    reader,
                    pos
                );
            }
        }

        assert!(
            !self.has_cycle(),
            "Dependency graph contains a cycle"
        );
    }

    #[cfg(test)]
    fn has_cycle(&self) -> bool {
        self.cells
            .iter()
            .any(|(pos, cell)| self.would_create_cycle(*pos, cell.forward_refs()))
    }
}
