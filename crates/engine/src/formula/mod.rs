// Formula parsing and evaluation

pub mod eval;
pub mod parser;

use crate::position::Position;

use eval::{coerce_operand, CellLookup, FormulaError};
use parser::{Expr, FormulaParseError};

/// A parsed formula together with the cells it reads.
///
/// This is the adapter between the expression tree and the cell store: it
/// resolves each reference through a [`CellLookup`] and applies the operand
/// coercion rules.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    ast: Expr,
    /// Sorted and deduplicated.
    referenced: Vec<Position>,
}

impl Formula {
    /// Parse formula source text (without the leading `=`).
    pub fn parse(expression: &str) -> Result<Self, FormulaParseError> {
        let ast = parser::parse(expression)?;
        let mut referenced = ast.cells();
        referenced.sort_unstable();
        referenced.dedup();
        Ok(Self { ast, referenced })
    }

    /// Evaluate against `lookup`. The first error aborts the evaluation.
    pub fn evaluate<L>(&self, lookup: &L) -> Result<f64, FormulaError>
    where
        L: CellLookup + ?Sized,
    {
        self.ast.evaluate(&|pos| coerce_operand(lookup.lookup(pos)))
    }

    /// Canonical source text, without the leading `=`.
    pub fn expression(&self) -> String {
        self.ast.to_string()
    }

    /// Positions this formula reads, sorted and without duplicates.
    pub fn referenced_cells(&self) -> &[Position] {
        &self.referenced
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eval::Value;

    fn pos(s: &str) -> Position {
        Position::parse(s).unwrap()
    }

    #[test]
    fn test_referenced_cells_are_a_true_set() {
        // non-adjacent duplicates must collapse too
        let formula = Formula::parse("B2+A1+B2+C3+A1").unwrap();
        assert_eq!(formula.referenced_cells(), &[pos("A1"), pos("B2"), pos("C3")]);
    }

    #[test]
    fn test_referenced_cells_skip_invalid_refs() {
        let formula = Formula::parse("A1+ZZZZ1").unwrap();
        assert_eq!(formula.referenced_cells(), &[pos("A1")]);
    }

    #[test]
    fn test_evaluate_missing_cells_are_zero() {
        let formula = Formula::parse("A1+B1+1").unwrap();
        let lookup = |_: Position| -> Option<Value> { None };
        assert_eq!(formula.evaluate(&lookup), Ok(1.0));
    }

    #[test]
    fn test_evaluate_coerces_text() {
        let formula = Formula::parse("A1*2").unwrap();
        let numeric = |_: Position| Some(Value::Text("21".to_string()));
        assert_eq!(formula.evaluate(&numeric), Ok(42.0));

        let empty = |_: Position| Some(Value::Text(String::new()));
        assert_eq!(formula.evaluate(&empty), Ok(0.0));

        let words = |_: Position| Some(Value::Text("text".to_string()));
        assert_eq!(formula.evaluate(&words), Err(FormulaError::Value));
    }

    #[test]
    fn test_referenced_error_becomes_value_error() {
        let formula = Formula::parse("A1/1").unwrap();
        let lookup = |_: Position| Some(Value::Error(FormulaError::Div0));
        assert_eq!(formula.evaluate(&lookup), Err(FormulaError::Value));
    }

    #[test]
    fn test_own_division_by_zero_is_div0() {
        let formula = Formula::parse("A1/B1").unwrap();
        let lookup = |p: Position| (p == pos("A1")).then(|| Value::Number(3.0));
        assert_eq!(formula.evaluate(&lookup), Err(FormulaError::Div0));
    }

    #[test]
    fn test_expression_is_stable() {
        let formula = Formula::parse("( A1 + 2 ) * (B1)").unwrap();
        assert_eq!(formula.expression(), "(A1+2)*B1");
        let again = Formula::parse(&formula.expression()).unwrap();
        assert_eq!(again.expression(), formula.expression());
    }
}
