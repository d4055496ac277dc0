// Value model and operand resolution for formula evaluation

use std::fmt;

use crate::position::Position;

use super::parser;

/// Categorized formula error. These are data, not failures: a cell whose
/// formula fails to evaluate holds one of these as its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormulaError {
    /// Reference to a position outside the grid.
    Ref,
    /// Operand could not be used as a number.
    Value,
    /// Division by zero or any other non-finite arithmetic result.
    Div0,
}

impl FormulaError {
    /// The display text for this category. Every rendering of a formula
    /// error goes through here.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FormulaError::Ref => "#REF!",
            FormulaError::Value => "#VALUE!",
            FormulaError::Div0 => "#DIV/0!",
        }
    }
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for FormulaError {}

// =============================================================================
// Value: result of evaluating a cell's content
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Error(FormulaError),
}

impl Default for Value {
    fn default() -> Self {
        Value::Text(String::new())
    }
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<FormulaError> {
        match self {
            Value::Error(e) => Some(*e),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<FormulaError> for Value {
    fn from(e: FormulaError) -> Self {
        Value::Error(e)
    }
}

impl From<Result<f64, FormulaError>> for Value {
    fn from(result: Result<f64, FormulaError>) -> Self {
        match result {
            Ok(n) => Value::Number(n),
            Err(e) => Value::Error(e),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Text(s) => f.write_str(s),
            Value::Error(e) => f.write_str(e.as_str()),
        }
    }
}

/// Format a number for display: integral values below 1e15 print without a
/// fractional part, everything else uses the shortest round-trip form.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// =============================================================================
// Operand coercion
// =============================================================================

/// Turn a referenced cell's value into a numeric operand.
///
/// `None` means there is no backing cell. Empty text counts as zero, text
/// holding a complete number literal that starts with a digit counts as
/// that number, anything else
/// (including an error held by the referenced cell) is `#VALUE!`.
pub fn coerce_operand(value: Option<Value>) -> Result<f64, FormulaError> {
    match value {
        None => Ok(0.0),
        Some(Value::Number(n)) => Ok(n),
        Some(Value::Text(s)) if s.is_empty() => Ok(0.0),
        Some(Value::Text(s)) => parser::parse_number_literal(&s).ok_or(FormulaError::Value),
        Some(Value::Error(_)) => Err(FormulaError::Value),
    }
}

/// Read access to cell values, used by formulas to resolve references.
pub trait CellLookup {
    /// Value of the cell at `pos`, or `None` if no cell is stored there.
    fn lookup(&self, pos: Position) -> Option<Value>;
}

impl<F> CellLookup for F
where
    F: Fn(Position) -> Option<Value>,
{
    fn lookup(&self, pos: Position) -> Option<Value> {
        self(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rendering_follows_category() {
        assert_eq!(FormulaError::Ref.to_string(), "#REF!");
        assert_eq!(FormulaError::Value.to_string(), "#VALUE!");
        assert_eq!(FormulaError::Div0.to_string(), "#DIV/0!");
        assert_eq!(Value::Error(FormulaError::Ref).to_string(), "#REF!");
        assert_eq!(Value::Error(FormulaError::Div0).to_string(), "#DIV/0!");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1e20), "100000000000000000000");
    }

    #[test]
    fn test_default_value_is_empty_text() {
        assert_eq!(Value::default(), Value::Text(String::new()));
        assert_eq!(Value::default().to_string(), "");
    }

    #[test]
    fn test_coerce_missing_and_empty() {
        assert_eq!(coerce_operand(None), Ok(0.0));
        assert_eq!(coerce_operand(Some(Value::Text(String::new()))), Ok(0.0));
    }

    #[test]
    fn test_coerce_number_and_numeric_text() {
        assert_eq!(coerce_operand(Some(Value::Number(4.5))), Ok(4.5));
        assert_eq!(coerce_operand(Some(Value::Text("12".into()))), Ok(12.0));
        assert_eq!(coerce_operand(Some(Value::Text("1.5e2".into()))), Ok(150.0));
    }

    #[test]
    fn test_coerce_rejects_partial_numbers() {
        for text in ["abc", "12abc", "1 2", " 3", "inf", "NaN", "-5", ".5"] {
            assert_eq!(
                coerce_operand(Some(Value::Text(text.into()))),
                Err(FormulaError::Value),
                "{text:?} should not coerce"
            );
        }
    }

    #[test]
    fn test_coerce_error_becomes_value_error() {
        assert_eq!(coerce_operand(Some(Value::Error(FormulaError::Div0))), Err(FormulaError::Value));
        assert_eq!(coerce_operand(Some(Value::Error(FormulaError::Ref))), Err(FormulaError::Value));
    }
}
