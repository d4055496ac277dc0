// Formula parser - converts formula text (without the leading '=') into an AST
// Supports: numbers, cell refs (A1), unary +/-, binary + - * /, parentheses

use std::fmt;

use crate::position::Position;

use super::eval::{format_number, FormulaError};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Reference to a cell inside the grid
    CellRef(Position),
    /// Reference token that does not decode to a grid position (e.g. `ZZZZ1`).
    /// Keeps the source text so the formula prints back unchanged.
    InvalidRef(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FormulaParseError {
    #[error("empty formula")]
    Empty,
    #[error("unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("invalid cell reference {0:?}")]
    InvalidReference(String),
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("unexpected token at position {0}")]
    UnexpectedToken(usize),
    #[error("missing closing parenthesis")]
    MissingParen,
    #[error("formula is nested too deeply")]
    TooDeep,
}

/// Parse formula text into an expression tree.
pub fn parse(input: &str) -> Result<Expr, FormulaParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(FormulaParseError::Empty);
    }
    let mut parser = Parser::new(&tokens);
    let parsed = parser.parse_add_sub()?;
    if parser.pos < tokens.len() {
        return Err(FormulaParseError::UnexpectedToken(parser.pos));
    }
    Ok(parsed.expr)
}

/// Returns the number if the whole string is a single number literal.
///
/// Used for text operands, which must start with a digit: `".5"` is text,
/// even though a formula accepts `.5` as a literal.
pub fn parse_number_literal(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    if !bytes.first().is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let end = scan_number(bytes, 0)?;
    if end != bytes.len() {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

// =============================================================================
// Tokenizer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    CellRef(Position),
    InvalidRef(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, FormulaParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' => i += 1,
            b'+' => { tokens.push(Token::Plus); i += 1; }
            b'-' => { tokens.push(Token::Minus); i += 1; }
            b'*' => { tokens.push(Token::Star); i += 1; }
            b'/' => { tokens.push(Token::Slash); i += 1; }
            b'(' => { tokens.push(Token::LParen); i += 1; }
            b')' => { tokens.push(Token::RParen); i += 1; }
            b'0'..=b'9' | b'.' => {
                let end = scan_number(bytes, i)
                    .ok_or_else(|| FormulaParseError::InvalidNumber(input[i..].to_string()))?;
                let text = &input[i..end];
                let num = text
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| FormulaParseError::InvalidNumber(text.to_string()))?;
                tokens.push(Token::Number(num));
                i = end;
            }
            b'A'..=b'Z' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_uppercase() {
                    i += 1;
                }
                let digits_start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if digits_start == i {
                    return Err(FormulaParseError::InvalidReference(input[start..i].to_string()));
                }
                let text = &input[start..i];
                match Position::parse(text) {
                    Some(pos) => tokens.push(Token::CellRef(pos)),
                    None => tokens.push(Token::InvalidRef(text.to_string())),
                }
            }
            _ => {
                let bad = input[i..].chars().next().unwrap_or(' ');
                return Err(FormulaParseError::UnexpectedChar(bad, i));
            }
        }
    }

    Ok(tokens)
}

/// Scan a number literal starting at `start`; returns the end offset.
///
/// `digits ['.' digits] [exp]` or `'.' digits [exp]`, where
/// `exp = ('e'|'E') ['+'|'-'] digits`. An exponent marker not followed by
/// digits is left unconsumed.
fn scan_number(bytes: &[u8], start: usize) -> Option<usize> {
    let digits = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let int_end = digits(start);
    let mut end = int_end;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_end = digits(end + 1);
        if int_end == start && frac_end == end + 1 {
            return None; // lone '.'
        }
        end = frac_end;
    } else if int_end == start {
        return None;
    }

    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        let exp_end = digits(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }

    Some(end)
}

// =============================================================================
// Recursive descent
// =============================================================================

/// Deepest parenthesis or unary-sign nesting accepted.
pub const MAX_NESTING: usize = 256;
/// Tallest expression tree accepted. Long operator chains build a tree one
/// level taller per operator, and evaluation walks it recursively.
pub const MAX_TREE_HEIGHT: usize = 512;

/// A parsed subexpression and the height of its tree.
struct Parsed {
    expr: Expr,
    height: usize,
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0, nesting: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn enter(&mut self) -> Result<(), FormulaParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(FormulaParseError::TooDeep);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn binary(op: Op, left: Parsed, right: Parsed) -> Result<Parsed, FormulaParseError> {
        let height = left.height.max(right.height) + 1;
        if height > MAX_TREE_HEIGHT {
            return Err(FormulaParseError::TooDeep);
        }
        Ok(Parsed {
            expr: Expr::BinaryOp {
                op,
                left: Box::new(left.expr),
                right: Box::new(right.expr),
            },
            height,
        })
    }

    fn parse_add_sub(&mut self) -> Result<Parsed, FormulaParseError> {
        let mut left = self.parse_mul_div()?;

        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Op::Add,
                Some(Token::Minus) => Op::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_mul_div()?;
            left = Self::binary(op, left, right)?;
        }

        Ok(left)
    }

    fn parse_mul_div(&mut self) -> Result<Parsed, FormulaParseError> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.peek() {
                Some(Token::Star) => Op::Mul,
                Some(Token::Slash) => Op::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right)?;
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Parsed, FormulaParseError> {
        let op = match self.peek() {
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Minus) => UnaryOp::Minus,
            _ => return self.parse_primary(),
        };
        self.pos += 1;

        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();

        Ok(Parsed {
            expr: Expr::Unary {
                op,
                operand: Box::new(operand.expr),
            },
            height: operand.height + 1,
        })
    }

    fn parse_primary(&mut self) -> Result<Parsed, FormulaParseError> {
        let leaf = |expr| Parsed { expr, height: 1 };
        let token = self.peek().ok_or(FormulaParseError::UnexpectedEnd)?;
        let at = self.pos;
        self.pos += 1;

        match token {
            Token::Number(n) => Ok(leaf(Expr::Number(*n))),
            Token::CellRef(cell) => Ok(leaf(Expr::CellRef(*cell))),
            Token::InvalidRef(text) => Ok(leaf(Expr::InvalidRef(text.clone()))),
            Token::LParen => {
                self.enter()?;
                let inner = self.parse_add_sub()?;
                self.leave();
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    None => Err(FormulaParseError::MissingParen),
                    Some(_) => Err(FormulaParseError::UnexpectedToken(self.pos)),
                }
            }
            _ => Err(FormulaParseError::UnexpectedToken(at)),
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

impl Expr {
    /// Evaluate the expression. `operand` resolves each cell reference to a
    /// number; the first error raised anywhere aborts the evaluation.
    pub fn evaluate(
        &self,
        operand: &dyn Fn(Position) -> Result<f64, FormulaError>,
    ) -> Result<f64, FormulaError> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::CellRef(pos) => operand(*pos),
            Expr::InvalidRef(_) => Err(FormulaError::Ref),
            Expr::Unary { op, operand: inner } => {
                let v = inner.evaluate(operand)?;
                Ok(match op {
                    UnaryOp::Plus => v,
                    UnaryOp::Minus => -v,
                })
            }
            Expr::BinaryOp { op, left, right } => {
                let l = left.evaluate(operand)?;
                let r = right.evaluate(operand)?;
                let result = match op {
                    Op::Add => l + r,
                    Op::Sub => l - r,
                    Op::Mul => l * r,
                    Op::Div => l / r,
                };
                if result.is_finite() {
                    Ok(result)
                } else {
                    Err(FormulaError::Div0)
                }
            }
        }
    }

    /// Every valid cell position referenced, in source order, duplicates kept.
    pub fn cells(&self) -> Vec<Position> {
        let mut refs = Vec::new();
        self.collect_cells(&mut refs);
        refs
    }

    fn collect_cells(&self, refs: &mut Vec<Position>) {
        match self {
            Expr::Number(_) | Expr::InvalidRef(_) => {}
            Expr::CellRef(pos) => refs.push(*pos),
            Expr::Unary { operand, .. } => operand.collect_cells(refs),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_cells(refs);
                right.collect_cells(refs);
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::BinaryOp { op: Op::Add | Op::Sub, .. } => 1,
            Expr::BinaryOp { op: Op::Mul | Op::Div, .. } => 2,
            Expr::Unary { .. } => 3,
            _ => 4,
        }
    }
}

// =============================================================================
// Printing - canonical text with the minimum parentheses
// =============================================================================

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => f.write_str(&format_number(*n)),
            Expr::CellRef(pos) => write!(f, "{}", pos),
            Expr::InvalidRef(text) => f.write_str(text),
            Expr::Unary { op, operand } => {
                let sign = match op {
                    UnaryOp::Plus => "+",
                    UnaryOp::Minus => "-",
                };
                f.write_str(sign)?;
                write_operand(f, operand, operand.precedence() < 2)
            }
            Expr::BinaryOp { op, left, right } => {
                let prec = self.precedence();
                write_operand(f, left, left.precedence() < prec)?;
                let op_str = match op {
                    Op::Add => "+",
                    Op::Sub => "-",
                    Op::Mul => "*",
                    Op::Div => "/",
                };
                f.write_str(op_str)?;
                // a-(b+c) and a/(b*c) keep their grouping; a+(b-c) and a*(b/c) do not need it
                let right_prec = right.precedence();
                let wrap = right_prec < prec
                    || (right_prec == prec && matches!(op, Op::Sub | Op::Div));
                write_operand(f, right, wrap)
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, wrap: bool) -> fmt::Result {
    if wrap {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}
