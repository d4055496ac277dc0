//! Line-oriented sheet scripts.
//!
//! ```text
//! # comment
//! set A1 12
//! set B1 =A1*2
//! get B1
//! clear A1
//! size
//! print values
//! ```
//!
//! Each line is one command. A failing line is reported and skipped; the
//! remaining lines still run.

use std::io::{self, BufRead, Write};

use gridcalc_config::OutputMode;
use gridcalc_engine::{Position, Sheet, SheetError};

use crate::exit_codes::{sheet_exit_code, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    /// `set <POS> <text...>`; the text may be empty
    Set { pos: Position, text: String },
    Clear(Position),
    Get(Position),
    Size,
    /// `print [values|texts]`; `None` uses the runner's default
    Print(Option<OutputMode>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptSyntaxError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("`{0}` needs a cell position")]
    MissingPosition(&'static str),
    #[error("invalid cell position {0:?}")]
    InvalidPosition(String),
    #[error("unexpected argument {0:?}")]
    UnexpectedArgument(String),
    #[error("unknown print mode {0:?} (expected values or texts)")]
    InvalidMode(String),
}

/// Why a script line failed.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error(transparent)]
    Syntax(#[from] ScriptSyntaxError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
}

impl LineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            LineError::Syntax(_) => EXIT_USAGE,
            LineError::Sheet(e) => sheet_exit_code(e),
        }
    }
}

#[derive(Debug)]
pub struct Failure {
    /// 1-based
    pub line: usize,
    pub error: LineError,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub executed: usize,
    pub failures: Vec<Failure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Exit code of the first failing line, or success.
    pub fn exit_code(&self) -> u8 {
        self.failures
            .first()
            .map_or(EXIT_SUCCESS, |f| f.error.exit_code())
    }
}

/// Parse one script line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ScriptCommand>, ScriptSyntaxError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let (keyword, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
    let command = match keyword {
        "set" => {
            // text is everything after the first space following the position
            let (pos, text) = rest.split_once(' ').unwrap_or((rest, ""));
            ScriptCommand::Set {
                pos: parse_position("set", pos)?,
                text: text.to_string(),
            }
        }
        "clear" => ScriptCommand::Clear(single_position("clear", rest)?),
        "get" => ScriptCommand::Get(single_position("get", rest)?),
        "size" => {
            let extra = rest.trim();
            if !extra.is_empty() {
                return Err(ScriptSyntaxError::UnexpectedArgument(extra.to_string()));
            }
            ScriptCommand::Size
        }
        "print" => match rest.trim() {
            "" => ScriptCommand::Print(None),
            "values" => ScriptCommand::Print(Some(OutputMode::Values)),
            "texts" => ScriptCommand::Print(Some(OutputMode::Texts)),
            other => return Err(ScriptSyntaxError::InvalidMode(other.to_string())),
        },
        other => return Err(ScriptSyntaxError::UnknownCommand(other.to_string())),
    };

    Ok(Some(command))
}

fn parse_position(command: &'static str, token: &str) -> Result<Position, ScriptSyntaxError> {
    if token.is_empty() {
        return Err(ScriptSyntaxError::MissingPosition(command));
    }
    Position::parse(token).ok_or_else(|| ScriptSyntaxError::InvalidPosition(token.to_string()))
}

fn single_position(command: &'static str, rest: &str) -> Result<Position, ScriptSyntaxError> {
    let rest = rest.trim();
    if let Some((_, extra)) = rest.split_once(char::is_whitespace) {
        return Err(ScriptSyntaxError::UnexpectedArgument(extra.trim().to_string()));
    }
    parse_position(command, rest)
}

/// Executes script commands against one sheet.
pub struct ScriptRunner {
    sheet: Sheet,
    default_mode: OutputMode,
}

impl ScriptRunner {
    pub fn new(sheet: Sheet, default_mode: OutputMode) -> Self {
        Self { sheet, default_mode }
    }

    pub fn sheet(&self) -> &Sheet {
        &self.sheet
    }

    /// Run one command. Output goes to `out`. The outer error is an output
    /// failure; the inner one is a rejected sheet operation.
    pub fn execute<W: Write>(
        &mut self,
        command: &ScriptCommand,
        out: &mut W,
    ) -> io::Result<Result<(), SheetError>> {
        match command {
            ScriptCommand::Set { pos, text } => Ok(self.sheet.set_cell(*pos, text)),
            ScriptCommand::Clear(pos) => Ok(self.sheet.clear_cell(*pos)),
            ScriptCommand::Get(pos) => {
                let (text, value) = match self.sheet.get_cell(*pos) {
                    Ok(Some(cell)) => (cell.text(), cell.value(&self.sheet).to_string()),
                    Ok(None) => (String::new(), String::new()),
                    Err(e) => return Ok(Err(e)),
                };
                writeln!(out, "{}\t{}\t{}", pos, text, value)?;
                Ok(Ok(()))
            }
            ScriptCommand::Size => {
                let size = self.sheet.printable_size();
                writeln!(out, "{}\t{}", size.rows, size.cols)?;
                Ok(Ok(()))
            }
            ScriptCommand::Print(mode) => {
                match mode.unwrap_or(self.default_mode) {
                    OutputMode::Values => self.sheet.print_values(out)?,
                    OutputMode::Texts => self.sheet.print_texts(out)?,
                }
                Ok(Ok(()))
            }
        }
    }

    /// Run every line of `input`. Failures are written to `diag` as
    /// `line N: message` and collected in the report.
    pub fn run<R, W, E>(&mut self, input: R, out: &mut W, diag: &mut E) -> io::Result<RunReport>
    where
        R: BufRead,
        W: Write,
        E: Write,
    {
        let mut report = RunReport::default();

        for (idx, line) in input.lines().enumerate() {
            let line = line?;
            let line_no = idx + 1;

            let error = match parse_line(&line) {
                Ok(None) => continue,
                Ok(Some(command)) => match self.execute(&command, out)? {
                    Ok(()) => {
                        report.executed += 1;
                        continue;
                    }
                    Err(e) => LineError::Sheet(e),
                },
                Err(e) => LineError::Syntax(e),
            };

            log::debug!("script line {} failed: {}", line_no, error);
            writeln!(diag, "line {}: {}", line_no, error)?;
            report.failures.push(Failure {
                line: line_no,
                error,
            });
        }

        Ok(report)
    }
}
