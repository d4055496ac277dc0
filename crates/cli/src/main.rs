// gridcalc CLI - run sheet scripts and evaluate formulas headlessly

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use gridcalc_cli::exit_codes::{
    EXIT_CONFIG, EXIT_EVAL_ERROR, EXIT_IO, EXIT_SHEET_PARSE, EXIT_SUCCESS, EXIT_USAGE,
};
use gridcalc_cli::script::ScriptRunner;
use gridcalc_config::{OutputMode, Settings, SettingsError};
use gridcalc_engine::{Formula, FormulaError, Position, Sheet, SheetLimits, Value};

/// Log filter override, same syntax as `RUST_LOG`.
const LOG_ENV: &str = "GRIDCALC_LOG";

#[derive(Parser)]
#[command(name = "gridcalc")]
#[command(about = "Dependency-tracked spreadsheet engine (headless)")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Settings file (default: <config dir>/gridcalc/settings.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sheet script, one command per line
    #[command(after_help = "\
Script commands:
  set <POS> <text...>    Write a cell (text may be empty, =... is a formula)
  clear <POS>            Remove a cell
  get <POS>              Print POS, text and value, tab-separated
  size                   Print the printable area as rows and columns
  print [values|texts]   Print the sheet, tab-separated

Blank lines and lines starting with # are ignored.

Examples:
  gridcalc run model.grid
  printf 'set A1 2\\nset B1 =A1*21\\nget B1\\n' | gridcalc run")]
    Run {
        /// Script file (reads stdin if omitted or "-")
        script: Option<PathBuf>,

        /// What a bare `print` emits (overrides settings)
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },

    /// Evaluate one formula against an empty sheet
    #[command(after_help = "\
Examples:
  gridcalc eval '1+2*3'
  gridcalc eval '=(1+2)*3' --json")]
    Eval {
        /// Formula text, with or without the leading =
        #[arg(allow_hyphen_values = true)]
        formula: String,

        /// Print a JSON object instead of the bare value
        #[arg(long)]
        json: bool,
    },

    /// Show the effective settings
    Config {
        /// Write a default settings file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Values,
    Texts,
}

impl From<Mode> for OutputMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Values => OutputMode::Values,
            Mode::Texts => OutputMode::Texts,
        }
    }
}

fn long_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GRIDCALC_COMMIT"), ")",
            "\nengine:  gridcalc-engine ", env!("CARGO_PKG_VERSION"),
            "\nbuild:   debug",
            "\ntarget:  ", env!("GRIDCALC_TARGET"),
        )
    } else {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GRIDCALC_COMMIT"), ")",
            "\nengine:  gridcalc-engine ", env!("CARGO_PKG_VERSION"),
            "\nbuild:   release",
            "\ntarget:  ", env!("GRIDCALC_TARGET"),
        )
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // `config --init` creates the file, so there is nothing to load yet
    let loaded = match cli.command {
        Commands::Config { init: true } => Ok((Settings::default(), None)),
        _ => load_settings(cli.config.as_deref()),
    };

    let result = loaded.and_then(|(settings, ignored)| {
        init_logging(&settings.log.level);
        if let Some(e) = ignored {
            log::warn!("{}; using default settings", e);
        }

        match cli.command {
            Commands::Run { script, mode } => cmd_run(&settings, script, mode),
            Commands::Eval { formula, json } => cmd_eval(&formula, json),
            Commands::Config { init } => cmd_config(&settings, cli.config.as_deref(), init),
        }
    });

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn io(err: io::Error) -> Self {
        Self::new(EXIT_IO, err.to_string())
    }

    pub fn config(err: SettingsError) -> Self {
        Self::new(EXIT_CONFIG, err.to_string())
    }

    pub fn eval(msg: impl Into<String>) -> Self {
        Self::new(EXIT_EVAL_ERROR, msg)
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// settings + logging
// ============================================================================

/// An explicit settings file must load. The default one may be broken; the
/// error is handed back so it can be logged once logging is up.
fn load_settings(explicit: Option<&Path>) -> Result<(Settings, Option<SettingsError>), CliError> {
    match explicit {
        Some(path) => Settings::load_from(path)
            .map(|settings| (settings, None))
            .map_err(CliError::config),
        None => Ok(match Settings::load() {
            Ok(settings) => (settings, None),
            Err(e) => (Settings::default(), Some(e)),
        }),
    }
}

/// Log to stderr. `GRIDCALC_LOG` wins over the settings file.
fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    // engine records arrive through the `log` bridge installed by try_init
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

// ============================================================================
// run
// ============================================================================

fn cmd_run(settings: &Settings, script: Option<PathBuf>, mode: Option<Mode>) -> Result<(), CliError> {
    let input: Box<dyn BufRead> = match script {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::open(&path).map_err(|e| {
                CliError::new(EXIT_IO, format!("cannot open {}: {}", path.display(), e))
            })?;
            Box::new(BufReader::new(file))
        }
        _ => Box::new(io::stdin().lock()),
    };

    let limits = SheetLimits::new(settings.sheet.max_rows, settings.sheet.max_cols);
    let default_mode = mode.map(OutputMode::from).unwrap_or(settings.output.mode);
    let mut runner = ScriptRunner::new(Sheet::with_limits(limits), default_mode);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let stderr = io::stderr();
    let mut diag = stderr.lock();

    let report = runner.run(input, &mut out, &mut diag).map_err(CliError::io)?;
    out.flush().map_err(CliError::io)?;
    log::debug!(
        "script finished: {} command(s) ok, {} failed",
        report.executed,
        report.failures.len()
    );

    if report.is_success() {
        return Ok(());
    }

    let failed = report.failures.len();
    Err(CliError::new(
        report.exit_code(),
        format!(
            "{} script line{} failed",
            failed,
            if failed == 1 { "" } else { "s" }
        ),
    ))
}

// ============================================================================
// eval
// ============================================================================

#[derive(Serialize)]
struct EvalOutput {
    expression: String,
    value: EvalValue,
    references: Vec<Position>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EvalValue {
    Number(f64),
    Error(&'static str),
}

fn cmd_eval(formula: &str, json: bool) -> Result<(), CliError> {
    let expression = formula.strip_prefix('=').unwrap_or(formula);
    let parsed = Formula::parse(expression).map_err(|e| {
        CliError::new(EXIT_SHEET_PARSE, format!("formula parse error: {}", e))
            .with_hint("formulas use numbers, A1 references, + - * / and parentheses")
    })?;

    // every reference resolves to an absent cell, i.e. zero
    let value = Value::from(parsed.evaluate(&Sheet::new()));

    if json {
        let output = EvalOutput {
            expression: parsed.expression(),
            value: match &value {
                Value::Error(e) => EvalValue::Error(e.as_str()),
                other => EvalValue::Number(other.as_number().unwrap_or_default()),
            },
            references: parsed.referenced_cells().to_vec(),
        };
        let text = serde_json::to_string(&output)
            .map_err(|e| CliError::new(EXIT_IO, e.to_string()))?;
        println!("{}", text);
    } else {
        println!("{}", value);
    }

    match value.as_error() {
        Some(e) => Err(CliError::eval(format!("formula returned {}", e)).with_hint(error_hint(e))),
        None => Ok(()),
    }
}

fn error_hint(err: FormulaError) -> &'static str {
    match err {
        FormulaError::Ref => "a cell reference is outside the grid; check your formula references",
        FormulaError::Value => "an operand could not be used as a number",
        FormulaError::Div0 => "division by zero in your formula",
    }
}

// ============================================================================
// config
// ============================================================================

fn cmd_config(settings: &Settings, explicit: Option<&Path>, init: bool) -> Result<(), CliError> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(Settings::config_path);

    if init {
        if path.exists() {
            return Err(CliError::usage(format!("{} already exists", path.display())));
        }
        Settings::default().save_to(&path).map_err(CliError::config)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let text = settings.to_toml().map_err(CliError::config)?;
    println!("# {}", path.display());
    print!("{}", text);
    Ok(())
}
