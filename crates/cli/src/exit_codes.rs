//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, bad script)   |
//! | 3-9     | environment      | I/O and settings codes                   |
//! | 10-19   | sheet            | Rejected sheet operations                |
//! | 20-29   | eval             | Formula evaluation codes                 |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use gridcalc_engine::SheetError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, malformed script line.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Environment (3-9)
// =============================================================================

/// Reading the script or writing output failed.
pub const EXIT_IO: u8 = 3;

/// Settings file could not be read, parsed or written.
pub const EXIT_CONFIG: u8 = 4;

// =============================================================================
// Sheet (10-19)
// =============================================================================

/// Position outside the grid or the configured sheet limits.
pub const EXIT_SHEET_POSITION: u8 = 10;

/// Write rejected because it would create a circular dependency.
pub const EXIT_SHEET_CIRCULAR: u8 = 11;

/// Formula text could not be parsed.
pub const EXIT_SHEET_PARSE: u8 = 12;

// =============================================================================
// Eval (20-29)
// =============================================================================

/// Formula parsed but evaluated to an error value (#REF!, #VALUE!, #DIV/0!).
pub const EXIT_EVAL_ERROR: u8 = 20;

/// Map a SheetError to its exit code.
pub fn sheet_exit_code(err: &SheetError) -> u8 {
    match err {
        SheetError::InvalidPosition(_) => EXIT_SHEET_POSITION,
        SheetError::CircularDependency(_) => EXIT_SHEET_CIRCULAR,
        SheetError::FormulaParse(_) => EXIT_SHEET_PARSE,
    }
}
