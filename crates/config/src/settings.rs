// Application settings
// Loaded from ~/.config/gridcalc/settings.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Grid size used when the settings file says nothing.
pub const DEFAULT_MAX_ROWS: usize = 16384;
pub const DEFAULT_MAX_COLS: usize = 16384;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// What `print` emits when the command does not say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Evaluated values (default)
    #[default]
    Values,
    /// Raw cell text, formulas in canonical form
    Texts,
}

/// Addressable area of the sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetSettings {
    pub max_rows: usize,
    pub max_cols: usize,
}

impl Default for SheetSettings {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_cols: DEFAULT_MAX_COLS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub mode: OutputMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive, same syntax as the `GRIDCALC_LOG` variable
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sheet: SheetSettings,
    pub output: OutputSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gridcalc")
            .join("settings.toml")
    }

    /// Load settings from the default location. A missing file means
    /// defaults; an unreadable or invalid one is an error the caller may
    /// choose to ignore.
    pub fn load() -> Result<Self, SettingsError> {
        let path = Self::config_path();
        if !path.exists() {
            log::debug!("no settings file at {}", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load settings from an explicit path. Any failure is an error.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse settings from TOML text. Missing keys take their defaults.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |source: std::io::Error| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, self.to_toml()?).map_err(write_err)
    }
}
