// Configuration loading

pub mod settings;

pub use settings::{LogSettings, OutputMode, OutputSettings, Settings, SettingsError, SheetSettings};
