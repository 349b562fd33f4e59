//! CLI error types with miette diagnostics.
//!
//! Maps `ConfigError` and `CoreError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use autoarm_config::ConfigError;
use autoarm_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid {field}: {reason}")]
    #[diagnostic(
        code(autoarm::validation),
        help("Fix {field} in {path}, or override it with an AUTOARM_* variable.")
    )]
    Validation {
        field: String,
        reason: String,
        path: String,
    },

    #[error("Configuration could not be loaded from {path}")]
    #[diagnostic(
        code(autoarm::config),
        help("Check the file syntax. Nested keys in environment overrides use '__'.")
    )]
    ConfigLoad {
        path: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("Configuration file {path} not found")]
    #[diagnostic(
        code(autoarm::no_config),
        help("Create it, point --config at another file, or set AUTOARM_CONFIG.")
    )]
    NoConfig { path: String },

    // ── Arguments ────────────────────────────────────────────────────

    #[error("Invalid value for --{flag}: {reason}")]
    #[diagnostic(code(autoarm::usage))]
    Usage { flag: String, reason: String },

    // ── Engine ───────────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(autoarm::engine))]
    Core(#[from] CoreError),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error("Could not render output: {message}")]
    #[diagnostic(code(autoarm::render))]
    Render { message: String },
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::ConfigLoad { .. } | Self::NoConfig { .. } => {
                exit_code::CONFIG
            }
            Self::Usage { .. } => exit_code::USAGE,
            Self::Core(_) | Self::Render { .. } => exit_code::GENERAL,
        }
    }

    /// Attach the config path to a config crate error.
    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        let path = path.display().to_string();
        match err {
            ConfigError::Validation { field, reason } => Self::Validation {
                field,
                reason,
                path,
            },
            other => Self::ConfigLoad {
                path,
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_keeps_field_and_exit_code() {
        let err = CliError::from_config(
            ConfigError::Validation {
                field: "alarm_panel".into(),
                reason: "required".into(),
            },
            std::path::Path::new("/etc/autoarm.toml"),
        );
        assert_eq!(err.exit_code(), exit_code::CONFIG);
        assert_eq!(err.to_string(), "Invalid alarm_panel: required");
    }

    #[test]
    fn engine_errors_are_general() {
        assert_eq!(
            CliError::from(CoreError::NotRunning).exit_code(),
            exit_code::GENERAL
        );
    }
}
