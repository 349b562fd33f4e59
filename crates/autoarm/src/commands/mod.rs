//! Subcommand handlers.

pub mod config_cmd;
pub mod reset;
pub mod states;

use std::path::PathBuf;

use autoarm_core::ArmerConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// `--config`, or the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(autoarm_config::config_path)
}

/// Load and validate the configuration. A missing file is an error here:
/// figment would otherwise fall back to defaults silently.
pub fn load_config(global: &GlobalOpts) -> Result<(PathBuf, ArmerConfig), CliError> {
    let path = config_path(global);
    if !path.is_file() {
        return Err(CliError::NoConfig {
            path: path.display().to_string(),
        });
    }
    tracing::debug!(path = %path.display(), "loading configuration");
    let config =
        autoarm_config::load_armer_config(&path).map_err(|e| CliError::from_config(e, &path))?;
    Ok((path, config))
}
