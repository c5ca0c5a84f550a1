//! Configuration loading

use std::path::Path;

use crate::{Config, Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "LIVECAST_CONFIG_PATH";

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `explicit_path` (from the command line)
/// 2. `LIVECAST_CONFIG_PATH` environment variable
/// 3. ./config.yaml (current working directory)
/// 4. Fall back to environment variables only
///
/// A file named by 1 or 2 must exist. Runs before logging is initialized,
/// so progress goes to stderr.
pub fn load_config(explicit_path: Option<&str>) -> Result<Config> {
    let requested = explicit_path
        .map(str::to_string)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok());

    let config = match resolve_config_path(requested)? {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::from_file(&path)?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env()?
        }
    };

    config.validate().map_err(|errors| {
        Error::InvalidInput(format!(
            "configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ))
    })?;

    Ok(config)
}

fn resolve_config_path(requested: Option<String>) -> Result<Option<String>> {
    if let Some(path) = requested {
        if !Path::new(&path).is_file() {
            return Err(Error::InvalidInput(format!("config file not found: {path}")));
        }
        return Ok(Some(path));
    }

    let cwd = "config.yaml";
    Ok(Path::new(cwd).is_file().then(|| cwd.to_string()))
}
