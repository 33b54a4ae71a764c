//! Service configuration loader for Stratagem.
//!
//! Reads `config.toml` from the data directory (`~/.stratagem/` in
//! production) and deserializes it into [`ServiceConfig`]. Falls back
//! to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use stratagem_types::config::ServiceConfig;

/// Load service configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`ServiceConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   returns the default.
pub async fn load_service_config(data_dir: &Path) -> ServiceConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                "No config.toml found at {}, using defaults",
                config_path.display()
            );
            return ServiceConfig::default();
        }
        Err(err) => {
            tracing::warn!(
                "Failed to read {}: {err}, using defaults",
                config_path.display()
            );
            return ServiceConfig::default();
        }
    };

    match toml::from_str::<ServiceConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            ServiceConfig::default()
        }
    }
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `STRATAGEM_DATA_DIR` environment variable
/// 2. Platform home directory (`~/.stratagem`)
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STRATAGEM_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".stratagem");
    }

    // Last resort: current directory
    PathBuf::from(".stratagem")
}

/// SQLite URL for the service database.
///
/// An explicit `database_path` in the config wins; otherwise the
/// database lives at `{data_dir}/stratagem.db`.
pub fn database_url(config: &ServiceConfig, data_dir: &Path) -> String {
    match &config.database_path {
        Some(path) => format!("sqlite://{path}?mode=rwc"),
        None => format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("stratagem.db").display()
        ),
    }
}
