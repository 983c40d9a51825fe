use super::{ConfigError, ServerConfig};
use std::path::PathBuf;

pub const CONFIG_PATH_ENV: &str = "FLOWCHAT_CONFIG";
pub const BIND_ENV: &str = "FLOWCHAT_BIND";
pub const DATABASE_ENV: &str = "FLOWCHAT_DATABASE";

/// Loads the YAML file named by `cli_path` or `FLOWCHAT_CONFIG`, falling
/// back to defaults, then applies the environment overrides and validates.
pub fn load_server_config(
    cli_path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ServerConfig, ConfigError> {
    let path = cli_path.or_else(|| {
        env(CONFIG_PATH_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    });
    let mut config = match path {
        Some(path) => ServerConfig::from_path(&path)?,
        None => ServerConfig::default(),
    };

    if let Some(bind) = env(BIND_ENV).filter(|value| !value.trim().is_empty()) {
        config.bind_address = bind.trim().to_string();
    }
    if let Some(database) = env(DATABASE_ENV).filter(|value| !value.trim().is_empty()) {
        config.database_path = PathBuf::from(database.trim());
    }

    config.validate()?;
    Ok(config)
}
