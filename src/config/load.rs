use super::{default_global_config_path, ConfigError, Settings};
use std::path::Path;

/// Loads `~/.deckflow/config.yaml`, falling back to defaults when the file is absent.
pub fn load_global_settings() -> Result<Settings, ConfigError> {
    let path = default_global_config_path()?;
    if !path.exists() {
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    load_settings(&path)
}

pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let settings = Settings::from_path(path)?;
    settings.validate()?;
    Ok(settings)
}
