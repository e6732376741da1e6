use backup_engine::Config;
use std::path::Path;

/// Load `.env`, then the TOML file (or defaults), then environment overrides.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }

    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;

    Ok(config)
}
