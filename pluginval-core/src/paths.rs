use std::path::{Path, PathBuf};

pub const APP_DIR_NAME: &str = "PluginValidator";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Some(home) = std::env::var_os("PLUGINVAL_HOME") {
    return Ok(PathBuf::from(home));
  }
  let config_dir = dirs::config_dir()
    .ok_or_else(|| anyhow::anyhow!("no per-user configuration directory on this platform"))?;
  Ok(config_dir.join(APP_DIR_NAME))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn preferences_path(base: &Path) -> PathBuf {
  base.join(format!("{APP_DIR_NAME}.xml"))
}

pub fn jobs_dir(base: &Path) -> PathBuf {
  base.join("jobs")
}
