use crate::types::{clamp_strictness, MAX_STRICTNESS, MIN_STRICTNESS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub logging: LoggingConfig,
  pub validation: ValidationConfig,
  pub preferences: PreferencesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
  #[serde(default = "default_strictness_level")]
  pub strictness_level: u32,

  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,

  #[serde(default)]
  pub in_process: bool,
}

impl Default for ValidationConfig {
  fn default() -> Self {
    Self {
      strictness_level: default_strictness_level(),
      timeout_ms: default_timeout_ms(),
      in_process: false,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencesConfig {
  #[serde(default = "default_save_delay_ms")]
  pub save_delay_ms: u64,
}

impl PreferencesConfig {
  pub fn save_delay(&self) -> Duration {
    Duration::from_millis(self.save_delay_ms)
  }
}

impl Default for PreferencesConfig {
  fn default() -> Self {
    Self {
      save_delay_ms: default_save_delay_ms(),
    }
  }
}

fn default_strictness_level() -> u32 {
  5
}

fn default_timeout_ms() -> u64 {
  30_000
}

fn default_save_delay_ms() -> u64 {
  2_000
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  logging: Option<LoggingConfig>,
  #[serde(default)]
  validation: Option<ValidationConfig>,
  #[serde(default)]
  preferences: Option<PreferencesConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config {
      logging: self.logging.unwrap_or_default(),
      validation: self.validation.unwrap_or_default(),
      preferences: self.preferences.unwrap_or_default(),
    };

    let requested = cfg.validation.strictness_level;
    cfg.validation.strictness_level = clamp_strictness(requested);
    if cfg.validation.strictness_level != requested {
      tracing::warn!(
        requested,
        min = MIN_STRICTNESS,
        max = MAX_STRICTNESS,
        "validation.strictness_level out of range; clamped"
      );
    }
    if cfg.validation.timeout_ms == 0 {
      cfg.validation.timeout_ms = default_timeout_ms();
      tracing::warn!("validation.timeout_ms must be > 0; using default");
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.logging.is_none() || self.validation.is_none() || self.preferences.is_none()
  }
}

// Runs before logging exists, so notices go to stderr.
pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  let dir = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  fs::create_dir_all(dir)?;

  if !path.exists() {
    let cfg = Config::default();
    save(path, &cfg)?;
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  let file = match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => file,
    Err(e) => {
      let moved_to = sibling(path, "bad");
      let _ = fs::rename(path, &moved_to);
      let cfg = Config::default();
      save(path, &cfg)?;
      eprintln!(
        "pluginval: config {} was invalid and has been reset (old file: {}): {e}",
        path.display(),
        moved_to.display()
      );
      return Ok(cfg);
    }
  };

  let incomplete = file.needs_upgrade();
  let cfg = file.normalize();
  if incomplete {
    let kept = sibling(path, "bak");
    let _ = fs::copy(path, &kept);
    if let Err(e) = save(path, &cfg) {
      eprintln!("pluginval: could not fill in config defaults: {e:#}");
    } else {
      eprintln!(
        "pluginval: added missing config sections to {} (previous: {})",
        path.display(),
        kept.display()
      );
    }
  }
  Ok(cfg)
}

fn save(path: &Path, cfg: &Config) -> anyhow::Result<()> {
  let file = ConfigFile {
    logging: Some(cfg.logging.clone()),
    validation: Some(cfg.validation.clone()),
    preferences: Some(cfg.preferences.clone()),
  };
  write_atomic(path, &toml::to_string_pretty(&file)?)
}

// `config.toml.<tag>-<unix seconds>` next to `path`.
fn sibling(path: &Path, tag: &str) -> PathBuf {
  let stamp = std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs();
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "config.toml".to_string());
  path.with_file_name(format!("{name}.{tag}-{stamp}"))
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let Some(dir) = path.parent() else {
    anyhow::bail!("file path has no parent: {}", path.display());
  };
  fs::create_dir_all(dir)?;

  let name = path.file_name().unwrap_or_default().to_string_lossy();
  let tmp = dir.join(format!(".{name}.tmp"));
  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}
