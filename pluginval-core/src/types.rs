use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MIN_STRICTNESS: u32 = 1;
pub const MAX_STRICTNESS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Info,
  Warning,
  Error,
}

pub type CheckId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
  pub check_id: CheckId,
  pub severity: Severity,
  pub description: String,
  pub timestamp_unix_ms: u64,
}

impl Finding {
  pub fn new(check_id: &str, severity: Severity, description: impl Into<String>) -> Self {
    Self {
      check_id: check_id.to_string(),
      severity,
      description: description.into(),
      timestamp_unix_ms: now_unix_ms(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
  pub plugin: PathBuf,
  pub strictness_level: u32,
  pub timeout_ms: u64,
  pub in_process: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
  pub job_id: String,
  pub plugin: PathBuf,
  pub passed: bool,
  pub findings: Vec<Finding>,
  pub started_at_unix_ms: u64,
  pub finished_at_unix_ms: u64,
}

impl ValidationReport {
  pub fn from_findings(
    job_id: &str,
    plugin: &Path,
    findings: Vec<Finding>,
    started_at_unix_ms: u64,
  ) -> Self {
    let passed = !findings.iter().any(|f| f.severity == Severity::Error);
    Self {
      job_id: job_id.to_string(),
      plugin: plugin.to_path_buf(),
      passed,
      findings,
      started_at_unix_ms,
      finished_at_unix_ms: now_unix_ms(),
    }
  }

  pub fn failed(job_id: &str, plugin: &Path, check_id: &str, description: impl Into<String>) -> Self {
    let started = now_unix_ms();
    Self::from_findings(
      job_id,
      plugin,
      vec![Finding::new(check_id, Severity::Error, description)],
      started,
    )
  }
}

pub fn clamp_strictness(level: u32) -> u32 {
  level.clamp(MIN_STRICTNESS, MAX_STRICTNESS)
}

pub fn display_name(path: &Path) -> String {
  // Logs carry the file name only; full paths can contain user identifiers.
  path
    .file_name()
    .and_then(|s| s.to_str())
    .unwrap_or("<plugin>")
    .to_string()
}

pub fn now_unix_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}
