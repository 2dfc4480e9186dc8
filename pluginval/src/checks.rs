use pluginval_core::child_job::{JobRunner, JobSpec};
use pluginval_core::types::{now_unix_ms, Finding, Severity, ValidationReport};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BUNDLE_EXTENSIONS: &[&str] = &["vst3", "component", "vst", "clap", "lv2", "aaxplugin"];
const BINARY_EXTENSIONS: &[&str] = &["so", "dll", "dylib", "vst3", "clap"];
const MAX_BUNDLE_DEPTH: usize = 6;
const TEMP_LOCATION_STRICTNESS: u32 = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct PluginChecks;

impl JobRunner for PluginChecks {
  fn run_job(&self, job: &JobSpec) -> ValidationReport {
    let started = now_unix_ms();
    let findings = run(&job.plugin, job.strictness_level);
    ValidationReport::from_findings(&job.job_id, &job.plugin, findings, started)
  }
}

pub fn run(plugin: &Path, strictness_level: u32) -> Vec<Finding> {
  let mut findings = Vec::new();

  if !plugin.exists() {
    findings.push(Finding::new(
      "C001",
      Severity::Error,
      format!("plugin not found: {}", plugin.display()),
    ));
    return findings;
  }

  if !is_known_format(plugin) {
    findings.push(Finding::new(
      "C002",
      Severity::Error,
      "unrecognized plugin format (expected vst3, component, vst, clap, lv2 or a shared library)",
    ));
    return findings;
  }

  let binary = if plugin.is_dir() {
    match find_bundle_binary(plugin) {
      Some(b) => b,
      None => {
        findings.push(Finding::new(
          "C003",
          Severity::Error,
          "bundle contains no plugin binary",
        ));
        return findings;
      }
    }
  } else {
    plugin.to_path_buf()
  };

  match fs::metadata(&binary) {
    Ok(md) if md.len() == 0 => {
      findings.push(Finding::new(
        "C004",
        Severity::Error,
        format!("plugin binary is empty: {}", safe_filename(&binary)),
      ));
      return findings;
    }
    Ok(_) => {}
    Err(e) => {
      findings.push(Finding::new(
        "C004",
        Severity::Error,
        format!("plugin binary unreadable: {e}"),
      ));
      return findings;
    }
  }

  match sha256_hex(&binary) {
    Ok(hash) => findings.push(Finding::new(
      "I001",
      Severity::Info,
      format!("binary={} sha256={hash}", safe_filename(&binary)),
    )),
    Err(e) => findings.push(Finding::new(
      "C004",
      Severity::Error,
      format!("plugin binary unreadable: {e}"),
    )),
  }

  if is_temporary_location(plugin) {
    let severity = if strictness_level >= TEMP_LOCATION_STRICTNESS {
      Severity::Error
    } else {
      Severity::Warning
    };
    findings.push(Finding::new(
      "W001",
      severity,
      "plugin is installed in a temporary directory",
    ));
  }

  findings
}

fn extension(p: &Path) -> String {
  p.extension()
    .and_then(|s| s.to_str())
    .unwrap_or("")
    .to_ascii_lowercase()
}

fn is_known_format(p: &Path) -> bool {
  let ext = extension(p);
  BUNDLE_EXTENSIONS.contains(&ext.as_str()) || BINARY_EXTENSIONS.contains(&ext.as_str())
}

fn find_bundle_binary(bundle: &Path) -> Option<PathBuf> {
  WalkDir::new(bundle)
    .follow_links(false)
    .max_depth(MAX_BUNDLE_DEPTH)
    .sort_by_file_name()
    .into_iter()
    .flatten()
    .filter(|e| e.file_type().is_file())
    .map(|e| e.into_path())
    .find(|p| is_binary_candidate(bundle, p))
}

fn is_binary_candidate(bundle: &Path, p: &Path) -> bool {
  if safe_filename(p).starts_with('.') {
    return false;
  }
  let ext = extension(p);
  if BINARY_EXTENSIONS.contains(&ext.as_str()) {
    return true;
  }
  // Mach-O modules sit extension-less in Contents/MacOS.
  ext.is_empty()
    && p
      .strip_prefix(bundle)
      .map(|rel| rel.starts_with("Contents/MacOS"))
      .unwrap_or(false)
}

fn is_temporary_location(p: &Path) -> bool {
  p.starts_with(std::env::temp_dir())
}

fn safe_filename(p: &Path) -> String {
  p.file_name()
    .and_then(|s| s.to_str())
    .unwrap_or("<file>")
    .to_string()
}

fn sha256_hex(path: &Path) -> anyhow::Result<String> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buf = [0u8; 64 * 1024];
  loop {
    let n = file.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(format!("{:x}", hasher.finalize()))
}
