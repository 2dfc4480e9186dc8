use crate::command_line::CommandLine;
use crate::types::{display_name, ValidationReport};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const EXIT_PASSED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_BAD_JOB: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
  pub job_id: String,
  pub plugin: PathBuf,
  pub strictness_level: u32,
}

impl JobSpec {
  pub fn new(plugin: &Path, strictness_level: u32) -> Self {
    Self {
      job_id: uuid::Uuid::new_v4().to_string(),
      plugin: plugin.to_path_buf(),
      strictness_level,
    }
  }

  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let raw = fs::read_to_string(path)
      .with_context(|| format!("read job file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parse job file {}", path.display()))
  }

  pub fn write(&self, dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.toml", self.job_id));
    fs::write(&path, toml::to_string_pretty(self)?)?;
    Ok(path)
  }
}

pub trait JobRunner {
  fn run_job(&self, job: &JobSpec) -> ValidationReport;
}

pub fn invoke_if_requested(
  cmd: &CommandLine,
  runner: &dyn JobRunner,
  out: &mut dyn Write,
) -> Option<i32> {
  let job_file = cmd.child_job()?;
  Some(run(job_file, runner, out))
}

pub fn run(job_file: &Path, runner: &dyn JobRunner, out: &mut dyn Write) -> i32 {
  let job = match JobSpec::load(job_file) {
    Ok(job) => job,
    Err(e) => {
      tracing::error!(error = ?e, "child job rejected");
      return EXIT_BAD_JOB;
    }
  };

  tracing::debug!(
    job_id = %job.job_id,
    plugin = %display_name(&job.plugin),
    "child job started"
  );
  let report = runner.run_job(&job);

  if let Err(e) = write_report(out, &report) {
    tracing::error!(error = ?e, "child job could not report back");
    return EXIT_FAILED;
  }
  exit_code_for(&report)
}

pub fn exit_code_for(report: &ValidationReport) -> i32 {
  if report.passed {
    EXIT_PASSED
  } else {
    EXIT_FAILED
  }
}

pub fn write_report(out: &mut dyn Write, report: &ValidationReport) -> anyhow::Result<()> {
  let line = serde_json::to_string(report)?;
  writeln!(out, "{line}")?;
  out.flush()?;
  Ok(())
}

// Picks the report out of a child's stdout; the last JSON line wins.
pub fn decode_report(stdout: &str) -> Option<ValidationReport> {
  stdout
    .lines()
    .rev()
    .map(str::trim)
    .filter(|l| l.starts_with('{'))
    .find_map(|l| serde_json::from_str(l).ok())
}
