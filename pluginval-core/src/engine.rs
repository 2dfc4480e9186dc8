use crate::child_job::{self, JobRunner, JobSpec};
use crate::command_line::CHILD_JOB_FLAG;
use crate::types::{display_name, ValidationReport, ValidationRequest};
use anyhow::Context;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const CHILD_POLL: Duration = Duration::from_millis(50);

pub trait ValidationEngine {
  fn validate(&self, request: &ValidationRequest) -> ValidationReport;
}

pub struct Validator<R> {
  runner: R,
  jobs_dir: PathBuf,
  child_exe: Option<PathBuf>,
}

impl<R: JobRunner> Validator<R> {
  pub fn new(runner: R, jobs_dir: PathBuf) -> Self {
    Self {
      runner,
      jobs_dir,
      child_exe: None,
    }
  }

  pub fn with_child_exe(mut self, exe: PathBuf) -> Self {
    self.child_exe = Some(exe);
    self
  }

  fn validate_in_child(&self, job: &JobSpec, timeout: Duration) -> anyhow::Result<ValidationReport> {
    let exe = match &self.child_exe {
      Some(exe) => exe.clone(),
      None => std::env::current_exe().context("locate pluginval executable")?,
    };
    let job_file = job.write(&self.jobs_dir)?;

    let mut child = Command::new(&exe)
      .arg(CHILD_JOB_FLAG)
      .arg(&job_file)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .spawn()
      .with_context(|| format!("spawn child job {}", exe.display()))?;
    tracing::debug!(job_id = %job.job_id, pid = child.id(), "child job spawned");

    // Drained while waiting; a child blocked on a full pipe never exits.
    let reader = spawn_stdout_reader(child.stdout.take());
    let status = wait_with_timeout(&mut child, timeout);
    let _ = fs::remove_file(&job_file);

    let status = match status {
      Ok(Some(status)) => status,
      Ok(None) => {
        let _ = child.kill();
        let _ = child.wait();
        tracing::warn!(job_id = %job.job_id, timeout_ms = timeout.as_millis() as u64, "child job timed out");
        return Ok(ValidationReport::failed(
          &job.job_id,
          &job.plugin,
          "TIMEOUT",
          format!("validation did not finish within {} ms", timeout.as_millis()),
        ));
      }
      Err(e) => {
        let _ = child.kill();
        let _ = child.wait();
        return Err(e);
      }
    };

    let stdout = reader
      .join()
      .map_err(|_| anyhow::anyhow!("child stdout reader panicked"))?;

    match child_job::decode_report(&stdout) {
      Some(report) => Ok(report),
      None => {
        tracing::warn!(job_id = %job.job_id, status = %status, "child job ended without a report");
        Ok(ValidationReport::failed(
          &job.job_id,
          &job.plugin,
          "CRASH",
          format!("child process exited ({status}) without reporting"),
        ))
      }
    }
  }
}

impl<R: JobRunner> ValidationEngine for Validator<R> {
  fn validate(&self, request: &ValidationRequest) -> ValidationReport {
    let job = JobSpec::new(&request.plugin, request.strictness_level);

    let report = if request.in_process {
      self.runner.run_job(&job)
    } else {
      let timeout = Duration::from_millis(request.timeout_ms);
      match self.validate_in_child(&job, timeout) {
        Ok(report) => report,
        Err(e) => {
          tracing::error!(error = ?e, "child job failed to run");
          ValidationReport::failed(&job.job_id, &job.plugin, "PROCESS", format!("{e:#}"))
        }
      }
    };

    tracing::info!(
      job_id = %report.job_id,
      plugin = %display_name(&report.plugin),
      passed = report.passed,
      findings = report.findings.len(),
      "validation finished"
    );
    report
  }
}

fn spawn_stdout_reader(pipe: Option<ChildStdout>) -> JoinHandle<String> {
  std::thread::spawn(move || {
    let mut raw = Vec::new();
    if let Some(mut pipe) = pipe {
      if let Err(e) = pipe.read_to_end(&mut raw) {
        tracing::debug!(error = %e, "child stdout closed early");
      }
    }
    String::from_utf8_lossy(&raw).into_owned()
  })
}

/// `Ok(None)` when the child is still running at the deadline.
pub fn wait_with_timeout(child: &mut Child, timeout: Duration) -> anyhow::Result<Option<ExitStatus>> {
  let deadline = Instant::now() + timeout;
  loop {
    if let Some(status) = child.try_wait()? {
      return Ok(Some(status));
    }
    if Instant::now() >= deadline {
      return Ok(None);
    }
    std::thread::sleep(CHILD_POLL);
  }
}
