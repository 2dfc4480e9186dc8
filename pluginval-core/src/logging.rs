use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_NAME: &str = "pluginval.log";
const SECS_PER_DAY: u64 = 24 * 60 * 60;

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn init_file_and_stderr(
  log_dir: &Path,
  level: &str,
  retention_days: u64,
) -> anyhow::Result<()> {
  fs::create_dir_all(log_dir)?;
  cleanup_old_logs(log_dir, retention_days)?;

  let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
  let _ = FILE_GUARD.set(guard);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(file_writer)
    .with_target(true);

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(std::io::stderr)
    .with_target(true);

  tracing_subscriber::registry()
    .with(env_filter(level))
    .with(file_layer)
    .with(stderr_layer)
    .init();

  Ok(())
}

// Child-job logging. Stdout carries the job report, so everything goes to
// stderr and nothing touches the log directory.
pub fn init_stderr_only(level: &str) {
  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(std::io::stderr)
    .with_target(false);

  let _ = tracing_subscriber::registry()
    .with(env_filter(level))
    .with(stderr_layer)
    .try_init();
}

fn env_filter(level: &str) -> tracing_subscriber::EnvFilter {
  tracing_subscriber::EnvFilter::try_new(level)
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> anyhow::Result<()> {
  let Some(max_age) = retention(retention_days) else {
    return Ok(());
  };
  let Ok(entries) = fs::read_dir(log_dir) else {
    return Ok(());
  };

  let now = SystemTime::now();
  let expired = entries
    .flatten()
    .filter(|e| is_session_log_file(&e.path()))
    .filter(|e| {
      e.metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .is_some_and(|age| age > max_age)
    });

  for entry in expired {
    if let Err(e) = fs::remove_file(entry.path()) {
      tracing::debug!(path = %entry.path().display(), error = %e, "could not prune log file");
    }
  }
  Ok(())
}

fn retention(days: u64) -> Option<Duration> {
  (days > 0).then(|| Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
}

fn is_session_log_file(path: &Path) -> bool {
  path
    .file_name()
    .and_then(|n| n.to_str())
    .is_some_and(|name| {
      name
        .strip_prefix(LOG_FILE_NAME)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    })
}
