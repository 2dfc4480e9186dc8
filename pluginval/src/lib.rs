pub mod checks;
pub mod console;

use checks::PluginChecks;
use console::ConsoleWindow;
use pluginval_core::child_job::JobRunner;
use pluginval_core::config::LoggingConfig;
use pluginval_core::engine::{ValidationEngine, Validator};
use pluginval_core::platform::Platform;
use pluginval_core::window::{Window, WindowContext};
use pluginval_core::{logging, paths};
use std::path::{Path, PathBuf};
use std::rc::Rc;

const CHILD_LOG_LEVEL: &str = "warn";

#[derive(Debug, Default)]
pub struct ConsolePlatform {
  checks: PluginChecks,
}

impl Platform for ConsolePlatform {
  fn base_dir(&self) -> anyhow::Result<PathBuf> {
    paths::base_dir()
  }

  fn init_logging(&self, base: &Path, cfg: &LoggingConfig) -> anyhow::Result<()> {
    logging::init_file_and_stderr(&paths::logs_dir(base), &cfg.level, cfg.retention_days)
  }

  fn init_child_logging(&self) {
    logging::init_stderr_only(CHILD_LOG_LEVEL);
  }

  fn job_runner(&self) -> &dyn JobRunner {
    &self.checks
  }

  fn create_engine(&self, base: &Path) -> Rc<dyn ValidationEngine> {
    Rc::new(Validator::new(self.checks, paths::jobs_dir(base)))
  }

  fn create_window(&self, ctx: WindowContext) -> anyhow::Result<Box<dyn Window>> {
    Ok(Box::new(ConsoleWindow::open(ctx)?))
  }
}

pub fn run(args: &[String]) -> anyhow::Result<i32> {
  let started = pluginval_core::startup(args, Box::new(ConsolePlatform::default()))?;
  Ok(started.run_to_exit())
}
