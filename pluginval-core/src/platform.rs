use crate::child_job::JobRunner;
use crate::config::LoggingConfig;
use crate::engine::ValidationEngine;
use crate::window::{Window, WindowContext};
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub trait Platform {
  fn base_dir(&self) -> anyhow::Result<PathBuf>;

  fn init_logging(&self, base: &Path, cfg: &LoggingConfig) -> anyhow::Result<()>;

  fn init_child_logging(&self);

  fn job_runner(&self) -> &dyn JobRunner;

  fn create_engine(&self, base: &Path) -> Rc<dyn ValidationEngine>;

  fn create_window(&self, ctx: WindowContext) -> anyhow::Result<Box<dyn Window>>;
}
