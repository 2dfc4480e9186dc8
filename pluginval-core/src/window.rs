use crate::config::ValidationConfig;
use crate::engine::ValidationEngine;
use crate::event_loop::LoopHandle;
use std::rc::Weak;

pub type CloseRequest = Box<dyn Fn()>;

pub trait Window {
  fn title(&self) -> &str;

  fn handle_input(&mut self, line: &str);
}

pub struct WindowContext {
  pub title: String,
  // Non-owning; the session keeps the engine alive for longer than the window.
  pub engine: Weak<dyn ValidationEngine>,
  pub on_close: CloseRequest,
  pub loop_handle: LoopHandle,
  pub defaults: ValidationConfig,
}
