use pluginval_core::command_line::{self, ValidateArgs};
use pluginval_core::config::ValidationConfig;
use pluginval_core::engine::ValidationEngine;
use pluginval_core::event_loop::LoopHandle;
use pluginval_core::preferences::{app_preferences, keys};
use pluginval_core::types::{clamp_strictness, MAX_STRICTNESS, MIN_STRICTNESS};
use pluginval_core::window::{CloseRequest, Window, WindowContext};
use std::io::BufRead;
use std::path::PathBuf;
use std::rc::Weak;

pub struct ConsoleWindow {
  title: String,
  engine: Weak<dyn ValidationEngine>,
  on_close: CloseRequest,
  defaults: ValidationConfig,
}

impl ConsoleWindow {
  pub fn new(ctx: WindowContext) -> Self {
    Self {
      title: ctx.title,
      engine: ctx.engine,
      on_close: ctx.on_close,
      defaults: ctx.defaults,
    }
  }

  pub fn open(ctx: WindowContext) -> anyhow::Result<Self> {
    let handle = ctx.loop_handle.clone();
    spawn_stdin_reader(handle.clone())?;
    ctrlc::set_handler(move || handle.request_close())?;

    let window = Self::new(ctx);
    window.print_banner();
    Ok(window)
  }

  fn print_banner(&self) {
    println!("{} {}", self.title, env!("CARGO_PKG_VERSION"));
    println!("Type `help` for commands.");
  }

  fn print_status(&self) {
    let prefs = app_preferences();
    let prefs = prefs.borrow();
    println!(
      "Strictness level: {}",
      prefs
        .get_u32(keys::STRICTNESS_LEVEL)
        .unwrap_or(self.defaults.strictness_level)
    );
    println!(
      "Validate in process: {}",
      prefs
        .get_bool(keys::VALIDATE_IN_PROCESS)
        .unwrap_or(self.defaults.in_process)
    );
    match prefs.get(keys::LAST_PLUGIN_PATH) {
      Some(p) => println!("Last plugin: {p}"),
      None => println!("Last plugin: none"),
    }
    println!("Preferences file: {}", prefs.path().display());
  }

  fn set_level(&self, raw: Option<&str>) {
    let Some(level) = raw.and_then(|r| r.parse::<u32>().ok()) else {
      eprintln!("expected: level <{MIN_STRICTNESS}-{MAX_STRICTNESS}>");
      return;
    };
    let level = clamp_strictness(level);
    app_preferences()
      .borrow_mut()
      .set(keys::STRICTNESS_LEVEL, level.to_string());
    println!("Strictness level set to {level}.");
  }

  fn set_in_process(&self, raw: Option<&str>) {
    let enabled = match raw {
      Some("on") => true,
      Some("off") => false,
      _ => {
        eprintln!("expected: in-process on|off");
        return;
      }
    };
    app_preferences()
      .borrow_mut()
      .set(keys::VALIDATE_IN_PROCESS, enabled.to_string());
    println!("Validate in process: {enabled}");
  }

  fn validate(&self, raw: &str) {
    let prefs = app_preferences();
    let plugin = if raw.is_empty() {
      match prefs.borrow().get(keys::LAST_PLUGIN_PATH) {
        Some(p) => PathBuf::from(p),
        None => {
          eprintln!("expected: validate <plugin-path>");
          return;
        }
      }
    } else {
      PathBuf::from(raw.trim_matches('"'))
    };

    let Some(engine) = self.engine.upgrade() else {
      tracing::error!("validation engine no longer available");
      eprintln!("Validation engine is not available.");
      return;
    };

    let request =
      command_line::resolve_request(&ValidateArgs::default(), plugin, &prefs, &self.defaults);
    prefs
      .borrow_mut()
      .set(keys::LAST_PLUGIN_PATH, request.plugin.to_string_lossy());

    println!("Validating {} ...", request.plugin.display());
    let report = engine.validate(&request);
    command_line::print_report(&report);
  }
}

impl Window for ConsoleWindow {
  fn title(&self) -> &str {
    &self.title
  }

  fn handle_input(&mut self, line: &str) {
    let line = line.trim();
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
      Some((cmd, rest)) => (cmd, rest.trim()),
      None => (line, ""),
    };

    match cmd {
      "" => {}
      "help" => print_help(),
      "quit" | "exit" => (self.on_close)(),
      "status" => self.print_status(),
      "level" => self.set_level(rest.split_whitespace().next()),
      "in-process" => self.set_in_process(rest.split_whitespace().next()),
      "validate" => self.validate(rest),
      other => eprintln!("Unknown command `{other}`. Type `help`."),
    }
  }
}

fn spawn_stdin_reader(handle: LoopHandle) -> anyhow::Result<()> {
  std::thread::Builder::new()
    .name("stdin-reader".to_string())
    .spawn(move || {
      let stdin = std::io::stdin();
      for line in stdin.lock().lines() {
        match line {
          Ok(l) => handle.post_input(l),
          Err(_) => break,
        }
      }
      // End of input closes the window like the user would.
      handle.request_close();
    })?;
  Ok(())
}

fn print_help() {
  println!("Commands:");
  println!("  validate [path]        Validate a plugin (default: last plugin)");
  println!("  level <{MIN_STRICTNESS}-{MAX_STRICTNESS}>          Set the strictness level");
  println!("  in-process on|off      Run checks in this process instead of a child");
  println!("  status                 Show current settings");
  println!("  quit                   Close the window");
}

#[cfg(test)]
mod tests {
  use super::*;
  use pluginval_core::event_loop::EventLoop;
  use pluginval_core::preferences::Preferences;
  use pluginval_core::types::{ValidationReport, ValidationRequest};
  use pluginval_core::Session;
  use std::cell::{Cell, RefCell};
  use std::rc::Rc;
  use std::sync::{Mutex, MutexGuard};
  use std::time::Duration;

  // The preferences store is process-wide; tests that open it take turns.
  fn serial() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  struct RecordingEngine {
    requests: RefCell<Vec<ValidationRequest>>,
  }

  impl ValidationEngine for RecordingEngine {
    fn validate(&self, request: &ValidationRequest) -> ValidationReport {
      self.requests.borrow_mut().push(request.clone());
      ValidationReport::from_findings("job", &request.plugin, Vec::new(), 0)
    }
  }

  fn window(engine: &Rc<RecordingEngine>, closed: &Rc<Cell<bool>>) -> ConsoleWindow {
    let closed = closed.clone();
    let engine: Rc<dyn ValidationEngine> = engine.clone();
    ConsoleWindow::new(WindowContext {
      title: "PluginValidator".to_string(),
      engine: Rc::downgrade(&engine),
      on_close: Box::new(move || closed.set(true)),
      loop_handle: EventLoop::<Session>::new(Duration::from_millis(10)).handle(),
      defaults: ValidationConfig::default(),
    })
  }

  #[test]
  fn quit_raises_the_close_request() {
    let _serial = serial();
    let dir = tempfile::tempdir().unwrap();
    let _prefs = Preferences::open(&dir.path().join("p.xml"), Duration::from_secs(2)).unwrap();
    let engine = Rc::new(RecordingEngine {
      requests: RefCell::new(Vec::new()),
    });
    let closed = Rc::new(Cell::new(false));
    let mut w = window(&engine, &closed);

    w.handle_input("status");
    assert!(!closed.get());
    w.handle_input("  quit ");
    assert!(closed.get());
  }

  #[test]
  fn level_is_stored_and_used_for_validation() {
    let _serial = serial();
    let dir = tempfile::tempdir().unwrap();
    let _prefs = Preferences::open(&dir.path().join("p.xml"), Duration::from_secs(2)).unwrap();
    let engine = Rc::new(RecordingEngine {
      requests: RefCell::new(Vec::new()),
    });
    let closed = Rc::new(Cell::new(false));
    let mut w = window(&engine, &closed);

    w.handle_input("level abc");
    assert_eq!(app_preferences().borrow().get(keys::STRICTNESS_LEVEL), None);

    w.handle_input("level 7");
    w.handle_input("validate \"/plugins/My Synth.vst3\"");
    w.handle_input("validate");

    let requests = engine.requests.borrow();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].strictness_level, 7);
    assert_eq!(requests[0].plugin, PathBuf::from("/plugins/My Synth.vst3"));
    assert_eq!(requests[1].plugin, requests[0].plugin);
  }

  #[test]
  fn validate_without_history_or_engine_is_harmless() {
    let _serial = serial();
    let dir = tempfile::tempdir().unwrap();
    let _prefs = Preferences::open(&dir.path().join("p.xml"), Duration::from_secs(2)).unwrap();
    let engine = Rc::new(RecordingEngine {
      requests: RefCell::new(Vec::new()),
    });
    let closed = Rc::new(Cell::new(false));
    let mut w = window(&engine, &closed);

    w.handle_input("validate");
    assert!(engine.requests.borrow().is_empty());

    drop(engine);
    w.handle_input("validate /plugins/Gain.clap");
    assert!(!closed.get());
  }
}
