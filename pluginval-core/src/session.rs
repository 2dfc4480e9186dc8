use crate::child_job::{self, EXIT_BAD_JOB};
use crate::command_line::{self, CommandContext, CommandLine, CommandOutcome};
use crate::config::{self, Config};
use crate::deferred::{CommandHost, DeferredCommand};
use crate::engine::ValidationEngine;
use crate::event_loop::{EventLoop, LoopClient, LoopHandle, Signal, DEFAULT_TICK};
use crate::mode::ExecutionMode;
use crate::paths;
use crate::platform::Platform;
use crate::preferences::Preferences;
use crate::window::{Window, WindowContext};
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

pub const APP_NAME: &str = "PluginValidator";

pub enum Startup {
  ChildJobFinished(i32),
  Running(Session, EventLoop<Session>),
}

impl Startup {
  pub fn run_to_exit(self) -> i32 {
    match self {
      Startup::ChildJobFinished(code) => code,
      Startup::Running(mut session, mut event_loop) => {
        let code = event_loop.run(&mut session);
        drop(session);
        code
      }
    }
  }
}

pub fn startup(args: &[String], platform: Box<dyn Platform>) -> anyhow::Result<Startup> {
  let command_line = CommandLine::parse(args);
  let mode = ExecutionMode::classify(&command_line);

  if mode == ExecutionMode::IsolatedChildJob {
    platform.init_child_logging();
    let mut stdout = std::io::stdout().lock();
    let code = child_job::invoke_if_requested(&command_line, platform.job_runner(), &mut stdout)
      .unwrap_or(EXIT_BAD_JOB);
    return Ok(Startup::ChildJobFinished(code));
  }

  let base = platform.base_dir()?;
  let cfg = config::load_or_create_default(&paths::config_path(&base))?;
  platform.init_logging(&base, &cfg.logging)?;
  tracing::info!(?mode, version = env!("CARGO_PKG_VERSION"), "starting {APP_NAME}");

  let mut event_loop = EventLoop::new(DEFAULT_TICK);
  let session = Session::start(mode, command_line, cfg, &base, platform, &mut event_loop)?;
  tracing::info!(
    mode = ?session.mode(),
    window = session.window_title().unwrap_or("none"),
    "session started"
  );
  Ok(Startup::Running(session, event_loop))
}

enum Shape {
  Interactive(InteractiveHost),
  Headless(HeadlessHost),
}

pub struct Session {
  mode: ExecutionMode,
  config: Config,
  shape: Shape,
  // Dropped after the shape: fakes and real platforms may own state the
  // window or engine still refer to.
  _platform: Box<dyn Platform>,
}

impl Session {
  pub fn start(
    mode: ExecutionMode,
    command_line: CommandLine,
    config: Config,
    base: &Path,
    platform: Box<dyn Platform>,
    event_loop: &mut EventLoop<Session>,
  ) -> anyhow::Result<Self> {
    let shape = match mode {
      ExecutionMode::IsolatedChildJob => {
        anyhow::bail!("child jobs run before a session exists")
      }
      ExecutionMode::HeadlessCommand => {
        let host = HeadlessHost::open(&config, base, platform.as_ref())?;
        DeferredCommand::new(command_line).schedule(event_loop);
        Shape::Headless(host)
      }
      ExecutionMode::Interactive => Shape::Interactive(InteractiveHost::open(
        &config,
        base,
        platform.as_ref(),
        event_loop.handle(),
      )?),
    };

    Ok(Self {
      mode,
      config,
      shape,
      _platform: platform,
    })
  }

  pub fn mode(&self) -> ExecutionMode {
    self.mode
  }

  pub fn window_title(&self) -> Option<&str> {
    match &self.shape {
      Shape::Interactive(host) => host.window.as_ref().map(|w| w.title()),
      Shape::Headless(_) => None,
    }
  }

  fn preferences(&self) -> &Preferences {
    match &self.shape {
      Shape::Interactive(host) => host.preferences(),
      Shape::Headless(host) => &host.preferences,
    }
  }

  fn system_requested_quit(&self, handle: &LoopHandle) {
    tracing::info!("quit requested");
    handle.quit(0);
  }
}

impl CommandHost for Session {
  fn perform_command(&mut self, cmd: &CommandLine) -> anyhow::Result<CommandOutcome> {
    let (engine, preferences) = match &self.shape {
      Shape::Headless(host) => (&*host.engine, host.preferences.handle()),
      Shape::Interactive(host) => (host.engine(), host.preferences().handle()),
    };
    let ctx = CommandContext {
      engine,
      preferences: &preferences,
      defaults: &self.config.validation,
    };
    command_line::perform(cmd, &ctx)
  }
}

impl LoopClient for Session {
  fn handle_signal(&mut self, signal: Signal, handle: &LoopHandle) {
    match signal {
      Signal::CloseRequested => self.system_requested_quit(handle),
      Signal::Input(line) => match &mut self.shape {
        Shape::Interactive(host) => {
          if let Some(window) = host.window.as_mut() {
            window.handle_input(&line);
          }
        }
        Shape::Headless(_) => tracing::debug!("input ignored in headless mode"),
      },
      Signal::Quit(_) => {}
    }
  }

  fn tick(&mut self, now: Instant) {
    self.preferences().poll(now);
  }
}

// Engine, preferences and window for an interactive session. Built in that
// order and torn down in reverse.
struct InteractiveHost {
  window: Option<Box<dyn Window>>,
  preferences: Option<Preferences>,
  engine: Option<Rc<dyn ValidationEngine>>,
}

impl InteractiveHost {
  fn open(
    config: &Config,
    base: &Path,
    platform: &dyn Platform,
    loop_handle: LoopHandle,
  ) -> anyhow::Result<Self> {
    let engine = platform.create_engine(base);
    let preferences = Preferences::open(
      &paths::preferences_path(base),
      config.preferences.save_delay(),
    )?;

    let close_handle = loop_handle.clone();
    let window = platform.create_window(WindowContext {
      title: APP_NAME.to_string(),
      engine: Rc::downgrade(&engine),
      on_close: Box::new(move || close_handle.request_close()),
      loop_handle,
      defaults: config.validation.clone(),
    })?;
    tracing::info!(title = window.title(), "main window opened");

    Ok(Self {
      window: Some(window),
      preferences: Some(preferences),
      engine: Some(engine),
    })
  }

  fn engine(&self) -> &dyn ValidationEngine {
    match &self.engine {
      Some(engine) => engine.as_ref(),
      None => unreachable!("engine is only released on drop"),
    }
  }

  fn preferences(&self) -> &Preferences {
    match &self.preferences {
      Some(preferences) => preferences,
      None => unreachable!("preferences are only released on drop"),
    }
  }
}

impl Drop for InteractiveHost {
  fn drop(&mut self) {
    drop(self.window.take());
    drop(self.preferences.take());
    drop(self.engine.take());
    tracing::debug!("interactive session torn down");
  }
}

// Field order is drop order: preferences close before the engine goes.
struct HeadlessHost {
  preferences: Preferences,
  engine: Rc<dyn ValidationEngine>,
}

impl HeadlessHost {
  fn open(config: &Config, base: &Path, platform: &dyn Platform) -> anyhow::Result<Self> {
    let engine = platform.create_engine(base);
    let preferences = Preferences::open(
      &paths::preferences_path(base),
      config.preferences.save_delay(),
    )?;
    Ok(Self {
      preferences,
      engine,
    })
  }
}
