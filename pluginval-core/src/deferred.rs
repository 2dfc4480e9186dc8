use crate::command_line::{CommandLine, CommandOutcome};
use crate::event_loop::{EventLoop, LoopClient, LoopHandle};
use std::panic::{self, AssertUnwindSafe};

pub trait CommandHost {
  fn perform_command(&mut self, cmd: &CommandLine) -> anyhow::Result<CommandOutcome>;
}

pub struct DeferredCommand {
  command_line: CommandLine,
}

impl DeferredCommand {
  pub fn new(command_line: CommandLine) -> Self {
    Self { command_line }
  }

  pub fn schedule<S>(self, event_loop: &mut EventLoop<S>)
  where
    S: CommandHost + LoopClient + 'static,
  {
    tracing::debug!("headless command scheduled for the first loop turn");
    event_loop.post(move |host: &mut S, handle: &LoopHandle| {
      let outcome = execute(host, &self.command_line);
      finish(outcome, handle);
    });
  }
}

pub fn execute<H: CommandHost>(host: &mut H, cmd: &CommandLine) -> CommandOutcome {
  let recognized = cmd.command().is_some();
  let result = panic::catch_unwind(AssertUnwindSafe(|| host.perform_command(cmd)));

  match result {
    Ok(Ok(outcome)) => outcome,
    Ok(Err(e)) => {
      tracing::error!(error = ?e, "command failed");
      eprintln!("pluginval: {e:#}");
      failed_outcome(recognized)
    }
    Err(_) => {
      tracing::error!("command panicked");
      failed_outcome(recognized)
    }
  }
}

fn failed_outcome(recognized: bool) -> CommandOutcome {
  if recognized {
    CommandOutcome::Performed { exit_code: 1 }
  } else {
    CommandOutcome::NotPerformed
  }
}

pub fn finish(outcome: CommandOutcome, handle: &LoopHandle) -> bool {
  match outcome {
    CommandOutcome::Performed { exit_code } => {
      tracing::info!(exit_code, "command finished; quitting");
      handle.quit(exit_code)
    }
    CommandOutcome::NotPerformed => {
      tracing::debug!("no recognized command to perform; staying up");
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event_loop::Signal;
  use std::time::Duration;

  enum Behaviour {
    Succeed(i32),
    Fail,
    Panic,
  }

  struct FakeHost {
    behaviour: Behaviour,
    calls: usize,
    startup_returned: bool,
    ran_after_startup: bool,
  }

  impl FakeHost {
    fn new(behaviour: Behaviour) -> Self {
      Self {
        behaviour,
        calls: 0,
        startup_returned: false,
        ran_after_startup: false,
      }
    }
  }

  impl CommandHost for FakeHost {
    fn perform_command(&mut self, _cmd: &CommandLine) -> anyhow::Result<CommandOutcome> {
      self.calls += 1;
      self.ran_after_startup = self.startup_returned;
      match self.behaviour {
        Behaviour::Succeed(exit_code) => Ok(CommandOutcome::Performed { exit_code }),
        Behaviour::Fail => anyhow::bail!("plugin could not be loaded"),
        Behaviour::Panic => panic!("validator blew up"),
      }
    }
  }

  impl LoopClient for FakeHost {
    fn handle_signal(&mut self, _signal: Signal, _handle: &LoopHandle) {}
  }

  fn run(behaviour: Behaviour, raw: &str) -> (FakeHost, i32) {
    let mut el: EventLoop<FakeHost> = EventLoop::new(Duration::from_millis(10));
    let mut host = FakeHost::new(behaviour);

    DeferredCommand::new(CommandLine::parse_str(raw)).schedule(&mut el);
    assert_eq!(host.calls, 0, "scheduling must not run the command");
    assert_eq!(el.pending_tasks(), 1);
    host.startup_returned = true;

    let code = el.run(&mut host);
    (host, code)
  }

  #[test]
  fn runs_once_after_startup_and_quits_with_its_code() {
    let (host, code) = run(Behaviour::Succeed(0), "--validate /p/Gain.vst3");
    assert_eq!(host.calls, 1);
    assert!(host.ran_after_startup);
    assert_eq!(code, 0);
  }

  #[test]
  fn failing_command_still_terminates() {
    let (host, code) = run(Behaviour::Fail, "--validate /p/Gain.vst3");
    assert_eq!(host.calls, 1);
    assert_eq!(code, 1);
  }

  #[test]
  fn panicking_command_still_terminates() {
    let (host, code) = run(Behaviour::Panic, "--validate /p/Gain.vst3");
    assert_eq!(host.calls, 1);
    assert_eq!(code, 1);
  }

  #[test]
  fn not_performed_requests_no_quit() {
    let el: EventLoop<FakeHost> = EventLoop::new(Duration::from_millis(10));
    let handle = el.handle();
    assert!(!finish(CommandOutcome::NotPerformed, &handle));
    assert!(!handle.quit_requested());

    assert!(finish(CommandOutcome::Performed { exit_code: 1 }, &handle));
    assert!(!finish(CommandOutcome::Performed { exit_code: 0 }, &handle));
  }

  #[test]
  fn errors_without_a_recognized_command_are_not_performed() {
    let mut host = FakeHost::new(Behaviour::Fail);
    let outcome = execute(&mut host, &CommandLine::parse_str(""));
    assert_eq!(outcome, CommandOutcome::NotPerformed);
  }
}
