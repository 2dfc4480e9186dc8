use crate::command_line::CommandLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
  Interactive,
  HeadlessCommand,
  IsolatedChildJob,
}

impl ExecutionMode {
  pub fn classify(cmd: &CommandLine) -> Self {
    // A child job is spawned by a parent validation run; no user-facing
    // command or default may shadow it.
    if cmd.child_job().is_some() {
      ExecutionMode::IsolatedChildJob
    } else if cmd.command().is_some() {
      ExecutionMode::HeadlessCommand
    } else {
      ExecutionMode::Interactive
    }
  }
}
