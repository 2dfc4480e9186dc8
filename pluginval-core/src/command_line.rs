use crate::config::ValidationConfig;
use crate::engine::ValidationEngine;
use crate::preferences::{keys, PreferencesHandle};
use crate::types::{clamp_strictness, display_name, Severity, ValidationReport, ValidationRequest};
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

pub const CHILD_JOB_FLAG: &str = "--child-job";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Help,
  Version,
  Validate(ValidateArgs),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidateArgs {
  pub plugin: Option<PathBuf>,
  pub strictness_level: Option<u32>,
  pub timeout_ms: Option<u64>,
  pub in_process: bool,
  pub output_dir: Option<PathBuf>,
  // Options whose values did not parse, reported when the command runs.
  pub invalid: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
  child_job: Option<PathBuf>,
  command: Option<Command>,
}

impl CommandLine {
  pub fn parse(args: &[String]) -> Self {
    let child_job = value_after(args, CHILD_JOB_FLAG).map(PathBuf::from);

    let command = if args.iter().any(|a| a == "--help" || a == "-h") {
      Some(Command::Help)
    } else if args.iter().any(|a| a == "--version") {
      Some(Command::Version)
    } else if args.iter().any(|a| a == "--validate") {
      Some(Command::Validate(parse_validate_args(args)))
    } else {
      None
    };

    Self {
      child_job,
      command,
    }
  }

  pub fn parse_str(raw: &str) -> Self {
    Self::parse(&tokenize(raw))
  }

  pub fn child_job(&self) -> Option<&Path> {
    self.child_job.as_deref()
  }

  pub fn command(&self) -> Option<&Command> {
    self.command.as_ref()
  }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
  let i = args.iter().position(|a| a == flag)?;
  args
    .get(i + 1)
    .map(String::as_str)
    .filter(|v| !v.starts_with("--"))
}

fn parse_validate_args(args: &[String]) -> ValidateArgs {
  let mut out = ValidateArgs {
    plugin: value_after(args, "--validate").map(PathBuf::from),
    in_process: args.iter().any(|a| a == "--validate-in-process"),
    output_dir: value_after(args, "--output-dir").map(PathBuf::from),
    ..ValidateArgs::default()
  };

  if let Some(raw) = value_after(args, "--strictness-level") {
    match raw.parse::<u32>() {
      Ok(v) => out.strictness_level = Some(v),
      Err(_) => out.invalid.push(format!("--strictness-level {raw}")),
    }
  }
  if let Some(raw) = value_after(args, "--timeout-ms") {
    match raw.parse::<u64>() {
      Ok(v) if v > 0 => out.timeout_ms = Some(v),
      _ => out.invalid.push(format!("--timeout-ms {raw}")),
    }
  }

  out
}

pub fn tokenize(raw: &str) -> Vec<String> {
  let mut tokens = Vec::new();
  let mut current = String::new();
  let mut in_quotes = false;
  let mut has_token = false;

  for c in raw.chars() {
    match c {
      '"' => {
        in_quotes = !in_quotes;
        has_token = true;
      }
      c if c.is_whitespace() && !in_quotes => {
        if has_token {
          tokens.push(std::mem::take(&mut current));
          has_token = false;
        }
      }
      c => {
        current.push(c);
        has_token = true;
      }
    }
  }
  if has_token {
    tokens.push(current);
  }
  tokens
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
  NotPerformed,
  Performed { exit_code: i32 },
}

pub struct CommandContext<'a> {
  pub engine: &'a dyn ValidationEngine,
  pub preferences: &'a PreferencesHandle,
  pub defaults: &'a ValidationConfig,
}

pub fn perform(cmd: &CommandLine, ctx: &CommandContext<'_>) -> anyhow::Result<CommandOutcome> {
  let Some(command) = cmd.command() else {
    return Ok(CommandOutcome::NotPerformed);
  };

  match command {
    Command::Help => {
      print_help();
      Ok(CommandOutcome::Performed { exit_code: 0 })
    }
    Command::Version => {
      println!("pluginval {}", env!("CARGO_PKG_VERSION"));
      Ok(CommandOutcome::Performed { exit_code: 0 })
    }
    Command::Validate(args) => run_validate(args, ctx),
  }
}

fn run_validate(args: &ValidateArgs, ctx: &CommandContext<'_>) -> anyhow::Result<CommandOutcome> {
  if !args.invalid.is_empty() {
    anyhow::bail!("invalid option values: {}", args.invalid.join(", "));
  }
  let plugin = args
    .plugin
    .clone()
    .ok_or_else(|| anyhow::anyhow!("expected: --validate <plugin-path>"))?;

  let request = resolve_request(args, plugin, ctx.preferences, ctx.defaults);
  ctx
    .preferences
    .borrow_mut()
    .set(keys::LAST_PLUGIN_PATH, request.plugin.to_string_lossy());

  tracing::info!(
    plugin = %display_name(&request.plugin),
    strictness_level = request.strictness_level,
    in_process = request.in_process,
    "validating plugin"
  );
  let report = ctx.engine.validate(&request);
  print_report(&report);

  if let Some(dir) = args.output_dir.as_deref() {
    let path = write_report(dir, &report)?;
    println!("Report written to {}", path.display());
  }

  Ok(CommandOutcome::Performed {
    exit_code: if report.passed { 0 } else { 1 },
  })
}

// Command line first, then stored preferences, then config.
pub fn resolve_request(
  args: &ValidateArgs,
  plugin: PathBuf,
  preferences: &PreferencesHandle,
  defaults: &ValidationConfig,
) -> ValidationRequest {
  let prefs = preferences.borrow();
  let strictness_level = args
    .strictness_level
    .or_else(|| prefs.get_u32(keys::STRICTNESS_LEVEL))
    .unwrap_or(defaults.strictness_level);
  let in_process = args.in_process
    || prefs
      .get_bool(keys::VALIDATE_IN_PROCESS)
      .unwrap_or(defaults.in_process);

  ValidationRequest {
    plugin,
    strictness_level: clamp_strictness(strictness_level),
    timeout_ms: args.timeout_ms.unwrap_or(defaults.timeout_ms),
    in_process,
  }
}

pub fn print_report(report: &ValidationReport) {
  println!(
    "{} {} ({} findings)",
    if report.passed { "PASSED" } else { "FAILED" },
    report.plugin.display(),
    report.findings.len()
  );
  for f in &report.findings {
    let tag = match f.severity {
      Severity::Info => "info",
      Severity::Warning => "warning",
      Severity::Error => "error",
    };
    println!("  [{tag}] {} {}", f.check_id, f.description);
  }
}

fn write_report(dir: &Path, report: &ValidationReport) -> anyhow::Result<PathBuf> {
  fs::create_dir_all(dir).with_context(|| format!("create output dir {}", dir.display()))?;
  let path = dir.join(format!("{}.json", display_name(&report.plugin)));
  fs::write(&path, serde_json::to_string_pretty(report)?)?;
  Ok(path)
}

pub fn print_help() {
  println!("pluginval {}", env!("CARGO_PKG_VERSION"));
  println!();
  println!("Usage:");
  println!("  pluginval                          Open the interactive validator");
  println!("  pluginval --validate <plugin>      Validate one plugin and exit");
  println!("  pluginval --help | --version");
  println!();
  println!("Options for --validate:");
  println!("  --strictness-level <1-10>  Depth of checks (default: preferences, then config)");
  println!("  --timeout-ms <ms>          Child process timeout");
  println!("  --validate-in-process      Run checks in this process instead of a child");
  println!("  --output-dir <dir>         Also write a JSON report into <dir>");
  println!();
  println!("Exit code: 0 when the plugin passed, 1 otherwise.");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::preferences::Preferences;
  use std::cell::RefCell;
  use std::time::Duration;

  fn args(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
  }

  struct FixedEngine {
    passed: bool,
    seen: RefCell<Vec<ValidationRequest>>,
  }

  impl ValidationEngine for FixedEngine {
    fn validate(&self, request: &ValidationRequest) -> ValidationReport {
      self.seen.borrow_mut().push(request.clone());
      if self.passed {
        ValidationReport::from_findings("job", &request.plugin, Vec::new(), 0)
      } else {
        ValidationReport::failed("job", &request.plugin, "C001", "broken")
      }
    }
  }

  #[test]
  fn tokenizer_honours_quotes() {
    assert_eq!(
      tokenize(r#"--validate "/Library/Audio/My Plugin.vst3"  --strictness-level 7"#),
      args(&["--validate", "/Library/Audio/My Plugin.vst3", "--strictness-level", "7"])
    );
    assert!(tokenize("   ").is_empty());
    assert_eq!(tokenize(r#"--output-dir """#), args(&["--output-dir", ""]));
  }

  #[test]
  fn parses_validate_options() {
    let cmd = CommandLine::parse_str(
      "--validate /p/Gain.vst3 --strictness-level 8 --timeout-ms 500 --validate-in-process",
    );
    let Some(Command::Validate(v)) = cmd.command() else {
      panic!("expected validate command");
    };
    assert_eq!(v.plugin.as_deref(), Some(Path::new("/p/Gain.vst3")));
    assert_eq!(v.strictness_level, Some(8));
    assert_eq!(v.timeout_ms, Some(500));
    assert!(v.in_process);
    assert!(cmd.child_job().is_none());
  }

  #[test]
  fn child_marker_needs_a_jobspec() {
    let cmd = CommandLine::parse_str("--child-job /tmp/job.toml");
    assert_eq!(cmd.child_job(), Some(Path::new("/tmp/job.toml")));

    assert!(CommandLine::parse_str("--child-job").child_job().is_none());
    assert!(CommandLine::parse_str("--child-job --version").child_job().is_none());
  }

  #[test]
  fn unrecognized_arguments_are_not_a_command() {
    assert!(CommandLine::parse_str("").command().is_none());
    assert!(CommandLine::parse_str("--strictness-level 3 foo").command().is_none());
  }

  #[test]
  fn options_resolve_from_args_then_preferences_then_config() {
    let _serial = crate::preferences::serial();
    let dir = tempfile::tempdir().unwrap();
    let prefs = Preferences::open(&dir.path().join("p.xml"), Duration::from_secs(2)).unwrap();
    let handle = prefs.handle();
    let defaults = ValidationConfig::default();

    let bare = ValidateArgs::default();
    let req = resolve_request(&bare, PathBuf::from("/p"), &handle, &defaults);
    assert_eq!(req.strictness_level, defaults.strictness_level);
    assert!(!req.in_process);

    handle.borrow_mut().set(keys::STRICTNESS_LEVEL, "9");
    let req = resolve_request(&bare, PathBuf::from("/p"), &handle, &defaults);
    assert_eq!(req.strictness_level, 9);

    let explicit = ValidateArgs {
      strictness_level: Some(40),
      timeout_ms: Some(10),
      ..ValidateArgs::default()
    };
    let req = resolve_request(&explicit, PathBuf::from("/p"), &handle, &defaults);
    assert_eq!(req.strictness_level, 10);
    assert_eq!(req.timeout_ms, 10);
  }

  #[test]
  fn validate_exit_code_follows_the_report() {
    let _serial = crate::preferences::serial();
    let dir = tempfile::tempdir().unwrap();
    let prefs = Preferences::open(&dir.path().join("p.xml"), Duration::from_secs(2)).unwrap();
    let handle = prefs.handle();
    let defaults = ValidationConfig::default();
    let engine = FixedEngine {
      passed: false,
      seen: RefCell::new(Vec::new()),
    };
    let ctx = CommandContext {
      engine: &engine,
      preferences: &handle,
      defaults: &defaults,
    };

    let out_dir = dir.path().join("reports");
    let cmd = CommandLine::parse(&args(&[
      "--validate",
      "/p/Gain.vst3",
      "--output-dir",
      out_dir.to_str().unwrap(),
    ]));
    let outcome = perform(&cmd, &ctx).unwrap();
    assert_eq!(outcome, CommandOutcome::Performed { exit_code: 1 });
    assert!(out_dir.join("Gain.vst3.json").exists());
    assert_eq!(
      handle.borrow().get(keys::LAST_PLUGIN_PATH),
      Some("/p/Gain.vst3")
    );

    let none = perform(&CommandLine::parse(&[]), &ctx).unwrap();
    assert_eq!(none, CommandOutcome::NotPerformed);
    assert_eq!(engine.seen.borrow().len(), 1);
  }

  #[test]
  fn validate_without_a_path_is_an_error() {
    let _serial = crate::preferences::serial();
    let dir = tempfile::tempdir().unwrap();
    let prefs = Preferences::open(&dir.path().join("p.xml"), Duration::from_secs(2)).unwrap();
    let handle = prefs.handle();
    let defaults = ValidationConfig::default();
    let engine = FixedEngine {
      passed: true,
      seen: RefCell::new(Vec::new()),
    };
    let ctx = CommandContext {
      engine: &engine,
      preferences: &handle,
      defaults: &defaults,
    };

    assert!(perform(&CommandLine::parse_str("--validate"), &ctx).is_err());
    assert!(perform(&CommandLine::parse_str("--validate /p --timeout-ms 0"), &ctx).is_err());
    assert!(engine.seen.borrow().is_empty());
  }
}
