use anyhow::Context;

fn main() -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().skip(1).collect();
  let code = pluginval::run(&args).context("start pluginval")?;
  std::process::exit(code);
}
