mod cli;
mod config;
mod job;
mod procfs;
mod report;
mod signal;
mod supervisor;
mod usage;
mod utils;

use std::{process::exit, sync::Arc};

use anyhow::Context;
use clap::error::ErrorKind;
use log::info;

use crate::{
  cli::CliArgs,
  config::{ConfigError, LimitConfig, Settings},
  job::{limit::rlimit::CpuRLimit, Job},
  signal::Control,
  supervisor::Supervisor,
};

#[cfg(target_os = "linux")]
fn main() {
  let args = match CliArgs::parse_from_args(std::env::args_os()) {
    Ok(args) => args,
    Err(ConfigError::Usage(e))
      if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
    {
      e.exit()
    }
    Err(e) => {
      eprintln!("{e}");
      exit(1);
    }
  };
  init_logger(args.verbose);

  let code = match run(args) {
    Ok(code) => code,
    Err(e) => {
      eprintln!("Error: {e:#}");
      1
    }
  };
  exit(code)
}

fn init_logger(verbose: u8) {
  let level = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
    .target(env_logger::Target::Stderr)
    .init();
}

fn run(args: CliArgs) -> anyhow::Result<i32> {
  let settings = Settings::load(args.config.as_deref())?;
  let config = LimitConfig::resolve(&args, &settings)?;
  announce(&config);

  tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("failed to start async runtime")?
    .block_on(supervise(config, args.json))
}

fn announce(config: &LimitConfig) {
  println!(
    "Parent process: user selected program '{}'",
    config.program()
  );
  match config.limits.cpu_seconds() {
    Some(cpu) => println!("Parent process: CPU time limit set to {cpu} seconds"),
    None => println!("Next time, you can use the --cpu [value] flag to set a CPU time limit"),
  }
  match config.limits.memory() {
    Some(memory) => println!("Parent process: memory limit set to {memory}"),
    None => println!("Next time, you can use the --mem [value] flag to set a memory limit"),
  }
  if let Some(wall) = config.limits.wall_clock() {
    println!(
      "Parent process: wall clock limit set to {} seconds",
      wall.as_secs()
    );
  }
  println!();
}

async fn supervise(config: LimitConfig, json: bool) -> anyhow::Result<i32> {
  let control = Arc::new(Control::default());
  signal::install(control.clone()).context("failed to install signal handlers")?;

  let mut job = Job::new(config.command.clone());
  if let Some(cpu) = config.limits.cpu_seconds() {
    let rlimit = CpuRLimit::new(cpu, config.rlimit_grace_secs);
    info!(
      "kernel CPU quota: soft {}s, hard {}s",
      rlimit.soft(),
      rlimit.hard()
    );
    job = job.limit(rlimit);
  }
  let child = job.spawn().context("failed to launch child")?;
  println!(
    "Parent process: monitoring child with PID {}....",
    child.pid()
  );

  let report = Supervisor::new(config.limits, config.poll_interval, control)
    .run(child)
    .await?;
  report.print(json).context("failed to print summary")?;
  Ok(report.exit_code())
}

#[cfg(not(target_os = "linux"))]
compile_error!(
  "Only support Linux, as the supervisor reads /proc. To run on other platforms, please port the program."
);
