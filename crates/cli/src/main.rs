//! `deckflow` command line entry point

mod cli;
mod commands;
mod tracing;

use crate::cli::parse;
use crate::commands::{Command, CommandContext};
use crate::tracing::TracingConfig;
use ::tracing::instrument;
use std::io::Write;

#[expect(clippy::print_stderr, reason = "Final error report")]
fn main() {
    if let Err(error) = run_main() {
        eprintln!("{error:?}");
        std::process::exit(1);
    }
}

fn run_main() -> miette::Result<()> {
    let cli = parse();

    crate::tracing::init_tracing(TracingConfig {
        format: cli.tracing_format(),
        level: cli.level.into(),
        ..TracingConfig::default()
    })
    .map_err(|e| miette::miette!("Failed to initialize tracing: {e}"))?;

    let ctx = CommandContext::load(cli.config.as_deref(), cli.cache_dir)?;
    let command: Command = cli.command.into();
    let output = execute_command(command, &ctx)?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{output}").map_err(|e| miette::miette!("Failed to write output: {e}"))?;
    Ok(())
}

#[instrument(skip_all)]
fn execute_command(command: Command, ctx: &CommandContext) -> miette::Result<String> {
    let span = command_span!(command.name());
    let _guard = span.enter();
    let started = std::time::Instant::now();

    let result = commands::execute(command, ctx);

    ::tracing::debug!(
        duration_ms = started.elapsed().as_millis(),
        success = result.is_ok(),
        "Command finished"
    );
    result
}
