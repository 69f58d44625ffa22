use super::{CommandContext, OutputFormat, to_json};
use deckflow_cache::StageKind;
use deckflow_pipeline::{PipelineInputs, StageKeys};
use tracing::instrument;

/// Width of the stage column in text output
pub(crate) const KIND_WIDTH: usize = 16;

#[instrument(skip(ctx))]
pub fn execute(
    ctx: &CommandContext,
    inputs: &PipelineInputs,
    format: OutputFormat,
) -> miette::Result<String> {
    let keys = StageKeys::derive(inputs, &ctx.config)?;
    tracing::debug!(generation = %keys.generation, "Derived stage keys");
    match format {
        OutputFormat::Json => to_json(&keys),
        OutputFormat::Text => Ok(render(&keys)),
    }
}

fn render(keys: &StageKeys) -> String {
    StageKind::ALL
        .iter()
        .map(|kind| format!("{:<KIND_WIDTH$}{}", kind.dir_name(), keys.get(*kind)))
        .collect::<Vec<_>>()
        .join("\n")
}
