use super::keys::KIND_WIDTH;
use super::{CommandContext, OutputFormat, to_json};
use deckflow_cache::{CacheKey, EntryStatus, StageKind};
use deckflow_pipeline::{PipelineInputs, StageKeys};
use serde::Serialize;
use tracing::instrument;

/// Cache state of one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub kind: StageKind,
    pub key: CacheKey,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

#[instrument(skip(ctx))]
pub fn execute(
    ctx: &CommandContext,
    inputs: &PipelineInputs,
    deep: bool,
    format: OutputFormat,
) -> miette::Result<String> {
    let keys = StageKeys::derive(inputs, &ctx.config)?;
    let store = ctx.store()?;

    let statuses: Vec<StageStatus> = StageKind::ALL
        .into_iter()
        .map(|kind| {
            let key = keys.get(kind).clone();
            let status = if deep {
                store.verify(kind, &key)
            } else {
                store.status(kind, &key)
            };
            let (state, problems) = match status {
                EntryStatus::Complete => ("hit", Vec::new()),
                EntryStatus::Missing => ("miss", Vec::new()),
                EntryStatus::Corrupt(problems) => ("corrupt", problems),
            };
            StageStatus {
                kind,
                key,
                state,
                problems,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => to_json(&statuses),
        OutputFormat::Text => Ok(render(&statuses)),
    }
}

fn render(statuses: &[StageStatus]) -> String {
    let mut lines = Vec::new();
    for status in statuses {
        lines.push(format!(
            "{:<KIND_WIDTH$}{:<9}{}",
            status.kind.dir_name(),
            status.state,
            status.key
        ));
        for problem in &status.problems {
            lines.push(format!("{:KIND_WIDTH$}  - {problem}", ""));
        }
    }
    lines.join("\n")
}
