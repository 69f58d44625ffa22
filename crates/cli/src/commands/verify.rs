use super::CommandContext;
use deckflow_cache::{CacheKey, EntryStatus, StageKind};
use tracing::instrument;

#[instrument(skip(ctx))]
pub fn execute(ctx: &CommandContext, kind: &str, key: &str) -> miette::Result<String> {
    let kind: StageKind = kind.parse().map_err(|e: String| miette::miette!("{e}"))?;
    let key = CacheKey::new(key)?;
    let store = ctx.store()?;

    match store.verify(kind, &key) {
        EntryStatus::Complete => {
            let entry = store.get(kind, &key)?;
            tracing::info!(kind = %kind, key = %key, "Cache entry verified");
            Ok(format!(
                "{kind}/{key}: ok ({} files, created {})",
                entry.manifest.files.len(),
                entry.manifest.created_at.to_rfc3339()
            ))
        }
        EntryStatus::Missing => Err(miette::miette!("{kind}/{key}: no such cache entry")),
        EntryStatus::Corrupt(problems) => {
            tracing::error!(kind = %kind, key = %key, ?problems, "Cache entry is corrupt");
            Err(deckflow_cache::Error::corruption(kind.dir_name(), key.as_str(), problems).into())
        }
    }
}
