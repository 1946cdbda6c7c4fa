//! Local snapshot of the paginated search results ("headers").

use std::path::Path;

use tracing::info;

use crate::entities::paginate::{PageSource, paginate};
use crate::error::HarvestError;
use crate::sources::scopus::ScopusEntry;

pub async fn load(path: &Path) -> Result<Option<Vec<ScopusEntry>>, HarvestError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    serde_json::from_slice(&bytes).map(Some).map_err(|err| {
        HarvestError::InvalidArgument(format!(
            "Headers snapshot {} is not valid JSON ({err}). Re-run with --update-headers to rebuild it.",
            path.display()
        ))
    })
}

pub async fn save(path: &Path, entries: &[ScopusEntry]) -> Result<(), HarvestError> {
    let json = crate::render::json::to_pretty(&entries)?;
    crate::utils::fs::save_atomic(path, json.as_bytes()).await
}

/// Returns the snapshot at `path`, or paginates `make_source()` and writes a new snapshot when
/// the file is missing or `refresh` is set. The source is only built when it is needed.
pub async fn load_or_fetch<S, F>(
    path: &Path,
    refresh: bool,
    page_size: usize,
    make_source: F,
) -> Result<Vec<ScopusEntry>, HarvestError>
where
    S: PageSource<Item = ScopusEntry>,
    F: FnOnce() -> Result<S, HarvestError>,
{
    if !refresh {
        if let Some(entries) = load(path).await? {
            info!(path = %path.display(), entries = entries.len(), "Reusing headers snapshot");
            return Ok(entries);
        }
    }

    info!("Fetching headers from Scopus");
    let source = make_source()?;
    let entries = paginate(&source, page_size).await?;
    save(path, &entries).await?;
    info!(path = %path.display(), entries = entries.len(), "Saved headers snapshot");
    Ok(entries)
}
