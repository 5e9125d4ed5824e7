use anyhow::{Error, bail};
use reqwest::get;

use crate::Snapshot;

/// Fetches a published snapshot, for deployments without a local catalog file.
pub async fn fetch_remote_snapshot(url: &str) -> Result<Snapshot, Error> {
    let response = get(url).await?;

    if !response.status().is_success() {
        bail!("catalog fetch from {url} failed with {}", response.status());
    }

    let snapshot: Snapshot = response.json().await?;
    snapshot.validate()?;

    Ok(snapshot)
}
