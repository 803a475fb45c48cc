//! `lightbox fetch`: search other users' shared images and download a
//! selection as a zip archive.

use std::path::Path;

use anyhow::Result;
use share_registry::ShareError;

use super::client::ShareClient;

pub async fn fetch_command(
    server: &str,
    name: &str,
    query: &str,
    keys: Vec<String>,
    out: &Path,
) -> Result<()> {
    let mut client = ShareClient::connect(server, name).await?;
    eprintln!("Connected as {}", client.display_name());

    let keys = if keys.is_empty() {
        let hits = client.search(query).await?;
        if hits.is_empty() {
            eprintln!("No matches for {query:?}.");
            client.close().await;
            return Ok(());
        }
        eprintln!("{} match(es):", hits.len());
        for key in &hits {
            eprintln!("  {key}");
        }
        hits
    } else {
        keys
    };

    let archive = client.download_images(&keys).await?;
    std::fs::write(out, &archive).map_err(|e| ShareError::WriteFailed {
        reason: format!("{}: {e}", out.display()),
    })?;
    eprintln!("Wrote {} image(s) to {}", keys.len(), out.display());

    client.close().await;
    Ok(())
}
