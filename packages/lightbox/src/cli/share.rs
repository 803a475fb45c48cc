//! `lightbox share`: upload images and keep them available until
//! interrupted. Shared blobs live exactly as long as this connection, so
//! the command holds the socket open after uploading.

use std::path::PathBuf;

use anyhow::{Result, bail};

use super::client::ShareClient;

pub async fn share_command(server: &str, name: &str, paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        bail!("nothing to share: pass at least one image file or folder");
    }

    let mut client = ShareClient::connect(server, name).await?;
    eprintln!("Connected as {}", client.display_name());

    let mut count = 0usize;
    for path in paths {
        if path.is_dir() {
            let uploaded = client.upload_folder(path).await?;
            eprintln!("  shared {} image(s) from {}", uploaded, path.display());
            count += uploaded;
        } else {
            let filename = client.upload_image(path).await?;
            eprintln!("  shared {filename}");
            count += 1;
        }
    }

    if count == 0 {
        bail!("no image files found in the given paths");
    }

    eprintln!("Sharing {count} image(s). Press Ctrl-C to stop; shared images vanish on exit.");
    tokio::signal::ctrl_c().await?;

    client.close().await;
    eprintln!("Stopped sharing.");
    Ok(())
}
