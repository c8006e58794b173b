//! Artifact downloads for installer steps.

use crate::errors::{FlexnodeError, FlexnodeResult};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Download a URL to a local file, streaming to disk.
///
/// The destination is truncated if it already exists. Partial files from a
/// failed transfer are removed so completion checks never see them.
pub async fn download_file(url: &str, destination: &Path) -> FlexnodeResult<()> {
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(FlexnodeError::Download(format!(
            "GET {} returned {}",
            url,
            response.status()
        )));
    }

    let mut file = tokio::fs::File::create(destination).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(destination).await;
                return Err(FlexnodeError::Download(format!(
                    "transfer from {} failed after {} bytes: {}",
                    url, written, e
                )));
            }
        };
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if written == 0 {
        let _ = tokio::fs::remove_file(destination).await;
        return Err(FlexnodeError::Download(format!(
            "GET {} returned an empty body",
            url
        )));
    }

    tracing::debug!(url, bytes = written, dest = %destination.display(), "download complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn download_rejects_unreachable_url() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact");
        let err = download_file("http://127.0.0.1:1/nothing", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, FlexnodeError::Download(_)));
        assert!(!dest.exists());
    }
}
