use std::path::Path;

use futures_util::StreamExt;
use runtime::{Phase, ProgressCallback};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::JobError;

const CHUNK: usize = 1024 * 1024;

/// Fetches `url` into `dest`, reporting `(Download, bytes, content_length)`.
///
/// `file://` URLs are copied from the local filesystem.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    progress: &mut (dyn ProgressCallback + Send),
) -> Result<u64, JobError> {
    if let Some(local) = url.strip_prefix("file://") {
        return copy_local(Path::new(local), dest, progress).await;
    }

    let resp = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| JobError::Download(e.to_string()))?;
    let total = resp.content_length();
    debug!(url, ?total, "download started");

    let mut file = tokio::fs::File::create(dest).await?;
    let mut read = 0u64;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| JobError::Download(e.to_string()))?;
        if chunk.is_empty() {
            continue;
        }
        file.write_all(&chunk).await?;
        read += chunk.len() as u64;
        progress.on_progress(Phase::Download, read, total);
    }
    file.flush().await?;

    info!(url, bytes = read, "download finished");
    Ok(read)
}

async fn copy_local(
    src: &Path,
    dest: &Path,
    progress: &mut (dyn ProgressCallback + Send),
) -> Result<u64, JobError> {
    let mut input = tokio::fs::File::open(src)
        .await
        .map_err(|e| JobError::Download(format!("{}: {e}", src.display())))?;
    let total = input.metadata().await.ok().map(|m| m.len());
    let mut output = tokio::fs::File::create(dest).await?;

    let mut buf = vec![0u8; CHUNK];
    let mut read = 0u64;
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n]).await?;
        read += n as u64;
        progress.on_progress(Phase::Download, read, total);
    }
    output.flush().await?;
    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::download;
    use runtime::Phase;

    #[tokio::test]
    async fn file_urls_copy_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, vec![7u8; 3000]).unwrap();
        let dest = dir.path().join("dest.bin");

        let mut samples = Vec::new();
        let mut record = |phase: Phase, current: u64, total: Option<u64>| {
            samples.push((phase, current, total));
        };
        let url = format!("file://{}", src.display());
        let n = download(&reqwest::Client::new(), &url, &dest, &mut record)
            .await
            .unwrap();

        assert_eq!(n, 3000);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 3000);
        assert_eq!(samples.last(), Some(&(Phase::Download, 3000, Some(3000))));
    }

    #[tokio::test]
    async fn missing_local_files_fail_as_download_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = download(
            &reqwest::Client::new(),
            "file:///definitely/not/here",
            &dir.path().join("x"),
            &mut runtime::NoProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, crate::error::JobError::Download(_)));
    }
}
