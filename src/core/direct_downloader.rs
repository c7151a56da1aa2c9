use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

const CHUNK_TIMEOUT: Duration = Duration::from_secs(45);
const MAX_RETRIES: u32 = 3;

/// Streams `url` into `output` through a `.part` file, retrying transient failures.
/// Returns the final size in bytes.
pub async fn download_direct(
    client: &reqwest::Client,
    url: &str,
    output: &Path,
    headers: Option<reqwest::header::HeaderMap>,
) -> anyhow::Result<u64> {
    let mut last_err = None;

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            let base = 1000 * (attempt as u64);
            let jitter = rand::random::<u64>() % (base / 2 + 1);
            tokio::time::sleep(Duration::from_millis(base + jitter)).await;
        }

        match download_attempt(client, url, output, headers.clone()).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                if is_fatal_error(&e) {
                    let _ = tokio::fs::remove_file(&part_path_for(output)).await;
                    return Err(e);
                }
                tracing::warn!(
                    "[direct] attempt {}/{} failed: {}",
                    attempt + 1,
                    MAX_RETRIES,
                    e
                );
                last_err = Some(e);
            }
        }
    }

    let _ = tokio::fs::remove_file(&part_path_for(output)).await;
    Err(last_err.unwrap_or_else(|| anyhow!("download failed after {} attempts", MAX_RETRIES)))
}

pub fn part_path_for(output: &Path) -> PathBuf {
    let mut part = output.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

fn is_fatal_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    for code in &[
        "HTTP 400", "HTTP 401", "HTTP 403", "HTTP 404", "HTTP 405", "HTTP 410", "HTTP 451",
    ] {
        if msg.contains(code) {
            return true;
        }
    }
    msg.contains("HTML instead of media")
}

async fn download_attempt(
    client: &reqwest::Client,
    url: &str,
    output: &Path,
    headers: Option<reqwest::header::HeaderMap>,
) -> anyhow::Result<u64> {
    let part_path = part_path_for(output);
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut request = client.get(url);
    if let Some(h) = headers {
        request = request.headers(h);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("HTTP {} fetching {}", status.as_u16(), url));
    }

    if let Some(ct) = response.headers().get("content-type") {
        if let Ok(ct_str) = ct.to_str() {
            if ct_str.contains("text/html") {
                return Err(anyhow!("server returned HTML instead of media"));
            }
        }
    }
    let expected = response.content_length();

    let file = tokio::fs::File::create(&part_path).await?;
    let mut file = tokio::io::BufWriter::with_capacity(256 * 1024, file);
    let mut written = 0u64;
    let mut stream = response.bytes_stream();

    loop {
        match tokio::time::timeout(CHUNK_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(chunk))) => {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| anyhow!("write error (disk full?): {}", e))?;
                written += chunk.len() as u64;
            }
            Ok(Some(Err(e))) => {
                file.flush().await?;
                return Err(anyhow!("download stream error: {}", e));
            }
            Ok(None) => break,
            Err(_) => {
                file.flush().await?;
                return Err(anyhow!(
                    "download timed out, no data for {} seconds",
                    CHUNK_TIMEOUT.as_secs()
                ));
            }
        }
    }
    file.flush().await?;
    drop(file);

    if let Some(expected) = expected {
        if expected > 0 && written != expected {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(anyhow!(
                "size mismatch: expected {} bytes, received {}",
                expected,
                written
            ));
        }
    }

    tokio::fs::rename(&part_path, output).await?;
    Ok(written)
}
