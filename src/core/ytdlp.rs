use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::core::extractor::{ExtractOptions, Extraction, ExtractorError, MediaExtractor};
use crate::core::process;

fn bin_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

pub async fn find_ytdlp(bin_dir: &Path) -> Option<PathBuf> {
    if let Ok(status) = process::command(bin_name(), bin_dir)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        if status.success() {
            return Some(PathBuf::from(bin_name()));
        }
    }

    let managed = bin_dir.join(bin_name());
    if managed.exists() {
        return Some(managed);
    }

    None
}

pub async fn ensure_ytdlp(bin_dir: &Path) -> anyhow::Result<PathBuf> {
    if let Some(path) = find_ytdlp(bin_dir).await {
        return Ok(path);
    }

    download_ytdlp_binary(&bin_dir.join(bin_name())).await
}

async fn download_ytdlp_binary(target: &Path) -> anyhow::Result<PathBuf> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let download_url = if cfg!(target_os = "windows") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
    };

    tracing::info!("installing yt-dlp into {}", target.display());

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?;

    let response = client.get(download_url).send().await?;
    if !response.status().is_success() {
        return Err(anyhow!(
            "yt-dlp download returned HTTP {}",
            response.status()
        ));
    }

    let bytes = response.bytes().await?;
    tokio::fs::write(target, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(target, perms).await?;
    }

    Ok(target.to_path_buf())
}

/// `MediaExtractor` backed by the yt-dlp command line tool.
pub struct YtDlpExtractor {
    bin_dir: PathBuf,
    binary: OnceCell<PathBuf>,
}

impl YtDlpExtractor {
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            binary: OnceCell::new(),
        }
    }

    async fn binary(&self) -> Result<&PathBuf, ExtractorError> {
        self.binary
            .get_or_try_init(|| ensure_ytdlp(&self.bin_dir))
            .await
            .map_err(|e| ExtractorError::new(format!("yt-dlp unavailable: {}", e)))
    }

    async fn run(&self, args: &[String]) -> Result<serde_json::Value, ExtractorError> {
        let binary = self.binary().await?;

        let output = process::command(binary, &self.bin_dir)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ExtractorError::new(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            if message.is_empty() {
                return Err(ExtractorError::new(format!(
                    "yt-dlp exited with {}",
                    output.status
                )));
            }
            return Err(ExtractorError::new(message));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractorError::new(format!("yt-dlp returned invalid JSON: {}", e)))
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, url: &str, opts: &ExtractOptions) -> Result<Extraction, ExtractorError> {
        tokio::fs::create_dir_all(&opts.output_dir)
            .await
            .map_err(|e| ExtractorError::new(format!("cannot create downloads dir: {}", e)))?;

        let stem = uuid::Uuid::new_v4().to_string();
        let args = download_args(url, opts, &stem);

        let info = match self.run(&args).await {
            Ok(info) => info,
            Err(e) => {
                remove_stem_files(&opts.output_dir, &stem).await;
                return Err(e);
            }
        };

        let mut files: Vec<PathBuf> = collect_files(&info)
            .into_iter()
            .filter(|p| p.is_file())
            .collect();

        if files.is_empty() {
            files = find_stem_files(&opts.output_dir, &stem).await;
        }

        tracing::debug!("yt-dlp wrote {} file(s) for {}", files.len(), url);
        Ok(Extraction { files, info })
    }

    async fn probe(
        &self,
        url: &str,
        opts: &ExtractOptions,
    ) -> Result<serde_json::Value, ExtractorError> {
        self.run(&probe_args(url, opts)).await
    }
}

fn network_args(opts: &ExtractOptions) -> Vec<String> {
    let mut args = vec![
        "--no-warnings".to_string(),
        "--restrict-filenames".to_string(),
        "--no-check-formats".to_string(),
        "--socket-timeout".to_string(),
        opts.socket_timeout_secs.to_string(),
        "--retries".to_string(),
        opts.retries.to_string(),
    ];

    args.push(if opts.expand_playlist {
        "--yes-playlist".to_string()
    } else {
        "--no-playlist".to_string()
    });

    if let Some(ua) = &opts.user_agent {
        args.push("--user-agent".to_string());
        args.push(ua.clone());
    }
    if let Some(cookies) = &opts.cookie_file {
        args.push("--cookies".to_string());
        args.push(cookies.to_string_lossy().to_string());
    }
    if let Some(proxy) = &opts.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.to_url());
    }
    args
}

fn download_args(url: &str, opts: &ExtractOptions, stem: &str) -> Vec<String> {
    let template = opts
        .output_dir
        .join(format!("{}_%(autonumber)s.%(ext)s", stem))
        .to_string_lossy()
        .to_string();

    let mut args = vec![
        "-f".to_string(),
        opts.format.clone(),
        "--dump-single-json".to_string(),
        "--no-simulate".to_string(),
        "--no-progress".to_string(),
        "-o".to_string(),
        template,
    ];
    args.extend(network_args(opts));
    args.push(url.to_string());
    args
}

fn probe_args(url: &str, opts: &ExtractOptions) -> Vec<String> {
    let mut args = vec![
        "--dump-single-json".to_string(),
        "--skip-download".to_string(),
        "--ignore-no-formats-error".to_string(),
    ];
    args.extend(network_args(opts));
    args.push(url.to_string());
    args
}

/// File paths reported by yt-dlp, in playlist order for multi-entry results.
pub fn collect_files(info: &serde_json::Value) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let nodes: Vec<&serde_json::Value> = match info.get("entries").and_then(|e| e.as_array()) {
        Some(entries) => entries.iter().collect(),
        None => vec![info],
    };

    for node in nodes {
        let requested = node
            .get("requested_downloads")
            .and_then(|v| v.as_array())
            .map(|downloads| {
                downloads
                    .iter()
                    .filter_map(|d| d.get("filepath").or_else(|| d.get("_filename")))
                    .filter_map(|v| v.as_str())
                    .map(PathBuf::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if !requested.is_empty() {
            files.extend(requested);
            continue;
        }

        if let Some(path) = node
            .get("filepath")
            .or_else(|| node.get("_filename"))
            .or_else(|| node.get("filename"))
            .and_then(|v| v.as_str())
        {
            files.push(PathBuf::from(path));
        }
    }

    let mut seen = std::collections::HashSet::new();
    files.retain(|p| seen.insert(p.clone()));
    files
}

fn is_partial(name: &str) -> bool {
    name.ends_with(".part") || name.ends_with(".ytdl") || name.contains(".part-Frag")
}

async fn stem_entries(dir: &Path, stem: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return found,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(stem))
            .unwrap_or(false);
        if matches {
            found.push(path);
        }
    }
    found.sort();
    found
}

async fn find_stem_files(dir: &Path, stem: &str) -> Vec<PathBuf> {
    stem_entries(dir, stem)
        .await
        .into_iter()
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
            p.is_file() && !is_partial(name)
        })
        .collect()
}

/// Removes everything a failed attempt left behind, partial downloads included.
pub async fn remove_stem_files(dir: &Path, stem: &str) {
    for path in stem_entries(dir, stem).await {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("failed to remove partial file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediabot_core::models::proxy::ProxyEntry;

    #[test]
    fn download_args_carry_overrides() {
        let mut opts = ExtractOptions::new("/tmp/dl");
        opts.cookie_file = Some(PathBuf::from("/secrets/c.txt"));
        opts.proxy = Some("socks5://1.2.3.4:1080".parse::<ProxyEntry>().unwrap());

        let args = download_args("https://instagram.com/p/X/", &opts, "abc");
        let joined = args.join(" ");

        assert!(joined.contains("-f best[ext=mp4]/best"));
        assert!(joined.contains("--no-playlist"));
        assert!(joined.contains("--cookies /secrets/c.txt"));
        assert!(joined.contains("--proxy socks5://1.2.3.4:1080"));
        assert!(joined.contains("/tmp/dl/abc_%(autonumber)s.%(ext)s"));
        assert_eq!(args.last().map(String::as_str), Some("https://instagram.com/p/X/"));
    }

    #[test]
    fn probe_never_downloads() {
        let args = probe_args("https://x", &ExtractOptions::new("/tmp"));
        assert!(args.contains(&"--skip-download".to_string()));
        assert!(args.contains(&"--ignore-no-formats-error".to_string()));
        assert!(!args.contains(&"--no-simulate".to_string()));
    }

    #[test]
    fn collects_files_from_playlist_entries() {
        let info = serde_json::json!({
            "_type": "playlist",
            "entries": [
                { "requested_downloads": [{ "filepath": "/d/a_00001.jpg" }] },
                { "requested_downloads": [{ "filepath": "/d/a_00002.mp4" }] },
                { "_filename": "/d/a_00003.jpg" }
            ]
        });
        assert_eq!(
            collect_files(&info),
            vec![
                PathBuf::from("/d/a_00001.jpg"),
                PathBuf::from("/d/a_00002.mp4"),
                PathBuf::from("/d/a_00003.jpg"),
            ]
        );
    }

    #[test]
    fn collects_single_file() {
        let info = serde_json::json!({ "requested_downloads": [{ "filepath": "/d/v.mp4" }] });
        assert_eq!(collect_files(&info), vec![PathBuf::from("/d/v.mp4")]);
    }

    #[tokio::test]
    async fn stem_cleanup_removes_partials_only_for_that_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc_00001.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("abc_00001.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("other.mp4"), b"x").unwrap();

        let found = find_stem_files(dir.path(), "abc").await;
        assert_eq!(found, vec![dir.path().join("abc_00001.jpg")]);

        remove_stem_files(dir.path(), "abc").await;
        assert!(!dir.path().join("abc_00001.mp4.part").exists());
        assert!(!dir.path().join("abc_00001.jpg").exists());
        assert!(dir.path().join("other.mp4").exists());
    }
}
