use std::path::Path;

use anyhow::{anyhow, Context};
use mediabot_core::fs_paths::AppPaths;
use mediabot_core::models::settings::PipelineSettings;

const TOKEN_ENV: &str = "TELEGRAM_TOKEN";
const TOKEN_FILE: &str = "token.txt";
const PROXY_FILE: &str = "proxy.txt";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    pub pipeline: PipelineSettings,
    /// Lines of `secrets/proxy.txt`, imported into the proxy pool on start.
    pub proxy_candidates: Vec<String>,
}

pub fn load_config(paths: &dyn AppPaths) -> anyhow::Result<BotConfig> {
    let token = match std::env::var(TOKEN_ENV) {
        Ok(t) if !t.trim().is_empty() => t.trim().to_string(),
        _ => read_secret(&paths.secrets_dir().join(TOKEN_FILE))?.ok_or_else(|| {
            anyhow!(
                "no bot token: set {} or write it to {}",
                TOKEN_ENV,
                paths.secrets_dir().join(TOKEN_FILE).display()
            )
        })?,
    };

    Ok(BotConfig {
        token,
        pipeline: load_pipeline_settings(&paths.data_dir().join(SETTINGS_FILE))?,
        proxy_candidates: read_secret_lines(&paths.secrets_dir().join(PROXY_FILE))?,
    })
}

/// Non-empty, non-comment lines of a secrets file. A missing file has none.
pub fn read_secret_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect())
}

/// First non-empty, non-comment line of a secrets file.
pub fn read_secret(path: &Path) -> anyhow::Result<Option<String>> {
    Ok(read_secret_lines(path)?.into_iter().next())
}

pub fn load_pipeline_settings(path: &Path) -> anyhow::Result<PipelineSettings> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PipelineSettings::default()),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}
