use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use mediabot_core::fs_paths::AppPaths;
use mediabot_core::models::media::{DownloadResult, LocalMediaRef, Platform};
use mediabot_core::models::settings::PipelineSettings;
use mediabot_core::{PipelineError, PipelineResult};
use serde_json::Value;

use crate::core::caption::caption_from_info;
use crate::core::extractor::{ExtractOptions, ExtractorError, FailureClass, MediaExtractor};
use crate::core::http_client::{PageRequest, WebFetcher};
use crate::core::proxy_pool::ProxyPool;
use crate::core::rotation::{rotate_proxies, ProxyOutcome};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic"];

/// Shared dependencies handed to every resolver.
#[derive(Clone)]
pub struct ResolverContext {
    pub extractor: Arc<dyn MediaExtractor>,
    pub fetcher: Arc<dyn WebFetcher>,
    pub proxies: Arc<ProxyPool>,
    pub paths: Arc<dyn AppPaths>,
    pub settings: PipelineSettings,
}

impl ResolverContext {
    pub fn base_options(&self) -> ExtractOptions {
        let mut opts = ExtractOptions::new(self.paths.downloads_dir());
        opts.socket_timeout_secs = self.settings.socket_timeout_secs;
        opts.retries = self.settings.retries;
        opts
    }

    pub fn cookies_file(&self, platform: Platform) -> Option<PathBuf> {
        self.paths.cookies_file(platform)
    }
}

/// Extract, then fall back to the post thumbnail for still images, then rotate
/// through the proxy pool when the platform pushes back.
pub struct ExtractionStrategy {
    extractor: Arc<dyn MediaExtractor>,
    fetcher: Arc<dyn WebFetcher>,
    proxies: Arc<ProxyPool>,
    base: ExtractOptions,
    cookie_file: Option<PathBuf>,
}

impl ExtractionStrategy {
    pub fn new(ctx: &ResolverContext, user_agent: &str, cookie_file: Option<PathBuf>) -> Self {
        let mut base = ctx.base_options();
        base.user_agent = Some(user_agent.to_string());
        Self {
            extractor: ctx.extractor.clone(),
            fetcher: ctx.fetcher.clone(),
            proxies: ctx.proxies.clone(),
            base,
            cookie_file,
        }
    }

    pub fn options(&self) -> ExtractOptions {
        self.base
            .clone()
            .with_cookie_file_if_present(self.cookie_file.as_deref())
    }

    pub async fn resolve(&self, url: &str) -> PipelineResult<DownloadResult> {
        let opts = self.options();

        let err = match self.attempt(url, &opts).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        match err.class() {
            FailureClass::ImageOnly => {
                tracing::debug!("no video formats for {}, trying image fallback", url);
                self.image_fallback(url, &opts)
                    .await
                    .map_err(|e| PipelineError::NoMediaFound(format!("image fallback: {:#}", e)))
            }
            FailureClass::RateLimited => {
                tracing::debug!("rate limited on {}, rotating proxies: {}", url, err);
                rotate_proxies(&self.proxies, &err.message, |proxy| {
                    let opts = opts.with_proxy(Some(proxy));
                    async move { self.attempt_through_proxy(url, &opts).await }
                })
                .await
            }
            FailureClass::Network | FailureClass::Other => Err(err.into_pipeline_error()),
        }
    }

    async fn attempt_through_proxy(
        &self,
        url: &str,
        opts: &ExtractOptions,
    ) -> ProxyOutcome<DownloadResult> {
        match self.attempt(url, opts).await {
            Ok(result) => ProxyOutcome::Success(result),
            Err(e) if e.class() == FailureClass::ImageOnly => {
                match self.image_fallback(url, opts).await {
                    Ok(result) => ProxyOutcome::Success(result),
                    Err(fallback) => ProxyOutcome::Spare(format!("image fallback: {:#}", fallback)),
                }
            }
            Err(e) => ProxyOutcome::Evict(e.message),
        }
    }

    /// One extraction turned into a result. Carousel entries the extractor only
    /// listed are fetched directly.
    pub async fn attempt(
        &self,
        url: &str,
        opts: &ExtractOptions,
    ) -> Result<DownloadResult, ExtractorError> {
        let extraction = self.extractor.extract(url, opts).await?;
        let mut items: Vec<LocalMediaRef> =
            extraction.files.into_iter().map(LocalMediaRef::new).collect();

        let listed = listed_entries(&extraction.info);
        for (index, media_url, ext) in listed {
            let path = opts
                .output_dir
                .join(format!("{}_{}.{}", uuid::Uuid::new_v4(), index, ext));
            let req = PageRequest {
                user_agent: opts.user_agent.clone(),
                referer: None,
                proxy: opts.proxy.clone(),
            };
            if let Err(e) = self.fetcher.fetch_file(&media_url, &path, &req).await {
                return Err(ExtractorError::new(format!(
                    "failed to fetch carousel entry {}: {:#}",
                    index, e
                )));
            }
            items.push(LocalMediaRef::new(path));
        }

        let caption = caption_from_info(&extraction.info).unwrap_or_default();
        let is_playlist = extraction
            .info
            .get("entries")
            .and_then(|e| e.as_array())
            .is_some_and(|e| e.len() > 1);

        match items.len() {
            0 => Err(ExtractorError::new("extraction produced no media files")),
            1 if !is_playlist => Ok(DownloadResult::single(items.remove(0), caption)),
            _ => DownloadResult::carousel(items, caption)
                .map_err(|e| ExtractorError::new(e.to_string())),
        }
    }

    pub async fn image_fallback(
        &self,
        url: &str,
        opts: &ExtractOptions,
    ) -> anyhow::Result<DownloadResult> {
        let info = self.extractor.probe(url, opts).await?;
        let thumb = best_thumbnail(&info).ok_or_else(|| anyhow!("metadata has no thumbnail"))?;

        let path = opts.output_dir.join(format!(
            "{}.{}",
            uuid::Uuid::new_v4(),
            image_extension(&thumb)
        ));
        let req = PageRequest {
            user_agent: opts.user_agent.clone(),
            referer: None,
            proxy: opts.proxy.clone(),
        };
        self.fetcher.fetch_file(&thumb, &path, &req).await?;

        tracing::info!("image fallback fetched {}", path.display());
        Ok(DownloadResult::single(
            LocalMediaRef::new(path),
            caption_from_info(&info).unwrap_or_default(),
        ))
    }
}

/// Highest resolution thumbnail URL. Ties go to the higher `preference`, then the
/// later entry. Falls back to the plain `thumbnail` field.
pub fn best_thumbnail(info: &Value) -> Option<String> {
    let from_list = info
        .get("thumbnails")
        .and_then(|t| t.as_array())
        .and_then(|thumbs| {
            thumbs
                .iter()
                .enumerate()
                .filter_map(|(i, t)| {
                    let url = t.get("url").and_then(|u| u.as_str())?;
                    let width = t.get("width").and_then(|w| w.as_u64()).unwrap_or(0);
                    let height = t.get("height").and_then(|h| h.as_u64()).unwrap_or(0);
                    let preference = t.get("preference").and_then(|p| p.as_i64()).unwrap_or(0);
                    Some(((width * height, preference, i), url))
                })
                .max_by_key(|(key, _)| *key)
                .map(|(_, url)| url.to_string())
        });

    from_list.or_else(|| {
        info.get("thumbnail")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
    })
}

pub fn image_extension(url: &str) -> &'static str {
    let ext = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
        })
        .unwrap_or_default();
    IMAGE_EXTENSIONS
        .iter()
        .find(|known| **known == ext)
        .copied()
        .unwrap_or("jpg")
}

/// Playlist entries that carry a direct media URL but no downloaded file:
/// `(index, url, ext)`.
fn listed_entries(info: &Value) -> Vec<(usize, String, String)> {
    let Some(entries) = info.get("entries").and_then(|e| e.as_array()) else {
        return Vec::new();
    };
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| {
            entry.get("requested_downloads").is_none()
                && entry.get("filepath").is_none()
                && entry.get("_filename").is_none()
        })
        .filter_map(|(i, entry)| {
            let url = entry.get("url").and_then(|u| u.as_str())?;
            if !url.starts_with("http") {
                return None;
            }
            let ext = entry
                .get("ext")
                .and_then(|e| e.as_str())
                .unwrap_or("mp4")
                .to_string();
            Some((i + 1, url.to_string(), ext))
        })
        .collect()
}
