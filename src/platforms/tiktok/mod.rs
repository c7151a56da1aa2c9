use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use mediabot_core::models::media::{DownloadRequest, DownloadResult, LocalMediaRef, Platform};
use mediabot_core::{PipelineError, PipelineResult};
use scraper::{Html, Selector};

use crate::core::extractor::MOBILE_USER_AGENT;
use crate::core::http_client::{PageRequest, WebFetcher};
use crate::core::json_search::{find_first, first_string};
use crate::platforms::common::{image_extension, ExtractionStrategy, ResolverContext};
use crate::platforms::traits::PlatformResolver;

const REHYDRATION_SELECTOR: &str = "script#__UNIVERSAL_DATA_FOR_REHYDRATION__";
const TIKTOK_REFERER: &str = "https://www.tiktok.com/";
const CAPTION_KEYS: &[&str] = &["desc", "caption", "title"];

/// Photo slideshow found in the page's rehydration JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePost {
    pub urls: Vec<String>,
    pub caption: Option<String>,
}

/// Videos through the extractor; photo slideshows, which the extractor cannot
/// handle, by scraping the post page.
pub struct TikTokResolver {
    strategy: ExtractionStrategy,
    fetcher: Arc<dyn WebFetcher>,
}

impl TikTokResolver {
    pub fn new(ctx: &ResolverContext) -> Self {
        Self {
            strategy: ExtractionStrategy::new(
                ctx,
                MOBILE_USER_AGENT,
                ctx.cookies_file(Platform::TikTok),
            ),
            fetcher: ctx.fetcher.clone(),
        }
    }

    async fn scrape(&self, url: &str, output_dir: &Path) -> anyhow::Result<DownloadResult> {
        let req = PageRequest::with_user_agent(MOBILE_USER_AGENT);
        let html = self.fetcher.fetch_page(url, &req).await?;
        let post = parse_image_post(&html)?.ok_or_else(|| anyhow!("page has no image post"))?;

        let req = req.referer(TIKTOK_REFERER);
        let stem = uuid::Uuid::new_v4();
        let mut items = Vec::with_capacity(post.urls.len());
        for (i, image_url) in post.urls.iter().enumerate() {
            let path = output_dir.join(format!(
                "{}_{}.{}",
                stem,
                i + 1,
                image_extension(image_url)
            ));
            self.fetcher.fetch_file(image_url, &path, &req).await?;
            items.push(LocalMediaRef::new(path));
        }

        tracing::info!("[tiktok] scraped {} image(s) from {}", items.len(), url);
        let caption = post.caption.unwrap_or_default();
        if items.len() == 1 {
            return Ok(DownloadResult::single(items.remove(0), caption));
        }
        Ok(DownloadResult::carousel(items, caption)?)
    }
}

/// Reads the slideshow out of a TikTok post page. `Ok(None)` means the page has
/// the data blob but no images.
pub fn parse_image_post(html: &str) -> anyhow::Result<Option<ImagePost>> {
    let doc = Html::parse_document(html);
    let selector =
        Selector::parse(REHYDRATION_SELECTOR).map_err(|e| anyhow!("bad selector: {:?}", e))?;
    let script = doc
        .select(&selector)
        .next()
        .ok_or_else(|| anyhow!("rehydration data not found in page"))?;
    let data: serde_json::Value = serde_json::from_str(&script.text().collect::<String>())?;

    let Some(images) = find_first(&data, "imagePost")
        .and_then(|post| post.get("images"))
        .and_then(|images| images.as_array())
    else {
        return Ok(None);
    };

    let urls: Vec<String> = images.iter().filter_map(image_url).collect();
    if urls.is_empty() {
        return Ok(None);
    }

    Ok(Some(ImagePost {
        urls,
        caption: first_string(&data, CAPTION_KEYS),
    }))
}

fn image_url(image: &serde_json::Value) -> Option<String> {
    let first_of_list = |v: &serde_json::Value| {
        v.pointer("/urlList/0")
            .and_then(|u| u.as_str())
            .filter(|u| !u.is_empty())
            .map(|u| u.to_string())
    };

    image
        .get("imageURL")
        .and_then(first_of_list)
        .or_else(|| {
            image.get("displayLink").and_then(|link| match link.as_str() {
                Some(s) if !s.is_empty() => Some(s.to_string()),
                _ => first_of_list(link),
            })
        })
}

#[async_trait]
impl PlatformResolver for TikTokResolver {
    fn name(&self) -> &str {
        "tiktok"
    }

    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    fn can_handle(&self, url: &str) -> bool {
        Platform::from_url(url) == Platform::TikTok
    }

    async fn resolve(&self, request: &DownloadRequest) -> PipelineResult<DownloadResult> {
        let opts = self.strategy.options();
        let extract_err = match self.strategy.attempt(&request.url, &opts).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        tracing::debug!(
            "[tiktok] extractor failed ({}), scraping page for images",
            extract_err
        );
        self.scrape(&request.url, &opts.output_dir)
            .await
            .map_err(|scrape_err| {
                tracing::debug!("[tiktok] scrape failed: {:#}", scrape_err);
                match extract_err.into_pipeline_error() {
                    PipelineError::NoMediaFound(msg) => {
                        PipelineError::NoMediaFound(format!("{}; scrape: {:#}", msg, scrape_err))
                    }
                    other => other,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::{Extraction, ExtractorError};
    use crate::platforms::common::tests::{context, write_media, MockExtractor, MockFetcher};
    use serde_json::json;

    fn page(data: serde_json::Value) -> String {
        format!(
            "<html><head><script id=\"__UNIVERSAL_DATA_FOR_REHYDRATION__\" \
             type=\"application/json\">{}</script></head><body></body></html>",
            data
        )
    }

    fn slideshow() -> serde_json::Value {
        json!({
            "__DEFAULT_SCOPE__": {
                "webapp.video-detail": {
                    "itemInfo": {
                        "itemStruct": {
                            "desc": "three photos",
                            "imagePost": {
                                "images": [
                                    { "imageURL": { "urlList": ["https://p16.tiktokcdn.com/1.jpeg"] } },
                                    { "imageURL": { "urlList": [] }, "displayLink": "https://p16.tiktokcdn.com/2.webp" },
                                    { "imageURL": { "urlList": ["https://p16.tiktokcdn.com/3.jpeg", "https://alt/3.jpeg"] } }
                                ]
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn parses_image_post() {
        let post = parse_image_post(&page(slideshow())).unwrap().unwrap();
        assert_eq!(
            post.urls,
            vec![
                "https://p16.tiktokcdn.com/1.jpeg",
                "https://p16.tiktokcdn.com/2.webp",
                "https://p16.tiktokcdn.com/3.jpeg",
            ]
        );
        assert_eq!(post.caption.as_deref(), Some("three photos"));
    }

    #[test]
    fn page_without_blob_is_an_error() {
        assert!(parse_image_post("<html><body>Verify to continue</body></html>").is_err());
        assert_eq!(parse_image_post(&page(json!({ "desc": "video" }))).unwrap(), None);
    }

    #[tokio::test]
    async fn slideshow_falls_back_to_scrape() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://www.tiktok.com/@user/photo/7300000000000000000";
        let extractor = MockExtractor::new(|_, _| {
            Err(ExtractorError::new("ERROR: [TikTok] 7300: Unsupported URL"))
        });
        let mut fetcher = MockFetcher {
            files: vec![
                "https://p16.tiktokcdn.com/1.jpeg".to_string(),
                "https://p16.tiktokcdn.com/2.webp".to_string(),
                "https://p16.tiktokcdn.com/3.jpeg".to_string(),
            ],
            ..Default::default()
        };
        fetcher.pages.insert(url.to_string(), page(slideshow()));
        let ctx = context(dir.path(), extractor, fetcher, &[]).await;
        let resolver = TikTokResolver::new(&ctx);

        let result = resolver.resolve(&DownloadRequest::new(url)).await.unwrap();

        assert!(result.is_multiple);
        assert_eq!(result.len(), 3);
        assert_eq!(result.caption, "three photos");
        assert!(result.items.iter().all(|i| i.exists()));
    }

    #[tokio::test]
    async fn video_comes_from_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = MockExtractor::new(|_, out| {
            Ok(Extraction {
                files: vec![write_media(out, "tt.mp4")],
                info: json!({ "description": "dance" }),
            })
        });
        let ctx = context(dir.path(), extractor, MockFetcher::default(), &[]).await;
        let resolver = TikTokResolver::new(&ctx);

        let result = resolver
            .resolve(&DownloadRequest::new("https://vm.tiktok.com/ZMabc/"))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.caption, "dance");
    }

    #[tokio::test]
    async fn nothing_found_is_no_media() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = MockExtractor::new(|_, _| Err(ExtractorError::new("Unsupported URL")));
        let ctx = context(dir.path(), extractor, MockFetcher::default(), &[]).await;
        let resolver = TikTokResolver::new(&ctx);

        let err = resolver
            .resolve(&DownloadRequest::new("https://www.tiktok.com/@u/video/1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoMediaFound(_)));
    }
}
