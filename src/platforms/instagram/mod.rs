use async_trait::async_trait;
use mediabot_core::models::media::{DownloadRequest, DownloadResult, Platform};
use mediabot_core::PipelineResult;

use crate::core::extractor::DESKTOP_USER_AGENT;
use crate::platforms::common::{ExtractionStrategy, ResolverContext};
use crate::platforms::traits::PlatformResolver;

/// Posts, reels and carousels. Still-image posts come back through the thumbnail
/// fallback; rate limiting triggers proxy rotation.
pub struct InstagramResolver {
    strategy: ExtractionStrategy,
}

impl InstagramResolver {
    pub fn new(ctx: &ResolverContext) -> Self {
        Self {
            strategy: ExtractionStrategy::new(
                ctx,
                DESKTOP_USER_AGENT,
                ctx.cookies_file(Platform::Instagram),
            ),
        }
    }
}

#[async_trait]
impl PlatformResolver for InstagramResolver {
    fn name(&self) -> &str {
        "instagram"
    }

    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn can_handle(&self, url: &str) -> bool {
        Platform::from_url(url) == Platform::Instagram
    }

    async fn resolve(&self, request: &DownloadRequest) -> PipelineResult<DownloadResult> {
        tracing::debug!("[instagram] resolving {}", request.url);
        self.strategy.resolve(&request.url).await
    }
}
