use async_trait::async_trait;
use mediabot_core::models::media::{DownloadRequest, DownloadResult, Platform};
use mediabot_core::PipelineResult;

use crate::core::extractor::MOBILE_USER_AGENT;
use crate::platforms::common::{ExtractionStrategy, ResolverContext};
use crate::platforms::traits::PlatformResolver;

/// Watch links and reels. Cookies are optional; requests look like mobile Safari.
pub struct FacebookResolver {
    strategy: ExtractionStrategy,
}

impl FacebookResolver {
    pub fn new(ctx: &ResolverContext) -> Self {
        Self {
            strategy: ExtractionStrategy::new(
                ctx,
                MOBILE_USER_AGENT,
                ctx.cookies_file(Platform::Facebook),
            ),
        }
    }
}

#[async_trait]
impl PlatformResolver for FacebookResolver {
    fn name(&self) -> &str {
        "facebook"
    }

    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    fn can_handle(&self, url: &str) -> bool {
        Platform::from_url(url) == Platform::Facebook
    }

    async fn resolve(&self, request: &DownloadRequest) -> PipelineResult<DownloadResult> {
        tracing::debug!("[facebook] resolving {}", request.url);
        self.strategy.resolve(&request.url).await
    }
}
