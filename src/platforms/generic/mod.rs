use std::sync::Arc;

use async_trait::async_trait;
use mediabot_core::models::media::{DownloadRequest, DownloadResult, LocalMediaRef, Platform};
use mediabot_core::{PipelineError, PipelineResult};

use crate::core::caption::caption_from_info;
use crate::core::extractor::{ExtractOptions, MediaExtractor};
use crate::platforms::common::ResolverContext;
use crate::platforms::traits::PlatformResolver;

/// Best effort for any link no other resolver claims: one extraction, no fallbacks.
pub struct GenericResolver {
    extractor: Arc<dyn MediaExtractor>,
    base: ExtractOptions,
}

impl GenericResolver {
    pub fn new(ctx: &ResolverContext) -> Self {
        Self {
            extractor: ctx.extractor.clone(),
            base: ctx.base_options(),
        }
    }
}

#[async_trait]
impl PlatformResolver for GenericResolver {
    fn name(&self) -> &str {
        "generic"
    }

    fn platform(&self) -> Platform {
        Platform::Generic
    }

    fn can_handle(&self, url: &str) -> bool {
        url::Url::parse(url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    async fn resolve(&self, request: &DownloadRequest) -> PipelineResult<DownloadResult> {
        if !self.can_handle(&request.url) {
            return Err(PipelineError::UnsupportedLink(request.url.clone()));
        }

        let extraction = self
            .extractor
            .extract(&request.url, &self.base)
            .await
            .map_err(|e| e.into_pipeline_error())?;

        let caption = caption_from_info(&extraction.info).unwrap_or_default();
        let mut items: Vec<LocalMediaRef> =
            extraction.files.into_iter().map(LocalMediaRef::new).collect();

        match items.len() {
            0 => Err(PipelineError::NoMediaFound(request.url.clone())),
            1 => Ok(DownloadResult::single(items.remove(0), caption)),
            _ => DownloadResult::carousel(items, caption),
        }
    }
}
