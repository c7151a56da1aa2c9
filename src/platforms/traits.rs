use async_trait::async_trait;
use mediabot_core::models::media::{DownloadRequest, DownloadResult, Platform};
use mediabot_core::PipelineResult;

#[async_trait]
pub trait PlatformResolver: Send + Sync {
    fn name(&self) -> &str;
    fn platform(&self) -> Platform;
    fn can_handle(&self, url: &str) -> bool;
    /// Downloads the media behind `request.url`. The returned files are owned by
    /// the result; on error nothing is left on disk.
    async fn resolve(&self, request: &DownloadRequest) -> PipelineResult<DownloadResult>;
}
