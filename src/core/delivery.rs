use std::sync::Arc;

use mediabot_core::models::media::{DownloadResult, LocalMediaRef};
use mediabot_core::{PipelineError, PipelineResult};

use crate::bot::transport::{ChatRef, ChatTransport};

pub const MAX_GROUP_SIZE: usize = 10;

/// Uploads a `DownloadResult` and deletes every file it owns, sent or not.
pub struct DeliveryOrchestrator {
    transport: Arc<dyn ChatTransport>,
    group_size: usize,
}

impl DeliveryOrchestrator {
    pub fn new(transport: Arc<dyn ChatTransport>, group_size: usize) -> Self {
        Self {
            transport,
            group_size: group_size.clamp(2, MAX_GROUP_SIZE),
        }
    }

    /// Returns the number of messages sent. Batches already sent stay sent when a
    /// later one fails.
    pub async fn deliver(
        &self,
        result: DownloadResult,
        chat: ChatRef,
        caption: Option<&str>,
    ) -> PipelineResult<usize> {
        let caption = caption.filter(|c| !c.is_empty());
        let mut pending = result.items;
        let total = pending.len();
        let mut sent = 0;

        while !pending.is_empty() {
            let take = pending.len().min(self.group_size);
            let batch: Vec<LocalMediaRef> = pending.drain(..take).collect();
            let batch_caption = if sent == 0 { caption } else { None };

            let outcome = if batch.len() == 1 {
                self.transport.send_media(chat, &batch[0], batch_caption).await
            } else {
                self.transport
                    .send_media_group(chat, &batch, batch_caption)
                    .await
            };
            release(batch);

            if let Err(e) = outcome {
                tracing::error!(
                    "delivery to {} failed after {} message(s): {:#}",
                    chat,
                    sent,
                    e
                );
                release(std::mem::take(&mut pending));
                return Err(PipelineError::SendFailed(e.to_string()));
            }
            sent += 1;
        }

        tracing::info!("delivered {} item(s) to {} in {} message(s)", total, chat, sent);
        Ok(sent)
    }
}

fn release(items: Vec<LocalMediaRef>) {
    for item in items {
        let path = item.path().to_path_buf();
        if let Err(e) = item.cleanup() {
            tracing::warn!("failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bot::transport::MessageRef;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Sent {
        Text(ChatRef, String),
        Edit(MessageRef, String),
        Delete(MessageRef),
        Media(usize, Option<String>),
    }

    /// Records every call; `fail_on_media` makes the Nth media call (0-based) fail.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        pub calls: Mutex<Vec<Sent>>,
        pub fail_on_media: Option<usize>,
        pub members: Vec<String>,
        media_calls: Mutex<usize>,
    }

    impl MockTransport {
        pub fn failing_at(n: usize) -> Self {
            Self {
                fail_on_media: Some(n),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<Sent> {
            self.calls.lock().unwrap().clone()
        }

        fn media(&self, count: usize, caption: Option<&str>) -> anyhow::Result<()> {
            let mut n = self.media_calls.lock().unwrap();
            let index = *n;
            *n += 1;
            if self.fail_on_media == Some(index) {
                anyhow::bail!("Bad Request: file too big");
            }
            self.calls
                .lock()
                .unwrap()
                .push(Sent::Media(count, caption.map(|c| c.to_string())));
            Ok(())
        }
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn send_text(&self, chat: ChatRef, text: &str) -> anyhow::Result<MessageRef> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Sent::Text(chat, text.to_string()));
            Ok(calls.len() as MessageRef)
        }

        async fn edit_text(
            &self,
            _chat: ChatRef,
            message: MessageRef,
            text: &str,
        ) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Sent::Edit(message, text.to_string()));
            Ok(())
        }

        async fn delete_message(&self, _chat: ChatRef, message: MessageRef) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(Sent::Delete(message));
            Ok(())
        }

        async fn send_media(
            &self,
            _chat: ChatRef,
            item: &LocalMediaRef,
            caption: Option<&str>,
        ) -> anyhow::Result<()> {
            assert!(item.exists(), "file must exist while being sent");
            self.media(1, caption)
        }

        async fn send_media_group(
            &self,
            _chat: ChatRef,
            items: &[LocalMediaRef],
            caption: Option<&str>,
        ) -> anyhow::Result<()> {
            assert!((2..=MAX_GROUP_SIZE).contains(&items.len()));
            self.media(items.len(), caption)
        }

        async fn is_chat_member(&self, channel: &str, _user_id: i64) -> anyhow::Result<bool> {
            Ok(self.members.iter().any(|m| m == channel))
        }
    }

    pub(crate) fn write_files(dir: &Path, names: &[String]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::write(&path, b"media").unwrap();
                path
            })
            .collect()
    }

    fn result_with(dir: &Path, count: usize) -> (DownloadResult, Vec<PathBuf>) {
        let names: Vec<String> = (0..count).map(|i| format!("item{}.jpg", i)).collect();
        let paths = write_files(dir, &names);
        let items = paths.iter().map(LocalMediaRef::new).collect();
        (DownloadResult::carousel(items, "").unwrap(), paths)
    }

    #[tokio::test]
    async fn single_item_goes_out_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_files(dir.path(), &["v.mp4".to_string()]).remove(0);
        let transport = Arc::new(MockTransport::default());
        let orchestrator = DeliveryOrchestrator::new(transport.clone(), MAX_GROUP_SIZE);

        let sent = orchestrator
            .deliver(DownloadResult::single(LocalMediaRef::new(&path), ""), 1, Some("cap"))
            .await
            .unwrap();

        assert_eq!(sent, 1);
        assert_eq!(transport.calls(), vec![Sent::Media(1, Some("cap".into()))]);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn chunks_of_ten_with_caption_first_only() {
        let dir = tempfile::tempdir().unwrap();
        let (result, paths) = result_with(dir.path(), 21);
        let transport = Arc::new(MockTransport::default());
        let orchestrator = DeliveryOrchestrator::new(transport.clone(), MAX_GROUP_SIZE);

        let sent = orchestrator.deliver(result, 1, Some("cap")).await.unwrap();

        assert_eq!(sent, 3);
        assert_eq!(
            transport.calls(),
            vec![
                Sent::Media(10, Some("cap".into())),
                Sent::Media(10, None),
                Sent::Media(1, None),
            ]
        );
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn failure_cleans_up_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (result, paths) = result_with(dir.path(), 25);
        let transport = Arc::new(MockTransport::failing_at(1));
        let orchestrator = DeliveryOrchestrator::new(transport.clone(), MAX_GROUP_SIZE);

        let err = orchestrator.deliver(result, 1, None).await.unwrap_err();

        assert!(matches!(err, PipelineError::SendFailed(_)));
        assert_eq!(transport.calls(), vec![Sent::Media(10, None)]);
        assert!(paths.iter().all(|p| !p.exists()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
