use async_trait::async_trait;
use mediabot_core::models::media::{LocalMediaRef, MediaKind};
use teloxide::prelude::*;
use teloxide::types::{
    InputFile, InputMedia, InputMediaPhoto, InputMediaVideo, MessageId, Recipient,
};

pub type ChatRef = i64;
pub type MessageRef = i32;

/// The chat operations the bot and the delivery orchestrator need.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat: ChatRef, text: &str) -> anyhow::Result<MessageRef>;
    async fn edit_text(&self, chat: ChatRef, message: MessageRef, text: &str) -> anyhow::Result<()>;
    async fn delete_message(&self, chat: ChatRef, message: MessageRef) -> anyhow::Result<()>;
    async fn send_media(
        &self,
        chat: ChatRef,
        item: &LocalMediaRef,
        caption: Option<&str>,
    ) -> anyhow::Result<()>;
    /// Sends 2..=10 items as one album; `caption` lands on the first item.
    async fn send_media_group(
        &self,
        chat: ChatRef,
        items: &[LocalMediaRef],
        caption: Option<&str>,
    ) -> anyhow::Result<()>;
    /// `channel` is `@username` or a numeric chat id.
    async fn is_chat_member(&self, channel: &str, user_id: i64) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn recipient_for(channel: &str) -> Recipient {
    let channel = channel.trim();
    match channel.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if channel.starts_with('@') => Recipient::ChannelUsername(channel.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{}", channel)),
    }
}

fn input_media(item: &LocalMediaRef, caption: Option<&str>) -> InputMedia {
    let file = InputFile::file(item.path());
    match item.kind() {
        MediaKind::Photo => {
            let mut media = InputMediaPhoto::new(file);
            if let Some(c) = caption {
                media = media.caption(c.to_string());
            }
            InputMedia::Photo(media)
        }
        // Albums accept photos and videos only; animations go up as video.
        MediaKind::Video | MediaKind::Animation => {
            let mut media = InputMediaVideo::new(file);
            if let Some(c) = caption {
                media = media.caption(c.to_string());
            }
            InputMedia::Video(media)
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, chat: ChatRef, text: &str) -> anyhow::Result<MessageRef> {
        let message = self.bot.send_message(ChatId(chat), text.to_string()).await?;
        Ok(message.id.0)
    }

    async fn edit_text(&self, chat: ChatRef, message: MessageRef, text: &str) -> anyhow::Result<()> {
        self.bot
            .edit_message_text(ChatId(chat), MessageId(message), text.to_string())
            .await?;
        Ok(())
    }

    async fn delete_message(&self, chat: ChatRef, message: MessageRef) -> anyhow::Result<()> {
        self.bot.delete_message(ChatId(chat), MessageId(message)).await?;
        Ok(())
    }

    async fn send_media(
        &self,
        chat: ChatRef,
        item: &LocalMediaRef,
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        let file = InputFile::file(item.path());
        let chat = ChatId(chat);
        match (item.kind(), caption) {
            (MediaKind::Photo, Some(c)) => {
                self.bot.send_photo(chat, file).caption(c.to_string()).await?;
            }
            (MediaKind::Photo, None) => {
                self.bot.send_photo(chat, file).await?;
            }
            (MediaKind::Animation, Some(c)) => {
                self.bot.send_animation(chat, file).caption(c.to_string()).await?;
            }
            (MediaKind::Animation, None) => {
                self.bot.send_animation(chat, file).await?;
            }
            (MediaKind::Video, Some(c)) => {
                self.bot
                    .send_video(chat, file)
                    .caption(c.to_string())
                    .supports_streaming(true)
                    .await?;
            }
            (MediaKind::Video, None) => {
                self.bot.send_video(chat, file).supports_streaming(true).await?;
            }
        }
        Ok(())
    }

    async fn send_media_group(
        &self,
        chat: ChatRef,
        items: &[LocalMediaRef],
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        let media: Vec<InputMedia> = items
            .iter()
            .enumerate()
            .map(|(i, item)| input_media(item, if i == 0 { caption } else { None }))
            .collect();
        self.bot.send_media_group(ChatId(chat), media).await?;
        Ok(())
    }

    async fn is_chat_member(&self, channel: &str, user_id: i64) -> anyhow::Result<bool> {
        let member = self
            .bot
            .get_chat_member(recipient_for(channel), UserId(user_id as u64))
            .await?;
        Ok(member.kind.is_present())
    }
}
