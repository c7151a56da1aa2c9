use serde::{Deserialize, Serialize};

/// Tunables of the download pipeline, overridable from `data/settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSettings {
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_media_group_size")]
    pub media_group_size: usize,
    #[serde(default = "default_caption_limit")]
    pub caption_limit: usize,
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,
}

fn default_max_concurrent_downloads() -> usize {
    6
}

fn default_worker_threads() -> usize {
    4
}

fn default_socket_timeout_secs() -> u64 {
    15
}

fn default_retries() -> u32 {
    3
}

fn default_media_group_size() -> usize {
    10
}

fn default_caption_limit() -> usize {
    1024
}

fn default_liveness_timeout_secs() -> u64 {
    5
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent_downloads(),
            worker_threads: default_worker_threads(),
            socket_timeout_secs: default_socket_timeout_secs(),
            retries: default_retries(),
            media_group_size: default_media_group_size(),
            caption_limit: default_caption_limit(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
        }
    }
}

pub mod keys {
    pub const WELCOME_MSG: &str = "welcome_msg";
    pub const HELP_MSG: &str = "help_msg";
    pub const MSG_ANALYZING: &str = "msg_analyzing";
    pub const MSG_ROUTING: &str = "msg_routing";
    pub const MSG_COMPLETE: &str = "msg_complete";
    pub const MSG_ERROR: &str = "msg_error";
    pub const MSG_BANNED: &str = "msg_banned";
    pub const MSG_CAPTION: &str = "msg_caption";
    pub const REQUIRED_CHANNELS: &str = "required_channels";
    pub const MSG_FORCE_SUB: &str = "msg_force_sub";
    pub const PROXY_LIST: &str = "proxy_list";
    pub const ADMIN_IDS: &str = "admin_ids";
}

/// Values written on first start for any key the store does not hold yet.
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    (keys::WELCOME_MSG, "Welcome! Send a link and I will fetch the media for you."),
    (keys::HELP_MSG, "Send an Instagram, Facebook or TikTok link."),
    (keys::MSG_ANALYZING, "Analyzing the link... 🔍"),
    (keys::MSG_ROUTING, "Routing to {platform}... 🔄"),
    (keys::MSG_COMPLETE, "Downloaded. Uploading... 📤"),
    (keys::MSG_ERROR, "Sorry, the download failed ({platform}): {error} ❌"),
    (keys::MSG_BANNED, "⛔ You are banned from using this bot."),
    (keys::MSG_CAPTION, "Source: {platform}"),
    (keys::REQUIRED_CHANNELS, ""),
    (keys::MSG_FORCE_SUB, "🚫 Please join:\n\n{channels}\n\nthen send the link again."),
    (keys::PROXY_LIST, ""),
    (keys::ADMIN_IDS, ""),
];

pub fn default_setting(key: &str) -> &'static str {
    DEFAULT_SETTINGS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let parsed: PipelineSettings =
            serde_json::from_str(r#"{ "max_concurrent_downloads": 2 }"#).unwrap();
        assert_eq!(parsed.max_concurrent_downloads, 2);
        assert_eq!(parsed.worker_threads, 4);
        assert_eq!(parsed.caption_limit, 1024);
    }

    #[test]
    fn unknown_key_has_empty_default() {
        assert_eq!(default_setting("msg_caption"), "Source: {platform}");
        assert_eq!(default_setting("nope"), "");
    }
}
