use std::sync::Arc;

use futures::future::join_all;
use mediabot_core::models::media::DownloadRequest;
use mediabot_core::models::settings::keys;
use mediabot_core::{PipelineError, PipelineResult};

use crate::bot::transport::{ChatRef, MessageRef};
use crate::core::caption::{compose_caption, render_suffix};
use crate::platforms::traits::PlatformResolver;
use crate::storage::store::{setting_or_default, ErrorLogEntry, UserProfile};
use crate::AppState;

/// Records the user and tells whether they may use the bot.
async fn admit_user(state: &AppState, profile: &UserProfile) -> bool {
    match state.store.upsert_user(profile).await {
        Ok(record) => !record.is_banned,
        Err(e) => {
            tracing::warn!("failed to record user {}: {}", profile.user_id, e);
            true
        }
    }
}

/// `/start` and `/help`. Banned users get no answer.
pub async fn handle_command(
    state: &AppState,
    chat: ChatRef,
    profile: &UserProfile,
    key: &str,
) -> anyhow::Result<()> {
    if !admit_user(state, profile).await {
        return Ok(());
    }
    let text = setting_or_default(state.store.as_ref(), key).await;
    state.transport.send_text(chat, &text).await?;
    Ok(())
}

/// Whether `user_id` is listed in the comma separated `admin_ids` setting.
pub async fn is_admin(state: &AppState, user_id: i64) -> bool {
    setting_or_default(state.store.as_ref(), keys::ADMIN_IDS)
        .await
        .split(',')
        .filter_map(|id| id.trim().parse::<i64>().ok())
        .any(|id| id == user_id)
}

/// `/addproxy`: admins paste proxies separated by spaces, commas or newlines.
/// Each is verified before it joins the pool. Everyone else gets no answer.
pub async fn handle_add_proxy(
    state: &AppState,
    chat: ChatRef,
    profile: &UserProfile,
    args: &str,
) -> anyhow::Result<()> {
    if !is_admin(state, profile.user_id).await {
        tracing::debug!("ignored /addproxy from non-admin {}", profile.user_id);
        return Ok(());
    }

    let candidates: Vec<String> = args
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
        .collect();
    if candidates.is_empty() {
        state
            .transport
            .send_text(chat, "Usage: /addproxy host:port [scheme://host:port ...]")
            .await?;
        return Ok(());
    }

    let report = state.proxies.add(&candidates, true).await?;
    let total = state.proxies.list().await?.len();
    let text = format!(
        "Proxies: {} added, {} duplicate, {} dead, {} invalid. Pool size: {}.",
        report.added, report.duplicates, report.dead, report.invalid, total
    );
    state.transport.send_text(chat, &text).await?;
    Ok(())
}

/// Channels from `required_channels` the user has not joined. A failed lookup
/// counts as not joined.
pub async fn missing_channels(state: &AppState, user_id: i64) -> Vec<String> {
    let raw = setting_or_default(state.store.as_ref(), keys::REQUIRED_CHANNELS).await;
    let channels: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
        .collect();
    if channels.is_empty() {
        return Vec::new();
    }

    let checks = join_all(
        channels
            .iter()
            .map(|channel| state.transport.is_chat_member(channel, user_id)),
    )
    .await;

    channels
        .into_iter()
        .zip(checks)
        .filter_map(|(channel, joined)| match joined {
            Ok(true) => None,
            Ok(false) => Some(channel),
            Err(e) => {
                tracing::debug!("membership check for {} failed: {}", channel, e);
                Some(channel)
            }
        })
        .collect()
}

/// Full flow for a text message carrying a link.
pub async fn handle_link(
    state: &AppState,
    chat: ChatRef,
    profile: &UserProfile,
    text: &str,
) -> anyhow::Result<()> {
    let store = state.store.as_ref();

    if !admit_user(state, profile).await {
        let msg = setting_or_default(store, keys::MSG_BANNED).await;
        state.transport.send_text(chat, &msg).await?;
        return Ok(());
    }

    let missing = missing_channels(state, profile.user_id).await;
    if !missing.is_empty() {
        let list = missing
            .iter()
            .map(|c| format!("👉 {}", c))
            .collect::<Vec<_>>()
            .join("\n");
        let msg = setting_or_default(store, keys::MSG_FORCE_SUB)
            .await
            .replace("{channels}", &list);
        state.transport.send_text(chat, &msg).await?;
        return Ok(());
    }

    let request = DownloadRequest::new(text);
    let resolver = state.registry.resolve_for(&request.url);
    let platform = resolver.platform().to_string();

    let status = state
        .transport
        .send_text(chat, &setting_or_default(store, keys::MSG_ANALYZING).await)
        .await?;
    let routing = setting_or_default(store, keys::MSG_ROUTING)
        .await
        .replace("{platform}", &platform);
    edit_status(state, chat, status, &routing).await;

    tracing::info!(
        "user {} requested {} via {}",
        profile.user_id,
        request.url,
        resolver.name()
    );

    let outcome = run_pipeline(state, chat, status, &request, resolver, &platform).await;

    match outcome {
        Ok(_) => {
            if let Err(e) = state.transport.delete_message(chat, status).await {
                tracing::debug!("could not delete status message: {}", e);
            }
        }
        Err(err) => report_failure(state, chat, status, profile, &request, &platform, err).await,
    }
    Ok(())
}

async fn run_pipeline(
    state: &AppState,
    chat: ChatRef,
    status: MessageRef,
    request: &DownloadRequest,
    resolver: Arc<dyn PlatformResolver>,
    platform: &str,
) -> PipelineResult<usize> {
    let store = state.store.as_ref();
    let job_request = request.clone();
    let result = state
        .gate
        .admit(async move { resolver.resolve(&job_request).await })
        .await?;

    edit_status(state, chat, status, &setting_or_default(store, keys::MSG_COMPLETE).await).await;

    let suffix = render_suffix(&setting_or_default(store, keys::MSG_CAPTION).await, platform);
    let caption = compose_caption(
        Some(result.caption.as_str()),
        &suffix,
        state.settings.caption_limit,
    );
    state.delivery.deliver(result, chat, Some(&caption)).await
}

async fn edit_status(state: &AppState, chat: ChatRef, status: MessageRef, text: &str) {
    if let Err(e) = state.transport.edit_text(chat, status, text).await {
        tracing::debug!("status edit failed: {}", e);
    }
}

async fn report_failure(
    state: &AppState,
    chat: ChatRef,
    status: MessageRef,
    profile: &UserProfile,
    request: &DownloadRequest,
    platform: &str,
    err: PipelineError,
) {
    tracing::error!(
        "[{}] {} failed for user {}: {}",
        platform,
        request.url,
        profile.user_id,
        err
    );

    let entry = ErrorLogEntry::new(Some(profile.user_id), platform, &request.url, &err.to_string());
    if let Err(e) = state.store.log_error(entry).await {
        tracing::warn!("failed to record error: {}", e);
    }

    let text = setting_or_default(state.store.as_ref(), keys::MSG_ERROR)
        .await
        .replace("{platform}", platform)
        .replace("{error}", err.user_label());
    edit_status(state, chat, status, &text).await;
}
