pub mod handlers;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use mediabot_core::fs_paths::{AppPaths, ServerPaths};
use mediabot_core::models::settings::keys;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::core::delivery::DeliveryOrchestrator;
use crate::core::gate::{ConcurrencyGate, WorkerPool};
use crate::core::http_client::{HttpFetcher, WebFetcher};
use crate::core::proxy_pool::ProxyPool;
use crate::core::ytdlp::YtDlpExtractor;
use crate::platforms::build_registry;
use crate::platforms::common::ResolverContext;
use crate::storage::config::BotConfig;
use crate::storage::store::{seed_defaults, JsonStore, SettingsStore, UserProfile};
use crate::AppState;
use transport::{ChatTransport, TelegramTransport};

const STORE_FILE: &str = "store.json";

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "show the welcome message.")]
    Start,
    #[command(description = "explain how to use the bot.")]
    Help,
    #[command(description = "add proxies to the pool (admins only).")]
    AddProxy(String),
}

fn profile_of(msg: &Message) -> UserProfile {
    match msg.from.as_ref() {
        Some(user) => UserProfile {
            user_id: user.id.0 as i64,
            username: user.username.clone().unwrap_or_default(),
            first_name: user.first_name.clone(),
        },
        None => UserProfile {
            user_id: msg.chat.id.0,
            ..UserProfile::default()
        },
    }
}

async fn on_command(msg: Message, cmd: Command, state: Arc<AppState>) -> ResponseResult<()> {
    let profile = profile_of(&msg);
    let chat = msg.chat.id.0;
    tokio::spawn(async move {
        let handled = match cmd {
            Command::Start => {
                handlers::handle_command(&state, chat, &profile, keys::WELCOME_MSG).await
            }
            Command::Help => {
                handlers::handle_command(&state, chat, &profile, keys::HELP_MSG).await
            }
            Command::AddProxy(args) => {
                handlers::handle_add_proxy(&state, chat, &profile, &args).await
            }
        };
        if let Err(e) = handled {
            tracing::error!("command for {} failed: {:#}", chat, e);
        }
    });
    Ok(())
}

async fn on_text(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text().map(|t| t.trim().to_string()) else {
        return Ok(());
    };
    if text.is_empty() {
        return Ok(());
    }
    let profile = profile_of(&msg);
    let chat = msg.chat.id.0;
    tokio::spawn(async move {
        if let Err(e) = handlers::handle_link(&state, chat, &profile, &text).await {
            tracing::error!("link handling for {} failed: {:#}", chat, e);
        }
    });
    Ok(())
}

/// Removes files a previous run left in the downloads dir.
async fn purge_stale_downloads(dir: &std::path::Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.is_file() && tokio::fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!("removed {} stale file(s) from {}", removed, dir.display());
    }
}

/// Wires the pipeline together and long-polls Telegram until Ctrl-C.
pub async fn serve(
    paths: Arc<ServerPaths>,
    config: BotConfig,
    workers: Arc<WorkerPool>,
) -> anyhow::Result<()> {
    for dir in [
        paths.downloads_dir(),
        paths.data_dir(),
        paths.secrets_dir(),
        paths.bin_dir(),
    ] {
        tokio::fs::create_dir_all(&dir).await?;
    }
    purge_stale_downloads(&paths.downloads_dir()).await;

    let store: Arc<dyn SettingsStore> =
        Arc::new(JsonStore::open(paths.data_dir().join(STORE_FILE)).await?);
    seed_defaults(store.as_ref()).await?;

    let settings = config.pipeline.clone();
    let fetcher: Arc<dyn WebFetcher> = Arc::new(HttpFetcher::new(Duration::from_secs(
        settings.socket_timeout_secs * 2,
    )));
    let proxies = Arc::new(
        ProxyPool::new(store.clone(), fetcher.clone())
            .with_liveness_timeout(Duration::from_secs(settings.liveness_timeout_secs)),
    );

    if !config.proxy_candidates.is_empty() {
        match proxies.add(&config.proxy_candidates, true).await {
            Ok(report) => tracing::info!(
                "imported {} of {} proxies from secrets",
                report.added,
                config.proxy_candidates.len()
            ),
            Err(e) => tracing::warn!("proxy import failed: {}", e),
        }
    }

    let ctx = ResolverContext {
        extractor: Arc::new(YtDlpExtractor::new(paths.bin_dir())),
        fetcher,
        proxies: proxies.clone(),
        paths: paths.clone(),
        settings: settings.clone(),
    };

    let bot = Bot::new(&config.token);
    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(bot.clone()));

    let state = Arc::new(AppState {
        store,
        proxies,
        registry: Arc::new(build_registry(&ctx)),
        gate: ConcurrencyGate::new(settings.max_concurrent_downloads, workers.clone()),
        delivery: DeliveryOrchestrator::new(transport.clone(), settings.media_group_size),
        transport,
        settings,
    });

    tracing::info!(
        "mediabot ready: {} download slot(s) on {} worker thread(s)",
        state.gate.capacity(),
        workers.threads()
    );

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(on_command),
        )
        .branch(dptree::endpoint(on_text));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("dispatcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse() {
        assert!(matches!(Command::parse("/start", "mediabot"), Ok(Command::Start)));
        assert!(matches!(Command::parse("/help", "mediabot"), Ok(Command::Help)));
        assert!(Command::parse("https://instagram.com/p/x", "mediabot").is_err());
        assert!(matches!(
            Command::parse("/addproxy 1.2.3.4:80 socks5://5.6.7.8:1080", "mediabot"),
            Ok(Command::AddProxy(args)) if args == "1.2.3.4:80 socks5://5.6.7.8:1080"
        ));
    }

    #[tokio::test]
    async fn stale_downloads_are_purged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.mp4.part"), b"x").unwrap();
        purge_stale_downloads(dir.path()).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
