use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediabot_core::models::settings::DEFAULT_SETTINGS;
use mediabot_core::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const MAX_ERROR_LOG: usize = 1000;
const ACTIVITY_PERSIST_MINUTES: i64 = 10;

/// What the chat transport knows about a sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub is_banned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorLogEntry {
    pub user_id: Option<i64>,
    pub platform: String,
    pub url: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorLogEntry {
    pub fn new(user_id: Option<i64>, platform: &str, url: &str, message: &str) -> Self {
        Self {
            user_id,
            platform: platform.to_string(),
            url: url.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_users: usize,
    pub banned_users: usize,
    pub active_24h: usize,
    pub total_errors: usize,
}

/// Persistent settings, users and error log shared by the bot and the pipeline.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> PipelineResult<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> PipelineResult<()>;
    async fn get_user(&self, user_id: i64) -> PipelineResult<Option<UserRecord>>;
    async fn upsert_user(&self, profile: &UserProfile) -> PipelineResult<UserRecord>;
    async fn set_banned(&self, user_id: i64, banned: bool) -> PipelineResult<bool>;
    async fn log_error(&self, entry: ErrorLogEntry) -> PipelineResult<()>;
    /// Newest first.
    async fn recent_errors(&self, limit: usize) -> PipelineResult<Vec<ErrorLogEntry>>;
    async fn stats(&self) -> PipelineResult<StoreStats>;
}

/// Reads a setting, falling back to its built-in default.
pub async fn setting_or_default(store: &dyn SettingsStore, key: &str) -> String {
    match store.get_setting(key).await {
        Ok(Some(value)) => value,
        Ok(None) => mediabot_core::models::settings::default_setting(key).to_string(),
        Err(e) => {
            tracing::warn!("failed to read setting {}: {}", key, e);
            mediabot_core::models::settings::default_setting(key).to_string()
        }
    }
}

/// Writes every default setting the store does not hold yet. Returns how many
/// keys were added.
pub async fn seed_defaults(store: &dyn SettingsStore) -> PipelineResult<usize> {
    let mut seeded = 0;
    for (key, value) in DEFAULT_SETTINGS {
        if store.get_setting(key).await?.is_none() {
            store.set_setting(key, value).await?;
            seeded += 1;
        }
    }
    if seeded > 0 {
        tracing::info!("seeded {} default setting(s)", seeded);
    }
    Ok(seeded)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    settings: BTreeMap<String, String>,
    #[serde(default)]
    users: BTreeMap<i64, UserRecord>,
    #[serde(default)]
    errors: VecDeque<ErrorLogEntry>,
}

/// `SettingsStore` kept in memory and written through to a JSON file.
pub struct JsonStore {
    path: Option<PathBuf>,
    data: Mutex<StoreData>,
}

impl JsonStore {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("opened store {}", path.display());
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StoreData::default()),
        }
    }

    async fn persist(&self, data: &StoreData) -> PipelineResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomic(path, data)
            .await
            .map_err(|e| PipelineError::Storage(format!("{}: {}", path.display(), e)))
    }
}

async fn write_atomic(path: &Path, data: &StoreData) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl SettingsStore for JsonStore {
    async fn get_setting(&self, key: &str) -> PipelineResult<Option<String>> {
        Ok(self.data.lock().await.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> PipelineResult<()> {
        let mut data = self.data.lock().await;
        data.settings.insert(key.to_string(), value.to_string());
        self.persist(&data).await
    }

    async fn get_user(&self, user_id: i64) -> PipelineResult<Option<UserRecord>> {
        Ok(self.data.lock().await.users.get(&user_id).cloned())
    }

    async fn upsert_user(&self, profile: &UserProfile) -> PipelineResult<UserRecord> {
        let now = Utc::now();
        let persist_after = chrono::Duration::minutes(ACTIVITY_PERSIST_MINUTES);
        let mut data = self.data.lock().await;
        let mut dirty = true;
        let record = data
            .users
            .entry(profile.user_id)
            .and_modify(|r| {
                dirty = r.username != profile.username
                    || r.first_name != profile.first_name
                    || now - r.last_active >= persist_after;
                r.username = profile.username.clone();
                r.first_name = profile.first_name.clone();
                r.last_active = now;
            })
            .or_insert_with(|| UserRecord {
                user_id: profile.user_id,
                username: profile.username.clone(),
                first_name: profile.first_name.clone(),
                joined_at: now,
                last_active: now,
                is_banned: false,
            })
            .clone();
        // Activity-only touches stay in memory until the next real write.
        if dirty {
            self.persist(&data).await?;
        }
        Ok(record)
    }

    async fn set_banned(&self, user_id: i64, banned: bool) -> PipelineResult<bool> {
        let mut data = self.data.lock().await;
        let Some(user) = data.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.is_banned = banned;
        self.persist(&data).await?;
        Ok(true)
    }

    async fn log_error(&self, entry: ErrorLogEntry) -> PipelineResult<()> {
        let mut data = self.data.lock().await;
        data.errors.push_back(entry);
        while data.errors.len() > MAX_ERROR_LOG {
            data.errors.pop_front();
        }
        self.persist(&data).await
    }

    async fn recent_errors(&self, limit: usize) -> PipelineResult<Vec<ErrorLogEntry>> {
        let data = self.data.lock().await;
        Ok(data.errors.iter().rev().take(limit).cloned().collect())
    }

    async fn stats(&self) -> PipelineResult<StoreStats> {
        let data = self.data.lock().await;
        let threshold = Utc::now() - chrono::Duration::hours(24);
        Ok(StoreStats {
            total_users: data.users.len(),
            banned_users: data.users.values().filter(|u| u.is_banned).count(),
            active_24h: data.users.values().filter(|u| u.last_active >= threshold).count(),
            total_errors: data.errors.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediabot_core::models::settings::keys;

    fn profile(id: i64, name: &str) -> UserProfile {
        UserProfile {
            user_id: id,
            username: name.to_string(),
            first_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn seeding_keeps_existing_values() {
        let store = JsonStore::in_memory();
        store.set_setting(keys::MSG_CAPTION, "via {platform}").await.unwrap();

        let seeded = seed_defaults(&store).await.unwrap();
        assert_eq!(seeded, DEFAULT_SETTINGS.len() - 1);
        assert_eq!(
            store.get_setting(keys::MSG_CAPTION).await.unwrap().as_deref(),
            Some("via {platform}")
        );
        assert_eq!(seed_defaults(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_preserves_join_date_and_ban() {
        let store = JsonStore::in_memory();
        let first = store.upsert_user(&profile(7, "alice")).await.unwrap();
        assert!(store.set_banned(7, true).await.unwrap());

        let second = store.upsert_user(&profile(7, "alice2")).await.unwrap();
        assert_eq!(second.joined_at, first.joined_at);
        assert_eq!(second.username, "alice2");
        assert!(second.is_banned);
        assert!(!store.set_banned(99, true).await.unwrap());
    }

    #[tokio::test]
    async fn error_log_is_capped_and_newest_first() {
        let store = JsonStore::in_memory();
        for i in 0..(MAX_ERROR_LOG + 5) {
            store
                .log_error(ErrorLogEntry::new(Some(1), "TikTok", &format!("u{}", i), "boom"))
                .await
                .unwrap();
        }
        let recent = store.recent_errors(2).await.unwrap();
        assert_eq!(recent[0].url, format!("u{}", MAX_ERROR_LOG + 4));
        assert_eq!(recent[1].url, format!("u{}", MAX_ERROR_LOG + 3));
        assert_eq!(store.stats().await.unwrap().total_errors, MAX_ERROR_LOG);
    }

    #[tokio::test]
    async fn repeat_visits_do_not_rewrite_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = JsonStore::open(&path).await.unwrap();

        let first = store.upsert_user(&profile(3, "bob")).await.unwrap();
        let on_disk = std::fs::read(&path).unwrap();

        let again = store.upsert_user(&profile(3, "bob")).await.unwrap();
        assert!(again.last_active >= first.last_active);
        assert_eq!(std::fs::read(&path).unwrap(), on_disk);
        assert_eq!(
            store.get_user(3).await.unwrap().unwrap().last_active,
            again.last_active
        );

        store.upsert_user(&profile(3, "bobby")).await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("bobby"));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("store.json");

        let store = JsonStore::open(&path).await.unwrap();
        store.set_setting(keys::PROXY_LIST, "1.2.3.4:80").await.unwrap();
        store.upsert_user(&profile(3, "bob")).await.unwrap();
        drop(store);

        let reopened = JsonStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get_setting(keys::PROXY_LIST).await.unwrap().as_deref(),
            Some("1.2.3.4:80")
        );
        assert!(reopened.get_user(3).await.unwrap().is_some());
        assert_eq!(reopened.stats().await.unwrap().total_users, 1);
    }
}
