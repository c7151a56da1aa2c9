use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use mediabot_core::models::proxy::{format_proxy_list, parse_proxy_list, ProxyEntry};
use mediabot_core::models::settings::keys;
use mediabot_core::PipelineResult;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::core::http_client::WebFetcher;
use crate::storage::store::SettingsStore;

pub const LIVENESS_URL: &str = "https://api.ipify.org?format=json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddReport {
    pub added: usize,
    pub duplicates: usize,
    pub dead: usize,
    pub invalid: usize,
}

/// Dedup list of proxies persisted under the `proxy_list` setting.
pub struct ProxyPool {
    store: Arc<dyn SettingsStore>,
    fetcher: Arc<dyn WebFetcher>,
    liveness_timeout: Duration,
    write_lock: Mutex<()>,
}

impl ProxyPool {
    pub fn new(store: Arc<dyn SettingsStore>, fetcher: Arc<dyn WebFetcher>) -> Self {
        Self {
            store,
            fetcher,
            liveness_timeout: Duration::from_secs(5),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    pub async fn list(&self) -> PipelineResult<Vec<ProxyEntry>> {
        let raw = self.store.get_setting(keys::PROXY_LIST).await?;
        Ok(parse_proxy_list(raw.as_deref().unwrap_or("")))
    }

    async fn save(&self, entries: &[ProxyEntry]) -> PipelineResult<()> {
        self.store
            .set_setting(keys::PROXY_LIST, &format_proxy_list(entries))
            .await
    }

    /// Parses and appends `candidates`. With `verify`, new entries are checked
    /// concurrently and dead ones are dropped.
    pub async fn add(&self, candidates: &[String], verify: bool) -> PipelineResult<AddReport> {
        let mut report = AddReport::default();
        let mut fresh = Vec::new();
        let mut seen = HashSet::new();

        for raw in candidates.iter().filter(|c| !c.trim().is_empty()) {
            match raw.parse::<ProxyEntry>() {
                Ok(entry) => {
                    if seen.insert(entry.normalized()) {
                        fresh.push(entry);
                    } else {
                        report.duplicates += 1;
                    }
                }
                Err(e) => {
                    tracing::debug!("rejected proxy candidate {:?}: {}", raw, e);
                    report.invalid += 1;
                }
            }
        }

        let current: HashSet<String> = self.list().await?.iter().map(|e| e.normalized()).collect();
        let before = fresh.len();
        fresh.retain(|e| !current.contains(&e.normalized()));
        report.duplicates += before - fresh.len();

        if verify && !fresh.is_empty() {
            let checks = join_all(fresh.iter().map(|e| self.check_liveness(e))).await;
            let mut alive = Vec::with_capacity(fresh.len());
            for (entry, ok) in fresh.into_iter().zip(checks) {
                if ok {
                    alive.push(entry);
                } else {
                    report.dead += 1;
                }
            }
            fresh = alive;
        }

        let _guard = self.write_lock.lock().await;
        let mut entries = self.list().await?;
        let mut known: HashSet<String> = entries.iter().map(|e| e.normalized()).collect();
        for entry in fresh {
            if known.insert(entry.normalized()) {
                entries.push(entry);
                report.added += 1;
            } else {
                report.duplicates += 1;
            }
        }
        if report.added > 0 {
            self.save(&entries).await?;
        }

        tracing::info!(
            "proxy pool: {} added, {} duplicate, {} dead, {} invalid",
            report.added,
            report.duplicates,
            report.dead,
            report.invalid
        );
        Ok(report)
    }

    /// Removes `entry`; returns whether it was present. Removing twice is harmless.
    pub async fn remove(&self, entry: &ProxyEntry) -> PipelineResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.list().await?;
        let before = entries.len();
        entries.retain(|e| e.normalized() != entry.normalized());
        if entries.len() == before {
            return Ok(false);
        }
        self.save(&entries).await?;
        tracing::warn!("evicted proxy {} ({} left)", entry, entries.len());
        Ok(true)
    }

    pub async fn check_liveness(&self, entry: &ProxyEntry) -> bool {
        self.fetcher
            .probe(LIVENESS_URL, entry, self.liveness_timeout)
            .await
    }
}
