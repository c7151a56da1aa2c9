use std::future::Future;

use mediabot_core::models::proxy::ProxyEntry;
use mediabot_core::{PipelineError, PipelineResult};
use rand::seq::SliceRandom;

use crate::core::proxy_pool::ProxyPool;

/// Result of one attempt through one proxy.
#[derive(Debug)]
pub enum ProxyOutcome<T> {
    Success(T),
    /// Failed, but the proxy itself is not to blame.
    Spare(String),
    /// Failed in a way that condemns the proxy.
    Evict(String),
}

/// Retries `attempt` through every pooled proxy in random order until one
/// succeeds. Condemned proxies are removed from the pool as they fail.
pub async fn rotate_proxies<T, F, Fut>(
    pool: &ProxyPool,
    initial_error: &str,
    mut attempt: F,
) -> PipelineResult<T>
where
    F: FnMut(ProxyEntry) -> Fut,
    Fut: Future<Output = ProxyOutcome<T>>,
{
    let mut snapshot = pool.list().await?;
    snapshot.shuffle(&mut rand::rng());
    tracing::debug!("rotating through {} proxies", snapshot.len());

    let mut tried = 0;
    let mut last_error = initial_error.to_string();

    for proxy in snapshot {
        tried += 1;
        match attempt(proxy.clone()).await {
            ProxyOutcome::Success(value) => {
                tracing::info!("succeeded through proxy {} after {} attempt(s)", proxy, tried);
                return Ok(value);
            }
            ProxyOutcome::Spare(e) => {
                tracing::debug!("proxy {} failed without eviction: {}", proxy, e);
                last_error = e;
            }
            ProxyOutcome::Evict(e) => {
                if let Err(err) = pool.remove(&proxy).await {
                    tracing::warn!("could not evict proxy {}: {}", proxy, err);
                }
                last_error = e;
            }
        }
    }

    Err(PipelineError::RateLimited { tried, last_error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::proxy_pool::tests::{pool_with, StaticFetcher};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn seeded_pool(n: usize) -> ProxyPool {
        let pool = pool_with(StaticFetcher::default());
        let candidates: Vec<String> = (1..=n).map(|i| format!("10.0.0.{}:8080", i)).collect();
        pool.add(&candidates, false).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn every_failing_proxy_is_evicted() {
        let pool = seeded_pool(5).await;
        let calls = AtomicUsize::new(0);

        let result: PipelineResult<()> = rotate_proxies(&pool, "HTTP Error 429", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { ProxyOutcome::Evict("HTTP Error 429: Too Many Requests".to_string()) }
        })
        .await;

        match result {
            Err(PipelineError::RateLimited { tried, last_error }) => {
                assert_eq!(tried, 5);
                assert!(last_error.contains("429"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(pool.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn spared_proxies_stay() {
        let pool = seeded_pool(3).await;
        let result: PipelineResult<()> =
            rotate_proxies(&pool, "rate limit", |_| async { ProxyOutcome::Spare("thumb 404".into()) })
                .await;
        assert!(matches!(result, Err(PipelineError::RateLimited { tried: 3, .. })));
        assert_eq!(pool.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let pool = seeded_pool(4).await;
        let calls = AtomicUsize::new(0);

        let value = rotate_proxies(&pool, "rate limit", |proxy| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    ProxyOutcome::Evict("HTTP Error 403".into())
                } else {
                    ProxyOutcome::Success(proxy.to_url())
                }
            }
        })
        .await
        .unwrap();

        assert!(value.starts_with("http://10.0.0."));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn empty_pool_reports_zero_tries() {
        let pool = pool_with(StaticFetcher::default());
        let result: PipelineResult<()> =
            rotate_proxies(&pool, "login required", |_| async { ProxyOutcome::Success(()) }).await;
        match result {
            Err(PipelineError::RateLimited { tried, last_error }) => {
                assert_eq!(tried, 0);
                assert_eq!(last_error, "login required");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
