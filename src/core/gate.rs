use std::future::Future;
use std::sync::Arc;

use mediabot_core::{PipelineError, PipelineResult};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Semaphore;

/// Fixed-size multi-thread runtime that runs blocking-heavy extraction work off
/// the bot's event loop.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> anyhow::Result<Self> {
        let threads = threads.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("media-worker")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
            threads,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping a runtime from inside another runtime panics.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Bounds how many resolutions run at once and hands each one to the worker pool.
#[derive(Clone)]
pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    capacity: usize,
    pool: Arc<WorkerPool>,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize, pool: Arc<WorkerPool>) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            pool,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Waits for a free slot, runs `task` on the worker pool and returns its result.
    /// The slot is released whether the task succeeds, fails or panics.
    pub async fn admit<T, F>(&self, task: F) -> PipelineResult<T>
    where
        F: Future<Output = PipelineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Internal(format!("gate closed: {}", e)))?;
        tracing::info!("admitted task ({}/{} in flight)", self.in_flight(), self.capacity);

        // The slot stays taken until the worker task ends, even if the caller goes away.
        let job = async move {
            let _permit = permit;
            task.await
        };
        match self.pool.handle().spawn(job).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                tracing::error!("worker task panicked");
                Err(PipelineError::Internal("worker task panicked".to_string()))
            }
            Err(e) => Err(PipelineError::Internal(format!("worker task failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn gate_should_panic() -> bool {
        true
    }

    fn gate(capacity: usize) -> ConcurrencyGate {
        ConcurrencyGate::new(capacity, Arc::new(WorkerPool::new(2).unwrap()))
    }

    #[tokio::test]
    async fn runs_task_on_worker_pool() {
        let gate = gate(2);
        let name = gate
            .admit(async { Ok(std::thread::current().name().map(|n| n.to_string())) })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("media-worker"));
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn capacity_blocks_extra_admissions() {
        let gate = gate(2);
        let mut releases = Vec::new();
        let mut running = Vec::new();

        for _ in 0..2 {
            let (tx, rx) = oneshot::channel::<()>();
            releases.push(tx);
            let g = gate.clone();
            running.push(tokio::spawn(async move {
                g.admit(async move {
                    let _ = rx.await;
                    Ok(())
                })
                .await
            }));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while gate.in_flight() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let g = gate.clone();
        let third = tokio::spawn(async move { g.admit(async { Ok(3u8) }).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!third.is_finished());
        assert_eq!(gate.in_flight(), 2);

        releases.pop().unwrap().send(()).unwrap();
        assert_eq!(third.await.unwrap().unwrap(), 3);

        for tx in releases {
            tx.send(()).unwrap();
        }
        for handle in running {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn abandoned_caller_keeps_slot_until_task_ends() {
        let gate = gate(1);
        let (tx, rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let g = gate.clone();
        let caller = tokio::spawn(async move {
            g.admit(async move {
                let _ = rx.await;
                let _ = done_tx.send(());
                Ok(())
            })
            .await
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while gate.in_flight() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        caller.abort();
        let _ = caller.await;
        assert_eq!(gate.in_flight(), 1);

        tx.send(()).unwrap();
        done_rx.await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while gate.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn panic_releases_permit() {
        let gate = gate(1);
        let result: PipelineResult<()> = gate
            .admit(async {
                if gate_should_panic() {
                    panic!("boom");
                }
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(PipelineError::Internal(_))));
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.admit(async { Ok(1) }).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn errors_pass_through() {
        let gate = gate(1);
        let result: PipelineResult<()> =
            gate.admit(async { Err(PipelineError::NoMediaFound("x".into())) }).await;
        assert!(matches!(result, Err(PipelineError::NoMediaFound(_))));
    }
}
