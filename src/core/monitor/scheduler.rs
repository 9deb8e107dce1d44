/*!
Task orchestration: periodic workers under a shared cancellation signal.

Workers implement [`Worker`]: a name, a period, and a fallible `run_once`.
The orchestrator gives each worker its own scheduling loop honoring the
period as "fire no faster than". A failed `run_once` is logged and the next
tick is scheduled; a worker is never aborted for failing.

Shutdown flips a watch-channel signal. Every suspension point in a worker
must observe it within the grace bound, either because its I/O is wrapped
in a timeout or because it selects on [`ShutdownSignal::cancelled`].
*/

use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::types::MonitorError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cooperative cancellation handle cloned into every worker.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wrap a raw receiver; used by tests that drive the signal directly.
    pub fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes when shutdown is signalled. Safe to call repeatedly.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // An Err means the sender is gone, which only happens at teardown
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }

    /// Run `fut` unless shutdown arrives first.
    pub async fn guard<T>(&self, fut: impl std::future::Future<Output = T>) -> Option<T> {
        tokio::select! {
            out = fut => Some(out),
            _ = self.cancelled() => None,
        }
    }
}

/// The worker contract: `(name, period, run_once)`.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;
    fn period(&self) -> Duration;
    async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<(), MonitorError>;
}

pub struct TaskOrchestrator {
    tx: watch::Sender<bool>,
    signal: ShutdownSignal,
    handles: Vec<JoinHandle<()>>,
}

impl TaskOrchestrator {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx,
            signal: ShutdownSignal { rx },
            handles: Vec::new(),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Spawn the scheduling loop for one worker.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        let signal = self.signal.clone();
        let handle = tokio::spawn(async move {
            let logger = get_debug_logger();
            let name = worker.name();
            logger.debug("Orchestrator", &format!("worker {} started", name));
            loop {
                if signal.is_shutdown() {
                    break;
                }
                let tick_started = tokio::time::Instant::now();
                match worker.run_once(&signal).await {
                    Ok(()) => {}
                    Err(MonitorError::Cancelled) => break,
                    Err(e) => {
                        // Log and keep scheduling; workers never die on error
                        logger.warn("Orchestrator", &format!("worker {} failed: {}", name, e));
                    }
                }
                let elapsed = tick_started.elapsed();
                let period = worker.period();
                let wait = period.saturating_sub(elapsed);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = signal.cancelled() => break,
                }
            }
            logger.debug("Orchestrator", &format!("worker {} stopped", name));
        });
        self.handles.push(handle);
    }

    /// Signal shutdown and await all in-flight `run_once` calls up to
    /// `grace`. Returns true when every worker wound down in time.
    pub async fn shutdown(&mut self, grace: Duration) -> bool {
        let _ = self.tx.send(true);
        let mut handles = std::mem::take(&mut self.handles);
        let drain = async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        };
        let drained = tokio::time::timeout(grace, drain).await.is_ok();
        if !drained {
            // Whatever is left gets aborted; the process supervisor
            // cleans up any subprocess the aborted tasks owned.
            for handle in &handles {
                handle.abort();
            }
        }
        drained
    }
}

impl Default for TaskOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct CountingWorker {
        ticks: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn period(&self) -> Duration {
            Duration::from_millis(10)
        }
        async fn run_once(&self, _shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MonitorError::SpawnError("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn worker_ticks_and_survives_errors() {
        let worker = Arc::new(CountingWorker {
            ticks: AtomicU32::new(0),
            fail: true,
        });
        let mut orch = TaskOrchestrator::new();
        orch.register(worker.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(orch.shutdown(Duration::from_secs(2)).await);
        // Errors did not kill the loop
        assert!(worker.ticks.load(Ordering::SeqCst) >= 3);
    }

    struct SlowWorker {
        observed_shutdown: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Worker for SlowWorker {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn period(&self) -> Duration {
            Duration::from_secs(3600)
        }
        async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
            // A long suspension guarded by the signal
            if shutdown
                .guard(tokio::time::sleep(Duration::from_secs(600)))
                .await
                .is_none()
            {
                self.observed_shutdown.store(true, Ordering::SeqCst);
                return Err(MonitorError::Cancelled);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_interrupts_suspended_worker_within_grace() {
        let observed = Arc::new(AtomicBool::new(false));
        let mut orch = TaskOrchestrator::new();
        orch.register(Arc::new(SlowWorker {
            observed_shutdown: observed.clone(),
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let started = tokio::time::Instant::now();
        assert!(orch.shutdown(Duration::from_secs(2)).await);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn period_is_fire_no_faster_than() {
        struct Periodic {
            ticks: AtomicU32,
        }
        #[async_trait]
        impl Worker for Periodic {
            fn name(&self) -> &'static str {
                "periodic"
            }
            fn period(&self) -> Duration {
                Duration::from_millis(50)
            }
            async fn run_once(&self, _s: &ShutdownSignal) -> Result<(), MonitorError> {
                self.ticks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
        let worker = Arc::new(Periodic {
            ticks: AtomicU32::new(0),
        });
        let mut orch = TaskOrchestrator::new();
        orch.register(worker.clone());
        tokio::time::sleep(Duration::from_millis(120)).await;
        orch.shutdown(Duration::from_secs(1)).await;
        // ~120ms at a 50ms period: 2-3 ticks, never 10
        let ticks = worker.ticks.load(Ordering::SeqCst);
        assert!((2..=4).contains(&ticks), "ticks {}", ticks);
    }
}
