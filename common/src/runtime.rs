//! # Worker Runtime
//!
//! A reusable periodic task executor. Each of the four
//! pipeline workers is just a tick function handed to a `WorkerRuntime`;
//! the runtime owns polling cadence, in-tick retry with backoff,
//! cooperative cancellation, and the worker's externally-visible status.
//!
//! Status and last-run are held behind one small, synchronous `Mutex` per
//! worker — the only in-process lock this pipeline takes anywhere. It is
//! never held across an `.await`, so a blocking `std::sync::Mutex` is the
//! right tool, not `tokio::sync::Mutex`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const STATUS_STOPPED: &str = "stopped";
pub const STATUS_RUNNING: &str = "running";

/// A single tick of a worker's processing function: attempt to make
/// progress on up to `batch_size` items, honoring `cancel` if it fires
/// mid-batch.
pub type TickFn = Arc<
    dyn Fn(CancellationToken, usize) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
        + Send
        + Sync,
>;

struct RuntimeState {
    status: String,
    last_run: Option<DateTime<Utc>>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            status: STATUS_STOPPED.to_owned(),
            last_run: None,
        }
    }
}

/// Runtime configuration shared by every pipeline worker.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub retry_count: u32,
    /// The unit of the linear backoff: attempt `n` (0-indexed) waits
    /// `(n + 1) * retry_interval` before the next attempt.
    pub retry_interval: Duration,
}

/// Wraps a tick function with polling, retry, and status reporting.
pub struct WorkerRuntime {
    name: String,
    config: RuntimeConfig,
    tick: TickFn,
    state: Arc<Mutex<RuntimeState>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// A cheap, cloneable view onto a running worker's status, for the status
/// surface to read without touching the runtime itself.
#[derive(Clone)]
pub struct WorkerHandle {
    name: String,
    state: Arc<Mutex<RuntimeState>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> String {
        self.state.lock().expect("runtime state mutex poisoned").status.clone()
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("runtime state mutex poisoned").last_run
    }

    pub fn is_healthy(&self) -> bool {
        !self.status().starts_with("error")
    }
}

impl WorkerRuntime {
    /// `parent` is the process's single root cancellation token; this
    /// worker's own token is a child of it, so cancelling the root cancels
    /// every worker without each call site needing to remember to do so.
    pub fn new(name: impl Into<String>, config: RuntimeConfig, tick: TickFn, parent: &CancellationToken) -> Self {
        Self {
            name: name.into(),
            config,
            tick,
            state: Arc::new(Mutex::new(RuntimeState::default())),
            cancel: parent.child_token(),
            handle: None,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            name: self.name.clone(),
            state: self.state.clone(),
        }
    }

    /// Start the periodic loop: an immediate first invocation, then one
    /// invocation every `interval` until `stop` is called.
    pub fn start(&mut self) {
        let name = self.name.clone();
        let config = self.config.clone();
        let tick = self.tick.clone();
        let state = self.state.clone();
        let cancel = self.cancel.clone();

        state.lock().expect("runtime state mutex poisoned").status = STATUS_RUNNING.to_owned();

        self.handle = Some(tokio::spawn(async move {
            run_loop(name, config, tick, state, cancel).await;
        }));
    }

    /// Cooperatively cancel the worker and wait for its in-flight tick to
    /// return.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.state.lock().expect("runtime state mutex poisoned").status = STATUS_STOPPED.to_owned();
    }
}

async fn run_loop(
    name: String,
    config: RuntimeConfig,
    tick: TickFn,
    state: Arc<Mutex<RuntimeState>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.interval);
    // The first `tick()` on a freshly created interval fires immediately,
    // giving us the "immediate first invocation" behavior for free.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(worker = %name, "worker stopping");
                return;
            }
            _ = interval.tick() => {}
        }

        let result = run_tick_with_retry(&name, &config, &tick, &cancel).await;

        let mut guard = state.lock().expect("runtime state mutex poisoned");
        guard.last_run = Some(Utc::now());
        guard.status = match result {
            Ok(()) => STATUS_RUNNING.to_owned(),
            Err(detail) => format!("error: {detail}"),
        };
    }
}

/// Run one tick, retrying up to `retryCount` times within this same tick
/// using linear backoff `(attempt + 1) * retryInterval`.
async fn run_tick_with_retry(
    name: &str,
    config: &RuntimeConfig,
    tick: &TickFn,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let mut last_error = String::new();

    for attempt in 0..=config.retry_count {
        if cancel.is_cancelled() {
            return Ok(());
        }

        match tick(cancel.child_token(), config.batch_size).await {
            Ok(()) => return Ok(()),
            Err(detail) => {
                last_error = detail;
                if attempt < config.retry_count {
                    let backoff = config.retry_interval * (attempt + 1);
                    warn!(
                        worker = %name,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %last_error,
                        "tick failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    error!(worker = %name, error = %last_error, "tick failed after exhausting retries");
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_tick(fail_times: usize) -> (TickFn, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_closure = calls.clone();
        let tick: TickFn = Arc::new(move |_cancel, _batch| {
            let calls = calls_for_closure.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < fail_times {
                    Err(format!("synthetic failure {n}"))
                } else {
                    Ok(())
                }
            })
        });
        (tick, calls)
    }

    #[tokio::test]
    async fn succeeds_without_retry_when_tick_succeeds() {
        let (tick, calls) = make_tick(0);
        let config = RuntimeConfig {
            interval: Duration::from_secs(60),
            batch_size: 10,
            retry_count: 3,
            retry_interval: Duration::from_millis(1),
        };
        let cancel = CancellationToken::new();

        let result = run_tick_with_retry("test", &config, &tick, &cancel).await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_retry_count_then_reports_error() {
        let (tick, calls) = make_tick(10);
        let config = RuntimeConfig {
            interval: Duration::from_secs(60),
            batch_size: 10,
            retry_count: 2,
            retry_interval: Duration::from_millis(1),
        };
        let cancel = CancellationToken::new();

        let result = run_tick_with_retry("test", &config, &tick, &cancel).await;

        assert_eq!(result, Err("synthetic failure 2".to_owned()));
        // initial attempt + 2 retries = 3 calls
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovers_after_a_transient_failure() {
        let (tick, calls) = make_tick(1);
        let config = RuntimeConfig {
            interval: Duration::from_secs(60),
            batch_size: 10,
            retry_count: 3,
            retry_interval: Duration::from_millis(1),
        };
        let cancel = CancellationToken::new();

        let result = run_tick_with_retry("test", &config, &tick, &cancel).await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn start_then_stop_transitions_status() {
        let (tick, _calls) = make_tick(0);
        let config = RuntimeConfig {
            interval: Duration::from_millis(10),
            batch_size: 10,
            retry_count: 1,
            retry_interval: Duration::from_millis(1),
        };
        let parent = CancellationToken::new();
        let mut runtime = WorkerRuntime::new("unit-test-worker", config, tick, &parent);
        let handle = runtime.handle();

        runtime.start();
        assert_eq!(handle.status(), STATUS_RUNNING);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_healthy());

        runtime.stop().await;
        assert_eq!(handle.status(), STATUS_STOPPED);
    }
}
