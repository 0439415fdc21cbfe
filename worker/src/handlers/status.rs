//! Status Surface: liveness, readiness, per-worker status,
//! and Prometheus metrics, all on one `axum` router.

use std::future::ready;

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use revelare_common::health::HealthRegistry;
use revelare_common::metrics::setup_metrics_router;
use revelare_common::runtime::WorkerHandle;

#[derive(Clone)]
pub struct AppState {
    pub liveness: HealthRegistry,
    pub workers: Vec<WorkerHandle>,
}

#[derive(Serialize)]
struct WorkerStatus {
    worker: String,
    status: String,
    #[serde(rename = "lastRun", skip_serializing_if = "Option::is_none")]
    last_run: Option<chrono::DateTime<chrono::Utc>>,
}

pub fn router(state: AppState) -> Router {
    let liveness = state.liveness.clone();
    let workers = state.workers.clone();

    let app_routes = Router::new()
        .route("/_liveness", get(|| ready("ok")))
        .route("/_readiness", get(move || ready(liveness.get_status())))
        .route("/status", get(move || ready(Json(worker_statuses(&workers)))));

    app_routes.merge(setup_metrics_router())
}

fn worker_statuses(workers: &[WorkerHandle]) -> Vec<WorkerStatus> {
    workers
        .iter()
        .map(|handle| WorkerStatus {
            worker: handle.name().to_owned(),
            status: handle.status(),
            last_run: handle.last_run(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use revelare_common::runtime::{RuntimeConfig, WorkerRuntime};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn noop_runtime(name: &str, parent: &CancellationToken) -> WorkerRuntime {
        let tick: revelare_common::runtime::TickFn =
            std::sync::Arc::new(|_cancel, _batch| Box::pin(async { Ok(()) }));
        let config = RuntimeConfig {
            interval: Duration::from_secs(60),
            batch_size: 1,
            retry_count: 0,
            retry_interval: Duration::from_millis(1),
        };
        WorkerRuntime::new(name, config, tick, parent)
    }

    #[test]
    fn worker_statuses_reflects_each_handle() {
        let parent = CancellationToken::new();
        let ingest = noop_runtime("ingest", &parent);
        let validate = noop_runtime("validate", &parent);
        let handles = vec![ingest.handle(), validate.handle()];

        let statuses = worker_statuses(&handles);

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].worker, "ingest");
        assert_eq!(statuses[0].status, revelare_common::runtime::STATUS_STOPPED);
        assert!(statuses[0].last_run.is_none());
    }

    #[tokio::test]
    async fn router_merges_status_and_metrics_routes_without_conflict() {
        // Router::merge panics at construction time on overlapping paths,
        // so a successful build here is the regression test.
        let liveness = HealthRegistry::new("liveness");
        let _app = router(AppState {
            liveness,
            workers: Vec::new(),
        });
    }
}
