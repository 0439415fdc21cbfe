//! Single-process entry point: wires the four pipeline workers and the
//! status surface under one root cancellation token and one database pool.

mod cleanup;
mod config;
mod error;
mod handlers;
mod ingest;
mod transfer;
mod validate;

use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use envconfig::Envconfig;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tracing::{error, info};

use revelare_common::audit::AuditRecorder;
use revelare_common::health::HealthRegistry;
use revelare_common::object_store::ObjectStore;
use revelare_common::queue::Queue;
use revelare_common::remote_store::{RemoteStore, RemoteStoreConfig};
use revelare_common::runtime::{RuntimeConfig, WorkerRuntime};

use cleanup::CleanupWorker;
use config::Config;
use error::StartupError;
use ingest::{DropSource, IngestWorker};
use transfer::TransferWorker;
use validate::ValidateWorker;

/// Tick cadence for the validate/transfer/cleanup loops. Ingest instead
/// uses `FTP_POLL_INTERVAL`, which names its cadence in both drop modes.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = Config::init_from_env()
        .map_err(|e| StartupError::InvalidConfig(e.to_string()))?;

    init_tracing(&config);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .map_err(|e| StartupError::InvalidConfig(format!("migration failed: {e}")))?;

    let store_root = std::path::Path::new(&config.local_store_root).join(&config.local_container_name);
    let object_store = ObjectStore::new(pool.clone(), store_root);
    let validation_queue = Queue::new(pool.clone(), config.validation_queue_name.clone());
    let transfer_queue = Queue::new(pool.clone(), config.transfer_queue_name.clone());
    let cleanup_queue = Queue::new(pool.clone(), config.cleanup_queue_name.clone());
    let audit_recorder = AuditRecorder::new(pool.clone());

    let remote_store = RemoteStore::new(RemoteStoreConfig {
        bucket: config.remote_bucket.clone(),
        region: config.remote_region.clone(),
        access_key: config.remote_access_key.clone(),
        secret_key: config.remote_secret_key.clone(),
        endpoint_override: config.remote_endpoint_url.clone(),
    })
    .await;

    let drop_source = if config.ftp_watch_enabled {
        DropSource::Ftp {
            host: config.ftp_host.clone(),
            port: config.ftp_port,
            user: config.ftp_user.clone(),
            password: config.ftp_password.clone(),
            remote_dir: config.ftp_watch_dir.clone(),
            retry_count: config.ftp_retry_count,
            retry_delay: config.ftp_retry_delay.0,
        }
    } else {
        DropSource::LocalDirectory {
            root: config.ftp_watch_dir.clone().into(),
        }
    };

    let ingest_worker = Arc::new(IngestWorker::new(
        object_store.clone(),
        validation_queue.clone(),
        drop_source,
    ));
    let validate_worker = Arc::new(ValidateWorker::new(
        object_store.clone(),
        validation_queue.clone(),
        transfer_queue.clone(),
    ));
    let transfer_worker = Arc::new(TransferWorker::new(
        object_store.clone(),
        remote_store.clone(),
        transfer_queue.clone(),
        cleanup_queue.clone(),
    ));
    let cleanup_worker = Arc::new(CleanupWorker::new(
        object_store.clone(),
        audit_recorder.clone(),
        cleanup_queue.clone(),
        config.retention_days,
    ));

    let retry_config = |interval: Duration| RuntimeConfig {
        interval,
        batch_size: config.processing_batch_size,
        retry_count: config.operation_retry_count,
        retry_interval: config.operation_retry_interval.0,
    };

    let root_cancel = CancellationToken::new();

    let mut ingest_runtime = WorkerRuntime::new(
        "ingest",
        retry_config(config.ftp_poll_interval.0),
        Arc::new(move |cancel, batch| {
            let worker = ingest_worker.clone();
            Box::pin(async move { worker.tick(cancel, batch).await })
        }),
        &root_cancel,
    );
    let mut validate_runtime = WorkerRuntime::new(
        "validate",
        retry_config(DEFAULT_TICK_INTERVAL),
        Arc::new(move |cancel, batch| {
            let worker = validate_worker.clone();
            Box::pin(async move { worker.tick(cancel, batch).await })
        }),
        &root_cancel,
    );
    let mut transfer_runtime = WorkerRuntime::new(
        "transfer",
        retry_config(DEFAULT_TICK_INTERVAL),
        Arc::new(move |cancel, batch| {
            let worker = transfer_worker.clone();
            Box::pin(async move { worker.tick(cancel, batch).await })
        }),
        &root_cancel,
    );
    let mut cleanup_runtime = WorkerRuntime::new(
        "cleanup",
        retry_config(DEFAULT_TICK_INTERVAL),
        Arc::new(move |cancel, batch| {
            let worker = cleanup_worker.clone();
            Box::pin(async move { worker.tick(cancel, batch).await })
        }),
        &root_cancel,
    );

    let worker_handles = vec![
        ingest_runtime.handle(),
        validate_runtime.handle(),
        transfer_runtime.handle(),
        cleanup_runtime.handle(),
    ];

    ingest_runtime.start();
    validate_runtime.start();
    transfer_runtime.start();
    cleanup_runtime.start();

    let liveness = HealthRegistry::new("liveness");
    let liveness_handle = liveness
        .register("status-surface".to_string(), time::Duration::seconds(60))
        .await;
    liveness_handle.report_healthy().await;

    // Bounds how long the status surface will hold a request open; the two
    // configured directions collapse to one end-to-end budget here since
    // axum has no separate read/write deadlines on a single handler.
    let request_timeout = config.read_timeout.0.max(config.write_timeout.0);
    let timeout_middleware = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|_: tower::BoxError| async {
            StatusCode::REQUEST_TIMEOUT
        }))
        .layer(TimeoutLayer::new(request_timeout));

    let app = handlers::router(handlers::AppState {
        liveness,
        workers: worker_handles,
    })
    .layer(timeout_middleware);

    let bind = config.bind();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(StartupError::BindFailed)?;
    info!(bind = %bind, "status surface listening");

    let shutdown_cancel = root_cancel.clone();

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown_cancel.cancelled().await })
            .await
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    root_cancel.cancel();

    let shutdown = async {
        ingest_runtime.stop().await;
        validate_runtime.stop().await;
        transfer_runtime.stop().await;
        cleanup_runtime.stop().await;
    };

    if tokio::time::timeout(config.shutdown_timeout.0, shutdown)
        .await
        .is_err()
    {
        error!("shutdown timeout exceeded, exiting anyway");
    }

    if let Err(e) = server.await {
        error!(error = %e, "status server task panicked");
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
