//! Cleanup Worker.
//!
//! Two sources of work tried in order each tick: queued cleanup messages
//! first, then — only if the queue was empty — a scan for transferred
//! payloads whose retention window has elapsed. Both paths require a
//! successful certificate write before the payload is deleted.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use revelare_common::audit::AuditRecorder;
use revelare_common::metadata;
use revelare_common::object_store::ObjectStore;
use revelare_common::queue::Queue;

const DEQUEUE_VISIBILITY: Duration = Duration::from_secs(60);

pub struct CleanupWorker {
    object_store: ObjectStore,
    audit_recorder: AuditRecorder,
    cleanup_queue: Queue,
    retention: chrono::Duration,
}

impl CleanupWorker {
    pub fn new(
        object_store: ObjectStore,
        audit_recorder: AuditRecorder,
        cleanup_queue: Queue,
        retention_days: i64,
    ) -> Self {
        Self {
            object_store,
            audit_recorder,
            cleanup_queue,
            retention: chrono::Duration::days(retention_days),
        }
    }

    pub async fn tick(&self, cancel: CancellationToken, batch_size: usize) -> Result<(), String> {
        let messages = self
            .cleanup_queue
            .dequeue(batch_size as i64, DEQUEUE_VISIBILITY)
            .await
            .map_err(|e| e.to_string())?;

        if !messages.is_empty() {
            for message in messages {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                if self.cleanup_one(&message.body).await {
                    if let Err(e) = self.cleanup_queue.delete(message.id, message.pop_receipt).await {
                        warn!(path = %message.body, error = %e, "failed to acknowledge cleanup message");
                    }
                }
                // On failure the message is left in place, satisfying the
                // "retry" requirement for a precondition failure.
            }
            return Ok(());
        }

        self.scan_expired(&cancel, batch_size).await
    }

    /// Returns `true` iff the payload was certified and deleted.
    async fn cleanup_one(&self, path: &str) -> bool {
        let object_metadata = match self.object_store.head_metadata(path).await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path, error = %e, "cleanup could not read metadata");
                return false;
            }
        };

        if object_metadata.get(metadata::TRANSFER_STATUS) != Some(metadata::TRANSFER_STATUS_TRANSFERRED) {
            warn!(path = %path, "cleanup requested before transfer completed, leaving for retry");
            return false;
        }

        self.certify_and_delete(path, object_metadata.get(metadata::REMOTE_DESTINATION))
            .await
    }

    async fn scan_expired(&self, cancel: &CancellationToken, batch_size: usize) -> Result<(), String> {
        let objects = self.object_store.list("").await.map_err(|e| e.to_string())?;
        let now = Utc::now();

        let mut processed = 0;
        for object in objects {
            if processed >= batch_size || cancel.is_cancelled() {
                break;
            }
            if object.metadata.get(metadata::TRANSFER_STATUS) != Some(metadata::TRANSFER_STATUS_TRANSFERRED) {
                continue;
            }
            if now - object.last_modified < self.retention {
                continue;
            }

            let remote_destination = object.metadata.get(metadata::REMOTE_DESTINATION).map(str::to_owned);
            if self
                .certify_and_delete(&object.path, remote_destination.as_deref())
                .await
            {
                processed += 1;
            }
        }

        Ok(())
    }

    async fn certify_and_delete(&self, path: &str, remote_destination: Option<&str>) -> bool {
        if let Err(e) = self.audit_recorder.record(path, remote_destination).await {
            warn!(path = %path, error = %e, "failed to write destruction certificate, leaving payload in place");
            return false;
        }

        if let Err(e) = self.object_store.delete(path).await {
            warn!(path = %path, error = %e, "certificate written but payload delete failed");
            return false;
        }

        info!(path = %path, "payload destroyed after retention");
        true
    }
}

#[cfg(test)]
#[allow(unused_imports)]
mod tests {
    use super::*;
    use revelare_common::error::GatewayError;
    use revelare_common::metadata::Metadata;
    use revelare_common::object_store::ObjectStore;
    use sqlx::PgPool;
    use tempfile::TempDir;

    fn transferred_metadata() -> Metadata {
        let mut md = Metadata::new();
        md.insert(metadata::TRANSFER_STATUS, metadata::TRANSFER_STATUS_TRANSFERRED);
        md.insert(
            metadata::REMOTE_DESTINATION,
            "revelare-vessel-data/VESSEL001/data/data_20250101_1.bin",
        );
        md
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn queued_cleanup_certifies_and_deletes_a_transferred_payload(db: PgPool) {
        let root = TempDir::new().unwrap();
        let object_store = ObjectStore::new(db.clone(), root.path().to_path_buf());
        let cleanup_queue = Queue::new(db.clone(), "cleanup");
        let audit_recorder = AuditRecorder::new(db);

        object_store
            .put("VESSEL001/data_20250101_1.bin", b"hello", transferred_metadata())
            .await
            .unwrap();
        cleanup_queue.enqueue("VESSEL001/data_20250101_1.bin").await.unwrap();

        let worker = CleanupWorker::new(object_store.clone(), audit_recorder.clone(), cleanup_queue, 30);
        worker.tick(CancellationToken::new(), 10).await.unwrap();

        let result = object_store.get("VESSEL001/data_20250101_1.bin").await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
        assert_eq!(
            audit_recorder.count_for_path("VESSEL001/data_20250101_1.bin").await.unwrap(),
            1
        );
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn queued_cleanup_leaves_an_untransferred_payload_for_retry(db: PgPool) {
        let root = TempDir::new().unwrap();
        let object_store = ObjectStore::new(db.clone(), root.path().to_path_buf());
        let cleanup_queue = Queue::new(db.clone(), "cleanup");
        let audit_recorder = AuditRecorder::new(db.clone());

        object_store
            .put("VESSEL001/data_20250101_1.bin", b"hello", Metadata::new())
            .await
            .unwrap();
        cleanup_queue.enqueue("VESSEL001/data_20250101_1.bin").await.unwrap();

        let worker = CleanupWorker::new(object_store.clone(), audit_recorder, cleanup_queue, 30);
        worker.tick(CancellationToken::new(), 10).await.unwrap();

        object_store.get("VESSEL001/data_20250101_1.bin").await.unwrap();

        let (still_queued,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM work_queue WHERE queue = 'cleanup'")
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!(still_queued, 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn scan_expired_only_destroys_transferred_payloads_past_retention(db: PgPool) {
        let root = TempDir::new().unwrap();
        let object_store = ObjectStore::new(db.clone(), root.path().to_path_buf());
        let cleanup_queue = Queue::new(db.clone(), "cleanup");
        let audit_recorder = AuditRecorder::new(db.clone());

        object_store
            .put("VESSEL001/expired.bin", b"old", transferred_metadata())
            .await
            .unwrap();
        object_store
            .put("VESSEL001/fresh.bin", b"new", transferred_metadata())
            .await
            .unwrap();
        object_store
            .put("VESSEL001/pending.bin", b"untransferred", Metadata::new())
            .await
            .unwrap();

        sqlx::query("UPDATE payload_objects SET last_modified = NOW() - INTERVAL '31 days' WHERE path = $1")
            .bind("VESSEL001/expired.bin")
            .execute(&db)
            .await
            .unwrap();

        let worker = CleanupWorker::new(object_store.clone(), audit_recorder, cleanup_queue, 30);
        worker.tick(CancellationToken::new(), 10).await.unwrap();

        assert!(matches!(
            object_store.get("VESSEL001/expired.bin").await,
            Err(GatewayError::NotFound(_))
        ));
        object_store.get("VESSEL001/fresh.bin").await.unwrap();
        object_store.get("VESSEL001/pending.bin").await.unwrap();
    }
}
