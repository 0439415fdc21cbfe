//! Validation Worker.
//!
//! Recomputes the payload's checksum against what ingest recorded and
//! advances verified payloads to the transfer queue. Validation failure is
//! a terminal outcome for the item — it is recorded on the object, not
//! retried.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use revelare_common::checksum::{digest_reader, Algorithm};
use revelare_common::metadata;
use revelare_common::object_store::ObjectStore;
use revelare_common::queue::Queue;

const DEQUEUE_VISIBILITY: Duration = Duration::from_secs(60);

pub struct ValidateWorker {
    object_store: ObjectStore,
    validation_queue: Queue,
    transfer_queue: Queue,
}

impl ValidateWorker {
    pub fn new(object_store: ObjectStore, validation_queue: Queue, transfer_queue: Queue) -> Self {
        Self {
            object_store,
            validation_queue,
            transfer_queue,
        }
    }

    pub async fn tick(&self, cancel: CancellationToken, batch_size: usize) -> Result<(), String> {
        let messages = self
            .validation_queue
            .dequeue(batch_size as i64, DEQUEUE_VISIBILITY)
            .await
            .map_err(|e| e.to_string())?;

        for message in messages {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let path = message.body.clone();
            let valid = self.validate_one(&path).await;

            if let Err(e) = self.validation_queue.delete(message.id, message.pop_receipt).await {
                warn!(path = %path, error = %e, "failed to acknowledge validation message");
                continue;
            }

            if valid {
                if let Err(e) = self.transfer_queue.enqueue(&path).await {
                    warn!(path = %path, error = %e, "validated payload but failed to enqueue transfer message");
                }
            }
        }

        Ok(())
    }

    /// Returns `true` iff the payload validated successfully. All failures
    /// are logged and recorded on the object; none of them are propagated.
    async fn validate_one(&self, path: &str) -> bool {
        let existing = match self.object_store.head_metadata(path).await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path, error = %e, "validation could not read metadata");
                return false;
            }
        };

        let Some(expected) = existing.get(metadata::CHECKSUM) else {
            warn!(path = %path, "validation found no checksum in metadata");
            return false;
        };
        let expected = expected.to_owned();

        let algorithm = existing
            .get(metadata::CHECKSUM_ALGORITHM)
            .and_then(|s| s.parse::<Algorithm>().ok())
            .unwrap_or(Algorithm::Sha256);

        let reader = match self.object_store.open(path).await {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path, error = %e, "validation could not open payload");
                return false;
            }
        };

        let actual = match digest_reader(algorithm, reader).await {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %path, error = %e, "validation failed to read payload");
                return false;
            }
        };

        let valid = actual.eq_ignore_ascii_case(&expected);

        let mut updated = existing;
        updated.insert(
            metadata::VALIDATION_STATUS,
            if valid {
                metadata::VALIDATION_STATUS_VALID
            } else {
                metadata::VALIDATION_STATUS_INVALID
            },
        );
        updated.insert(metadata::VALIDATION_TIMESTAMP, Utc::now().to_rfc3339());

        if let Err(e) = self.object_store.set_metadata(path, updated).await {
            warn!(path = %path, error = %e, "failed to record validation result");
            return false;
        }

        if valid {
            info!(path = %path, "validation succeeded");
        } else {
            warn!(path = %path, expected = %expected, actual = %actual, "validation failed: checksum mismatch");
        }

        valid
    }
}
