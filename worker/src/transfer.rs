//! Transfer Worker.
//!
//! Uploads validated payloads to the remote store and confirms landing
//! before advancing to cleanup. Upload or probe failure leaves the message
//! in place so queue visibility retries it on a later tick.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use revelare_common::checksum::{digest, Algorithm};
use revelare_common::metadata;
use revelare_common::object_store::ObjectStore;
use revelare_common::queue::Queue;
use revelare_common::remote_store::{remote_key, RemoteStore};
use revelare_common::vessel;

const DEQUEUE_VISIBILITY: Duration = Duration::from_secs(120);

pub struct TransferWorker {
    object_store: ObjectStore,
    remote_store: RemoteStore,
    transfer_queue: Queue,
    cleanup_queue: Queue,
}

impl TransferWorker {
    pub fn new(
        object_store: ObjectStore,
        remote_store: RemoteStore,
        transfer_queue: Queue,
        cleanup_queue: Queue,
    ) -> Self {
        Self {
            object_store,
            remote_store,
            transfer_queue,
            cleanup_queue,
        }
    }

    pub async fn tick(&self, cancel: CancellationToken, batch_size: usize) -> Result<(), String> {
        let messages = self
            .transfer_queue
            .dequeue(batch_size as i64, DEQUEUE_VISIBILITY)
            .await
            .map_err(|e| e.to_string())?;

        for message in messages {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let path = message.body.clone();
            if self.transfer_one(&path).await {
                if let Err(e) = self.transfer_queue.delete(message.id, message.pop_receipt).await {
                    warn!(path = %path, error = %e, "failed to acknowledge transfer message");
                    continue;
                }
                if let Err(e) = self.cleanup_queue.enqueue(&path).await {
                    warn!(path = %path, error = %e, "transferred payload but failed to enqueue cleanup message");
                }
            }
            // On failure the message is left as-is; its visibility timeout
            // will expire and it reappears for a later attempt.
        }

        Ok(())
    }

    /// Returns `true` iff the payload was confirmed landed remotely and
    /// metadata was updated.
    async fn transfer_one(&self, path: &str) -> bool {
        let obj_metadata = match self.object_store.head_metadata(path).await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path, error = %e, "transfer could not read metadata");
                return false;
            }
        };

        if obj_metadata.get(metadata::VALIDATION_STATUS) != Some(metadata::VALIDATION_STATUS_VALID) {
            warn!(path = %path, "transfer attempted on a payload that is not validated, leaving for retry");
            return false;
        }

        let vessel_id = obj_metadata
            .get(metadata::VESSEL_ID)
            .map(str::to_owned)
            .unwrap_or_else(|| vessel::derive_from_path(path));

        let filename = path.rsplit('/').next().unwrap_or(path);
        let key = remote_key(&vessel_id, filename);

        let (bytes, _) = match self.object_store.get(path).await {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %path, error = %e, "transfer could not read payload bytes");
                return false;
            }
        };

        let local_md5 = digest(Algorithm::Md5, &bytes);

        let etag = match self.remote_store.upload(&key, bytes).await {
            Ok(etag) => etag,
            Err(e) => {
                warn!(path = %path, key = %key, error = %e, "upload to remote store failed");
                return false;
            }
        };

        match self.remote_store.exists(&key).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(path = %path, key = %key, "remote store reported object absent after upload");
                return false;
            }
            Err(e) => {
                warn!(path = %path, key = %key, error = %e, "existence probe after upload failed");
                return false;
            }
        }

        if !etag.is_empty() && !local_md5.eq_ignore_ascii_case(&etag) {
            warn!(
                path = %path,
                local_md5 = %local_md5,
                remote_etag = %etag,
                "remote etag does not match locally computed MD5, proceeding anyway"
            );
        }

        let mut updated = obj_metadata;
        updated.insert(metadata::TRANSFER_STATUS, metadata::TRANSFER_STATUS_TRANSFERRED);
        updated.insert(metadata::TRANSFER_TIMESTAMP, Utc::now().to_rfc3339());
        updated.insert(
            metadata::REMOTE_DESTINATION,
            format!("{}/{key}", self.remote_store.bucket()),
        );
        if !etag.is_empty() {
            updated.insert(metadata::REMOTE_ETAG, etag);
        }

        if let Err(e) = self.object_store.set_metadata(path, updated).await {
            warn!(path = %path, error = %e, "failed to record transfer result");
            return false;
        }

        info!(path = %path, key = %key, "transfer succeeded");
        true
    }
}
