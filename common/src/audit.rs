//! # Audit Recorder
//!
//! Persists destruction certificates independently of the object store, so
//! an outage of the metadata table does not threaten audit durability. The
//! pipeline requires a successful `record` call as a precondition for every
//! delete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::checksum::{digest, Algorithm};
use crate::error::GatewayError;

const UNKNOWN_DESTINATION: &str = "unknown";

/// A destruction certificate, as persisted and as serialized for its
/// on-disk JSON representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestructionCertificate {
    pub id: String,
    #[serde(rename = "blobName")]
    pub payload_path: String,
    #[serde(rename = "operationType")]
    pub operation_type: String,
    #[serde(rename = "s3Destination")]
    pub remote_destination: String,
    #[serde(rename = "deletionTime")]
    pub destruction_time: DateTime<Utc>,
    #[serde(rename = "certificateId")]
    pub certificate_id: String,
}

/// The Audit Recorder.
#[derive(Clone)]
pub struct AuditRecorder {
    pool: PgPool,
}

impl AuditRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write a destruction certificate for `payload_path`, referencing
    /// `remote_destination` (or `"unknown"` if the payload never recorded
    /// one). Returns the generated certificate id.
    pub async fn record(
        &self,
        payload_path: &str,
        remote_destination: Option<&str>,
    ) -> Result<String, GatewayError> {
        let now = Utc::now();
        let certificate_id = certificate_id(payload_path, now, Uuid::new_v4());
        let remote_destination = remote_destination.unwrap_or(UNKNOWN_DESTINATION).to_owned();

        let certificate = DestructionCertificate {
            id: certificate_id.clone(),
            payload_path: payload_path.to_owned(),
            operation_type: "deletion".to_owned(),
            remote_destination,
            destruction_time: now,
            certificate_id: certificate_id.clone(),
        };

        let body = serde_json::to_value(&certificate)
            .map_err(|e| GatewayError::Other(format!("failed to encode certificate: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO destruction_certificates (certificate_id, payload_path, destruction_time, body)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&certificate.certificate_id)
        .bind(&certificate.payload_path)
        .bind(certificate.destruction_time)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(certificate.certificate_id)
    }

    /// Count how many certificates reference `payload_path`. Exposed for
    /// tests checking the certificate-completeness property, not part of
    /// the core contract.
    pub async fn count_for_path(&self, payload_path: &str) -> Result<i64, GatewayError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM destruction_certificates WHERE payload_path = $1")
                .bind(payload_path)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// `deletion-<YYYYMMDD-HHMMSS>-<hash(payloadPath)>-<uuid>`, using the
/// Checksum Engine's own SHA-256 rather than a second hashing primitive. The
/// trailing uuid exists only to keep the primary key unique: two
/// certificates for the same path within the same wall-clock second (a
/// retried `certify_and_delete` after a transient delete failure) are
/// tolerated as benign duplicates and would otherwise collide on the first
/// three components alone.
fn certificate_id(payload_path: &str, at: DateTime<Utc>, unique: Uuid) -> String {
    let stamp = at.format("%Y%m%d-%H%M%S");
    let hash = &digest(Algorithm::Sha256, payload_path.as_bytes())[..12];
    format!("deletion-{stamp}-{hash}-{}", unique.simple())
}
