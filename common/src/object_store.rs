//! # Object Store Gateway
//!
//! Payload bytes live on a local filesystem root, one file per object,
//! named after its vessel-prefixed path. Per-object metadata lives in a
//! Postgres table keyed by the same path, so `put`/`setMetadata` are
//! single-row transactional writes: the payload is crash-safe the moment
//! `put` returns, because the metadata row is what the rest of the
//! pipeline treats as authoritative.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::fs;
use tokio::io::AsyncRead;

use crate::error::GatewayError;
use crate::metadata::Metadata;

/// One row of a `list` response.
pub struct ListedObject {
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: Metadata,
}

/// The local Object Store Gateway.
#[derive(Clone)]
pub struct ObjectStore {
    pool: PgPool,
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(pool: PgPool, root: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            root: root.into(),
        }
    }

    fn file_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Atomic create-or-overwrite of payload bytes and their full metadata
    /// set. Bytes are written to a temporary file and renamed into place
    /// before the metadata row is committed, so a crash between the two
    /// steps leaves either nothing visible or a fully-formed object.
    pub async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        metadata: Metadata,
    ) -> Result<(), GatewayError> {
        let dest = self.file_path(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = dest.with_extension("tmp-upload");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &dest).await?;

        let metadata_json = serde_json::to_value(&metadata)
            .map_err(|e| GatewayError::Other(format!("failed to encode metadata: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO payload_objects (path, metadata, last_modified)
            VALUES ($1, $2, NOW())
            ON CONFLICT (path) DO UPDATE SET metadata = $2, last_modified = NOW()
            "#,
        )
        .bind(path)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch the current bytes and metadata for `path`.
    pub async fn get(&self, path: &str) -> Result<(Vec<u8>, Metadata), GatewayError> {
        let metadata = self.head_metadata(path).await?;
        let bytes = fs::read(self.file_path(path))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    GatewayError::NotFound(format!("{path} has metadata but no bytes on disk"))
                }
                _ => GatewayError::from(e),
            })?;
        Ok((bytes, metadata))
    }

    /// Open payload bytes for streaming without buffering the whole object.
    pub async fn open(&self, path: &str) -> Result<impl AsyncRead, GatewayError> {
        let file = fs::File::open(self.file_path(path))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    GatewayError::NotFound(format!("{path} not found"))
                }
                _ => GatewayError::from(e),
            })?;
        Ok(file)
    }

    /// Cheap metadata-only fetch.
    pub async fn head_metadata(&self, path: &str) -> Result<Metadata, GatewayError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT metadata FROM payload_objects WHERE path = $1")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;

        let (value,) = row.ok_or_else(|| GatewayError::NotFound(path.to_owned()))?;
        serde_json::from_value(value)
            .map_err(|e| GatewayError::Other(format!("corrupt metadata for {path}: {e}")))
    }

    /// Replace the full metadata map for `path`. Fails with `NotFound` if
    /// the object does not exist.
    pub async fn set_metadata(&self, path: &str, metadata: Metadata) -> Result<(), GatewayError> {
        let metadata_json = serde_json::to_value(&metadata)
            .map_err(|e| GatewayError::Other(format!("failed to encode metadata: {e}")))?;

        let result = sqlx::query(
            "UPDATE payload_objects SET metadata = $2, last_modified = NOW() WHERE path = $1",
        )
        .bind(path)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(path.to_owned()));
        }
        Ok(())
    }

    /// List every object whose path starts with `prefix`.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ListedObject>, GatewayError> {
        let like_pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));

        let rows: Vec<(String, DateTime<Utc>, serde_json::Value)> = sqlx::query_as(
            "SELECT path, last_modified, metadata FROM payload_objects WHERE path LIKE $1",
        )
        .bind(like_pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(path, last_modified, value)| {
                let metadata: Metadata = serde_json::from_value(value)
                    .map_err(|e| GatewayError::Other(format!("corrupt metadata for {path}: {e}")))?;
                Ok(ListedObject {
                    path,
                    last_modified,
                    metadata,
                })
            })
            .collect()
    }

    /// Delete the payload's bytes and metadata row. Idempotent: deleting an
    /// already-absent object is not an error, since the Cleanup Worker may
    /// retry a delete whose queue acknowledgement was lost.
    pub async fn delete(&self, path: &str) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM payload_objects WHERE path = $1")
            .bind(path)
            .execute(&self.pool)
            .await?;

        match fs::remove_file(self.file_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GatewayError::from(e)),
        }
    }
}

/// Move `source` into `dest_dir`, creating it if needed. Used by the
/// Ingest Worker to relocate processed companion/payload files.
pub async fn move_into(source: &Path, dest_dir: &Path) -> Result<(), GatewayError> {
    fs::create_dir_all(dest_dir).await?;
    let file_name = source
        .file_name()
        .ok_or_else(|| GatewayError::Other(format!("{source:?} has no file name")))?;
    fs::rename(source, dest_dir.join(file_name)).await?;
    Ok(())
}

#[cfg(test)]
#[allow(unused_imports)]
mod tests {
    use super::*;
    use sqlx::PgPool;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn store(db: PgPool, root: &TempDir) -> ObjectStore {
        ObjectStore::new(db, root.path().to_path_buf())
    }

    fn metadata_with_vessel(vessel_id: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(crate::metadata::VESSEL_ID, vessel_id);
        metadata
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn put_then_get_round_trips_bytes_and_metadata(db: PgPool) {
        let root = TempDir::new().unwrap();
        let store = store(db, &root);
        let metadata = metadata_with_vessel("EKI0007");

        store
            .put("EKI0007/data_20250101_1.bin", b"hello", metadata.clone())
            .await
            .unwrap();

        let (bytes, got_metadata) = store.get("EKI0007/data_20250101_1.bin").await.unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(got_metadata, metadata);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn put_overwrites_existing_object(db: PgPool) {
        let root = TempDir::new().unwrap();
        let store = store(db, &root);

        store
            .put("EKI0007/data_20250101_1.bin", b"first", Metadata::new())
            .await
            .unwrap();
        store
            .put("EKI0007/data_20250101_1.bin", b"second", Metadata::new())
            .await
            .unwrap();

        let (bytes, _) = store.get("EKI0007/data_20250101_1.bin").await.unwrap();
        assert_eq!(bytes, b"second");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn get_missing_object_is_not_found(db: PgPool) {
        let root = TempDir::new().unwrap();
        let store = store(db, &root);

        let result = store.get("EKI0007/missing.bin").await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn open_streams_the_same_bytes_as_get(db: PgPool) {
        let root = TempDir::new().unwrap();
        let store = store(db, &root);

        store
            .put("EKI0007/data_20250101_1.bin", b"streamed", Metadata::new())
            .await
            .unwrap();

        let mut reader = store.open("EKI0007/data_20250101_1.bin").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"streamed");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn set_metadata_requires_existing_object(db: PgPool) {
        let root = TempDir::new().unwrap();
        let store = store(db, &root);

        let result = store
            .set_metadata("EKI0007/missing.bin", Metadata::new())
            .await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn set_metadata_replaces_the_full_map(db: PgPool) {
        let root = TempDir::new().unwrap();
        let store = store(db, &root);

        store
            .put(
                "EKI0007/data_20250101_1.bin",
                b"hello",
                metadata_with_vessel("EKI0007"),
            )
            .await
            .unwrap();

        let mut replacement = Metadata::new();
        replacement.insert(crate::metadata::VALIDATION_STATUS, "valid");
        store
            .set_metadata("EKI0007/data_20250101_1.bin", replacement.clone())
            .await
            .unwrap();

        let got = store.head_metadata("EKI0007/data_20250101_1.bin").await.unwrap();
        assert_eq!(got, replacement);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn list_filters_by_prefix(db: PgPool) {
        let root = TempDir::new().unwrap();
        let store = store(db, &root);

        store
            .put("EKI0007/data_20250101_1.bin", b"a", Metadata::new())
            .await
            .unwrap();
        store
            .put("EKI0007/data_20250101_2.bin", b"b", Metadata::new())
            .await
            .unwrap();
        store
            .put("MVABC123/data_20250101_1.bin", b"c", Metadata::new())
            .await
            .unwrap();

        let listed = store.list("EKI0007/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|o| o.path.starts_with("EKI0007/")));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn list_prefix_does_not_match_sql_wildcards_literally(db: PgPool) {
        let root = TempDir::new().unwrap();
        let store = store(db, &root);

        store
            .put("EKI0007/data_20250101_1.bin", b"a", Metadata::new())
            .await
            .unwrap();

        let listed = store.list("EKI_007/").await.unwrap();
        assert!(listed.is_empty(), "underscore in prefix matched as a SQL wildcard");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn delete_removes_bytes_and_metadata(db: PgPool) {
        let root = TempDir::new().unwrap();
        let store = store(db, &root);

        store
            .put("EKI0007/data_20250101_1.bin", b"hello", Metadata::new())
            .await
            .unwrap();
        store.delete("EKI0007/data_20250101_1.bin").await.unwrap();

        let result = store.get("EKI0007/data_20250101_1.bin").await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn delete_is_idempotent_on_already_absent_object(db: PgPool) {
        let root = TempDir::new().unwrap();
        let store = store(db, &root);

        store.delete("EKI0007/never-existed.bin").await.unwrap();
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn move_into_relocates_the_file(db: PgPool) {
        let _ = db;
        let source_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let source_path = source_dir.path().join("data_20250101_1.bin");
        fs::write(&source_path, b"hello").await.unwrap();

        move_into(&source_path, dest_dir.path()).await.unwrap();

        assert!(!source_path.exists());
        assert!(dest_dir.path().join("data_20250101_1.bin").exists());
    }
}
