//! Ingest Worker.
//!
//! Polls an external drop — a remote FTP endpoint or a local directory,
//! chosen by `FTP_WATCH_ENABLED` — for companion-checksummed payload pairs,
//! and admits verified payloads into the local store. The two drop modes
//! share every step past "fetch the bytes", so they cannot drift apart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use suppaftp::AsyncFtpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use revelare_common::checksum::{digest, Algorithm};
use revelare_common::metadata::{self, Metadata};
use revelare_common::object_store::{move_into, ObjectStore};
use revelare_common::queue::Queue;
use revelare_common::vessel;

/// One discovered companion pair: a `*.md5` file and its paired payload,
/// plus whatever the drop source needs to retire the source artefacts once
/// `admit` confirms the bytes are durable elsewhere.
struct CompanionPair {
    payload_name: String,
    digest_bytes: Vec<u8>,
    payload_bytes: Vec<u8>,
    origin: Origin,
}

/// Where a `CompanionPair`'s bytes came from, so the source can be retired
/// after a successful admit instead of before.
enum Origin {
    LocalDirectory { digest_path: PathBuf, payload_path: PathBuf },
    Ftp { digest_name: String, payload_name: String },
}

pub enum DropSource {
    LocalDirectory {
        root: PathBuf,
    },
    Ftp {
        host: String,
        port: u16,
        user: String,
        password: String,
        remote_dir: String,
        retry_count: u32,
        retry_delay: Duration,
    },
}

pub struct IngestWorker {
    object_store: ObjectStore,
    validation_queue: Queue,
    drop: DropSource,
}

impl IngestWorker {
    pub fn new(object_store: ObjectStore, validation_queue: Queue, drop: DropSource) -> Self {
        Self {
            object_store,
            validation_queue,
            drop,
        }
    }

    pub async fn tick(&self, cancel: CancellationToken, batch_size: usize) -> Result<(), String> {
        match &self.drop {
            DropSource::LocalDirectory { root } => {
                let pairs = discover_local(root, batch_size).await.map_err(|e| e.to_string())?;
                for pair in pairs {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    if self.admit(&pair).await {
                        retire_local(&pair.origin).await;
                    }
                }
            }
            DropSource::Ftp {
                host,
                port,
                user,
                password,
                remote_dir,
                retry_count,
                retry_delay,
            } => {
                let (mut stream, pairs) = discover_ftp(
                    host,
                    *port,
                    user,
                    password,
                    remote_dir,
                    *retry_count,
                    *retry_delay,
                    batch_size,
                )
                .await
                .map_err(|e| e.to_string())?;

                for pair in pairs {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if self.admit(&pair).await {
                        retire_ftp(&mut stream, &pair.origin).await;
                    }
                }
                let _ = stream.quit().await;
            }
        };

        Ok(())
    }

    /// Verifies the checksum and, if it matches, writes the payload into the
    /// local store and enqueues it for validation. Returns whether both
    /// steps succeeded — the source artefacts are only retired by the
    /// caller when this returns `true`, so a failure here leaves them in
    /// place for the next tick.
    async fn admit(&self, pair: &CompanionPair) -> bool {
        let expected = match std::str::from_utf8(&pair.digest_bytes) {
            Ok(text) => text.split_whitespace().next().unwrap_or("").to_owned(),
            Err(_) => {
                warn!(payload = %pair.payload_name, "companion digest file is not valid utf-8, skipping");
                return false;
            }
        };

        let actual = digest(Algorithm::Md5, &pair.payload_bytes);
        if !actual.eq_ignore_ascii_case(&expected) {
            warn!(
                payload = %pair.payload_name,
                expected = %expected,
                actual = %actual,
                "checksum mismatch on ingest, skipping payload"
            );
            return false;
        }

        let vessel_id = vessel::derive_from_filename(&pair.payload_name);
        let path = format!("{vessel_id}/{}", pair.payload_name);

        let mut object_metadata = Metadata::new();
        object_metadata.insert(metadata::CHECKSUM, actual);
        object_metadata.insert(metadata::CHECKSUM_ALGORITHM, "MD5");
        object_metadata.insert(metadata::VESSEL_ID, &vessel_id);
        object_metadata.insert(metadata::TIMESTAMP, Utc::now().to_rfc3339());

        if let Err(e) = self
            .object_store
            .put(&path, &pair.payload_bytes, object_metadata)
            .await
        {
            warn!(payload = %pair.payload_name, error = %e, "failed to admit payload into local store, will retry next tick");
            return false;
        }

        if let Err(e) = self.validation_queue.enqueue(&path).await {
            warn!(path = %path, error = %e, "admitted payload but failed to enqueue validation message, will retry next tick");
            return false;
        }

        info!(path = %path, vessel_id = %vessel_id, "admitted payload");
        true
    }
}

/// Moves a successfully admitted pair's source files into `processed/`.
/// Only called once `admit` has confirmed the payload is durable in the
/// local store and queued for validation.
async fn retire_local(origin: &Origin) {
    let Origin::LocalDirectory { digest_path, payload_path } = origin else {
        return;
    };
    let processed_dir = digest_path
        .parent()
        .map(|p| p.join("processed"))
        .unwrap_or_else(|| PathBuf::from("processed"));

    if let Err(e) = move_into(digest_path, &processed_dir).await {
        warn!(file = ?digest_path, error = %e, "admitted payload but failed to move digest file to processed");
    }
    if let Err(e) = move_into(payload_path, &processed_dir).await {
        warn!(file = ?payload_path, error = %e, "admitted payload but failed to move payload file to processed");
    }
}

/// Deletes a successfully admitted pair's source files from the FTP drop.
/// Only called once `admit` has confirmed the payload is durable in the
/// local store and queued for validation.
async fn retire_ftp(stream: &mut AsyncFtpStream, origin: &Origin) {
    let Origin::Ftp { digest_name, payload_name } = origin else {
        return;
    };
    if let Err(e) = stream.rm(digest_name).await {
        warn!(file = %digest_name, error = %e, "failed to delete remote digest file after admit");
    }
    if let Err(e) = stream.rm(payload_name).await {
        warn!(file = %payload_name, error = %e, "failed to delete remote payload file after admit");
    }
}

async fn discover_local(root: &Path, batch_size: usize) -> std::io::Result<Vec<CompanionPair>> {
    let mut entries = tokio::fs::read_dir(root).await?;
    let mut found = Vec::new();

    while found.len() < batch_size {
        let Some(entry) = entries.next_entry().await? else {
            break;
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md5") {
            continue;
        }

        let payload_path = path.with_extension("");
        let Some(payload_name) = payload_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if !payload_path.exists() {
            warn!(digest_file = ?path, "companion digest has no paired payload, skipping");
            continue;
        }

        let digest_bytes = tokio::fs::read(&path).await?;
        let payload_bytes = tokio::fs::read(&payload_path).await?;

        found.push(CompanionPair {
            payload_name: payload_name.to_owned(),
            digest_bytes,
            payload_bytes,
            origin: Origin::LocalDirectory {
                digest_path: path,
                payload_path,
            },
        });
    }

    Ok(found)
}

/// Connects, lists, and retrieves up to `batch_size` companion pairs,
/// returning the still-open stream alongside them. The caller deletes each
/// pair's remote files itself, only once `admit` confirms the bytes are
/// durable locally — deletion happens over this same session since the
/// remote directory is keyed off the connection's working directory.
async fn discover_ftp(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    remote_dir: &str,
    retry_count: u32,
    retry_delay: Duration,
    batch_size: usize,
) -> Result<(AsyncFtpStream, Vec<CompanionPair>), String> {
    let mut stream = connect_with_retry(host, port, user, password, retry_count, retry_delay).await?;

    stream
        .cwd(remote_dir)
        .await
        .map_err(|e| format!("failed to cwd to {remote_dir}: {e}"))?;

    let names = stream
        .nlst(None)
        .await
        .map_err(|e| format!("failed to list {remote_dir}: {e}"))?;

    let mut found = Vec::new();
    for name in names {
        if found.len() >= batch_size {
            break;
        }
        if !name.ends_with(".md5") {
            continue;
        }
        let payload_name = name.trim_end_matches(".md5").to_owned();

        let digest_bytes = match stream.retr_as_buffer(&name).await {
            Ok(cursor) => cursor.into_inner(),
            Err(e) => {
                warn!(file = %name, error = %e, "failed to retrieve digest file");
                continue;
            }
        };
        let payload_bytes = match stream.retr_as_buffer(&payload_name).await {
            Ok(cursor) => cursor.into_inner(),
            Err(e) => {
                warn!(file = %payload_name, error = %e, "failed to retrieve payload file");
                continue;
            }
        };

        found.push(CompanionPair {
            payload_name: payload_name.clone(),
            digest_bytes,
            payload_bytes,
            origin: Origin::Ftp {
                digest_name: name,
                payload_name,
            },
        });
    }

    Ok((stream, found))
}

async fn connect_with_retry(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    retry_count: u32,
    retry_delay: Duration,
) -> Result<AsyncFtpStream, String> {
    let addr = format!("{host}:{port}");
    let mut last_error = String::new();

    for attempt in 0..=retry_count {
        match AsyncFtpStream::connect(&addr).await {
            Ok(mut stream) => {
                if let Err(e) = stream.login(user, password).await {
                    last_error = format!("login failed: {e}");
                } else {
                    return Ok(stream);
                }
            }
            Err(e) => last_error = format!("connect failed: {e}"),
        }

        if attempt < retry_count {
            warn!(attempt, error = %last_error, "ftp connection attempt failed, retrying");
            tokio::time::sleep(retry_delay).await;
        }
    }

    Err(format!("exhausted ftp connection retries: {last_error}"))
}
