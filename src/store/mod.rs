//! Content-addressed local store for recording audio
//!
//! One directory per recording under the store root, holding the audio file
//! and a small `entry.json` metadata sidecar. Writes stream into a `.part`
//! temp file and are published with a single rename, so a concurrent
//! [`ContentStore::lookup`] never observes a half-written file.
//!
//! The store is the deduplication authority: at most one in-flight
//! [`WriteHandle`] exists per recording id at any time, and a Complete entry
//! is immutable.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

use crate::error::{Error, FailureKind, StoreError};
use crate::types::{CacheEntry, CacheStatus, RecordingId};

/// Name of the metadata sidecar inside each entry directory
const META_FILE: &str = "entry.json";

/// Name of the in-progress temp file inside each entry directory
const PART_FILE: &str = "audio.part";

/// Map an HTTP Content-Type to an audio file extension
///
/// Unknown types fall back to `.bin`.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" => ".wav",
        "audio/mpeg" | "audio/mp3" => ".mp3",
        "audio/mp4" | "audio/m4a" => ".m4a",
        "audio/aac" => ".aac",
        "audio/ogg" => ".ogg",
        "audio/flac" => ".flac",
        "audio/webm" => ".webm",
        "audio/3gpp" => ".3gp",
        "audio/amr" => ".amr",
        _ => ".bin",
    }
}

/// Serialized form of a cache entry's metadata sidecar
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct EntryMeta {
    status: CacheStatus,
    size_bytes: u64,
    checksum: String,
    /// Audio file name within the entry directory (empty for failed entries)
    file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_kind: Option<FailureKind>,
}

/// Content-addressed store keyed by recording id
///
/// Cloneable; clones share the same root and in-flight reservation set.
#[derive(Clone)]
pub struct ContentStore {
    root: PathBuf,
    in_flight: Arc<Mutex<HashSet<RecordingId>>>,
}

impl ContentStore {
    /// Open (and create if necessary) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("failed to create store root '{}': {e}", root.display()),
            )
        })?;
        Ok(Self {
            root,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// The store's root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up the on-disk state for a recording
    ///
    /// Pure read; no side effects. Returns `None` when no entry exists.
    /// In-flight (Pending) writes are never visible here: metadata is only
    /// written when an entry reaches Complete or Failed. A Complete entry
    /// whose audio file has gone missing or changed size is treated as
    /// absent so the recording is re-fetched.
    pub async fn lookup(&self, id: &RecordingId) -> Result<Option<CacheEntry>, StoreError> {
        let dir = self.entry_dir(id);
        let meta_path = dir.join(META_FILE);

        let raw = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Io {
                    id: id.to_string(),
                    source: e,
                });
            }
        };

        let meta: EntryMeta =
            serde_json::from_slice(&raw).map_err(|e| StoreError::CorruptMetadata {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        let path = dir.join(&meta.file_name);

        if meta.status == CacheStatus::Complete {
            match tokio::fs::metadata(&path).await {
                Ok(fs_meta) if fs_meta.len() == meta.size_bytes => {}
                Ok(fs_meta) => {
                    tracing::warn!(
                        recording_id = %id,
                        expected = meta.size_bytes,
                        actual = fs_meta.len(),
                        "cached audio file size drifted from metadata, treating entry as absent"
                    );
                    return Ok(None);
                }
                Err(_) => {
                    tracing::warn!(
                        recording_id = %id,
                        path = %path.display(),
                        "cached audio file missing, treating entry as absent"
                    );
                    return Ok(None);
                }
            }
        }

        Ok(Some(CacheEntry {
            id: id.clone(),
            status: meta.status,
            size_bytes: meta.size_bytes,
            checksum: meta.checksum,
            path,
            content_type: meta.content_type,
            failure_kind: meta.failure_kind,
        }))
    }

    /// Begin writing a new entry for `id`
    ///
    /// Fails with [`StoreError::AlreadyInFlight`] if another write for the
    /// same id is active, and with [`StoreError::AlreadyComplete`] if a
    /// Complete entry already exists (Complete entries are never rewritten).
    /// The returned handle owns the reservation; dropping it without
    /// committing releases the reservation and discards partial bytes.
    pub async fn begin_write(&self, id: &RecordingId) -> Result<WriteHandle, StoreError> {
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !in_flight.insert(id.clone()) {
                return Err(StoreError::AlreadyInFlight { id: id.to_string() });
            }
        }

        // Holding the reservation, re-check the published state so a
        // re-listed descriptor can never clobber a Complete entry.
        match self.lookup(id).await {
            Ok(Some(entry)) if entry.status == CacheStatus::Complete => {
                self.release(id);
                return Err(StoreError::AlreadyComplete { id: id.to_string() });
            }
            Ok(_) => {}
            Err(e) => {
                self.release(id);
                return Err(e);
            }
        }

        let dir = self.entry_dir(id);
        let part_path = dir.join(PART_FILE);

        let result: std::io::Result<tokio::fs::File> = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::File::create(&part_path).await
        }
        .await;

        let file = match result {
            Ok(file) => file,
            Err(e) => {
                self.release(id);
                return Err(StoreError::Io {
                    id: id.to_string(),
                    source: e,
                });
            }
        };

        Ok(WriteHandle {
            id: id.clone(),
            entry_dir: dir,
            part_path,
            file: Some(file),
            hasher: Sha256::new(),
            bytes_written: 0,
            content_type: None,
            in_flight: Arc::clone(&self.in_flight),
            finished: false,
        })
    }

    /// Finalize a write: flush, hash, validate and atomically publish
    ///
    /// When the descriptor declared an expected size, a mismatch yields
    /// [`StoreError::SizeMismatch`]; the partial file is discarded and
    /// nothing becomes visible. On success the entry is published Complete
    /// via a single rename of the audio file followed by the metadata
    /// sidecar, so readers see either nothing or the finished entry.
    pub async fn commit(
        &self,
        mut handle: WriteHandle,
        expected_size: Option<u64>,
    ) -> Result<CacheEntry, StoreError> {
        let id = handle.id.clone();

        // Flush and close the part file before any validation
        if let Some(mut file) = handle.file.take() {
            let flushed: std::io::Result<()> = async {
                file.flush().await?;
                file.sync_all().await
            }
            .await;
            if let Err(e) = flushed {
                handle.cleanup();
                return Err(StoreError::Io {
                    id: id.to_string(),
                    source: e,
                });
            }
        }

        if let Some(expected) = expected_size {
            if handle.bytes_written != expected {
                let actual = handle.bytes_written;
                handle.cleanup();
                return Err(StoreError::SizeMismatch {
                    id: id.to_string(),
                    expected,
                    actual,
                });
            }
        }

        let checksum = hex_digest(handle.hasher.clone().finalize().as_slice());
        let extension = handle
            .content_type
            .as_deref()
            .map(extension_for_content_type)
            .unwrap_or(".bin");
        let file_name = format!("audio{extension}");
        let final_path = handle.entry_dir.join(&file_name);

        let meta = EntryMeta {
            status: CacheStatus::Complete,
            size_bytes: handle.bytes_written,
            checksum: checksum.clone(),
            file_name: file_name.clone(),
            content_type: handle.content_type.clone(),
            failure_kind: None,
        };

        let publish: std::io::Result<()> = async {
            tokio::fs::rename(&handle.part_path, &final_path).await?;
            write_meta_atomic(&handle.entry_dir, &meta).await
        }
        .await;

        if let Err(e) = publish {
            handle.cleanup();
            // Best effort: don't leave a published audio file without metadata
            let _ = tokio::fs::remove_file(&final_path).await;
            return Err(StoreError::Io {
                id: id.to_string(),
                source: e,
            });
        }

        let entry = CacheEntry {
            id: id.clone(),
            status: CacheStatus::Complete,
            size_bytes: handle.bytes_written,
            checksum,
            path: final_path,
            content_type: handle.content_type.clone(),
            failure_kind: None,
        };

        handle.finish();
        tracing::debug!(
            recording_id = %id,
            size_bytes = entry.size_bytes,
            "entry committed to store"
        );
        Ok(entry)
    }

    /// Discard a write: remove partial bytes and release the reservation
    ///
    /// Records nothing on disk; use [`ContentStore::record_failure`] when the
    /// attempt should be remembered as permanently failed for this run.
    pub async fn abort(&self, mut handle: WriteHandle) {
        let id = handle.id.clone();
        handle.file.take();
        let _ = tokio::fs::remove_file(&handle.part_path).await;
        handle.finish();
        tracing::debug!(recording_id = %id, "write aborted");
    }

    /// Record a permanently failed acquisition attempt
    ///
    /// Failed entries are not cache hits; the next run will retry them.
    pub async fn record_failure(
        &self,
        id: &RecordingId,
        kind: FailureKind,
    ) -> Result<(), StoreError> {
        let dir = self.entry_dir(id);
        let meta = EntryMeta {
            status: CacheStatus::Failed,
            size_bytes: 0,
            checksum: String::new(),
            file_name: String::new(),
            content_type: None,
            failure_kind: Some(kind),
        };

        let write: std::io::Result<()> = async {
            tokio::fs::create_dir_all(&dir).await?;
            write_meta_atomic(&dir, &meta).await
        }
        .await;

        write.map_err(|e| StoreError::Io {
            id: id.to_string(),
            source: e,
        })
    }

    /// Directory holding one recording's entry
    fn entry_dir(&self, id: &RecordingId) -> PathBuf {
        self.root.join(sanitize_id(id.as_str()))
    }

    fn release(&self, id: &RecordingId) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(id);
    }
}

/// Exclusive append handle for one in-flight entry
///
/// Bytes are hashed incrementally as they are appended, so commit never
/// re-reads the file. Dropping the handle without committing releases the
/// per-id reservation and removes the partial file, which keeps cancelled
/// workers from leaving Pending state behind.
pub struct WriteHandle {
    id: RecordingId,
    entry_dir: PathBuf,
    part_path: PathBuf,
    file: Option<tokio::fs::File>,
    hasher: Sha256,
    bytes_written: u64,
    content_type: Option<String>,
    in_flight: Arc<Mutex<HashSet<RecordingId>>>,
    finished: bool,
}

impl WriteHandle {
    /// The recording this handle writes
    pub fn id(&self) -> &RecordingId {
        &self.id
    }

    /// Bytes appended so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Record the Content-Type reported by the remote; determines the
    /// published file extension
    pub fn set_content_type(&mut self, content_type: &str) {
        self.content_type = Some(content_type.to_string());
    }

    /// Append a chunk of audio bytes
    pub async fn append(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        let file = self.file.as_mut().ok_or_else(|| StoreError::Io {
            id: self.id.to_string(),
            source: std::io::Error::other("write handle already finalized"),
        })?;

        file.write_all(chunk).await.map_err(|e| StoreError::Io {
            id: self.id.to_string(),
            source: e,
        })?;

        self.hasher.update(chunk);
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Release the reservation and stop Drop from cleaning up
    fn finish(&mut self) {
        self.finished = true;
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.id);
    }

    /// Discard the part file and release the reservation (error paths)
    fn cleanup(&mut self) {
        self.file.take();
        let _ = std::fs::remove_file(&self.part_path);
        self.finish();
    }
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.file.take();
            let _ = std::fs::remove_file(&self.part_path);
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            in_flight.remove(&self.id);
        }
    }
}

/// Write the metadata sidecar via temp file + rename
async fn write_meta_atomic(dir: &Path, meta: &EntryMeta) -> std::io::Result<()> {
    let tmp = dir.join(format!("{META_FILE}.tmp"));
    let bytes = serde_json::to_vec_pretty(meta).map_err(std::io::Error::other)?;
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, dir.join(META_FILE)).await
}

/// Replace characters that are unsafe in directory names
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Lowercase hex encoding of a digest
fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}
