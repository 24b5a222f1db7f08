use crate::error::RecallError;
use crate::recall::extract::{ExtractOptions, UNKNOWN_SESSION_ID};
use crate::recall::normalize::{NormalizedSession, parse_session};
use crate::recall::paths::RecallPaths;
use crate::recall::source::SessionSource;
use crate::recall::util::now_epoch_secs;
use crate::recall::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// One persisted session: the normalized record plus change-detection data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    #[serde(flatten)]
    pub session: NormalizedSession,
    pub source: String,
    pub source_ref: String,
    pub content_hash: String,
    pub synced_at_epoch_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

/// Exclusive lock on the store, released on drop.
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn content_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_paths(paths: &RecallPaths) -> Self {
        Self::new(&paths.store_dir)
    }

    pub fn records_path(&self) -> PathBuf {
        self.dir.join("sessions.jsonl")
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join("sessions.lock")
    }

    pub fn lock(&self) -> Result<StoreLock> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.try_lock_exclusive()
            .map_err(|_| RecallError::StoreLocked(path.display().to_string()))?;
        Ok(StoreLock { file })
    }

    pub fn load(&self) -> Result<Vec<StoredSession>> {
        let path = self.records_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut out = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: StoredSession = serde_json::from_str(trimmed).with_context(|| {
                format!("failed to parse line {} of {}", idx + 1, path.display())
            })?;
            out.push(record);
        }
        Ok(out)
    }

    /// Replace the store contents atomically.
    pub fn save(&self, records: &[StoredSession]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.records_path();
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("failed to create temp file in {}", self.dir.display()))?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(tmp, "{line}")?;
        }
        tmp.flush()?;
        tmp.persist(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncCounts {
    pub synced: usize,
    pub unchanged: usize,
    pub empty: usize,
    pub failed: usize,
    /// Stored records dropped because their source now parses to nothing.
    pub removed: usize,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub counts: SyncCounts,
    pub total_records: usize,
    pub records_path: PathBuf,
    pub written: bool,
}

fn sync_failed(code: &str, action: &str, source: &str, session: &str, err: &anyhow::Error) {
    warn::emit(WarnEvent {
        code,
        stage: "sync",
        action,
        session,
        source,
        retry: "next-sync",
        reason: "session-skipped",
        err: &format!("{err:#}"),
    });
}

/// Records are keyed by session id. A session that only has the placeholder
/// id is keyed by its source reference so unrelated transcripts never
/// replace each other.
fn record_key(record: &StoredSession) -> String {
    if record.session.id == UNKNOWN_SESSION_ID {
        format!("{}:{}", record.source, record.source_ref)
    } else {
        record.session.id.clone()
    }
}

fn remove_source_ref(
    records: &mut BTreeMap<String, StoredSession>,
    source: &str,
    source_ref: &str,
) -> bool {
    let before = records.len();
    records.retain(|_, existing| existing.source != source || existing.source_ref != source_ref);
    records.len() != before
}

fn upsert(records: &mut BTreeMap<String, StoredSession>, record: StoredSession) {
    remove_source_ref(records, &record.source, &record.source_ref);
    records.insert(record_key(&record), record);
}

/// Pull every session from `sources` into the store. A blob whose hash
/// matches the stored hash for the same source reference is left alone
/// unless `force` is set.
pub fn sync(
    store: &SessionStore,
    sources: &[Box<dyn SessionSource>],
    extract: &ExtractOptions,
    opts: SyncOptions,
) -> Result<SyncOutcome> {
    let _lock = if opts.dry_run {
        None
    } else {
        Some(store.lock()?)
    };

    let mut records: BTreeMap<String, StoredSession> = store
        .load()?
        .into_iter()
        .map(|record| (record_key(&record), record))
        .collect();
    let known_hashes: HashMap<(String, String), String> = records
        .values()
        .map(|r| ((r.source.clone(), r.source_ref.clone()), r.content_hash.clone()))
        .collect();

    let synced_at = now_epoch_secs()?;
    let mut counts = SyncCounts::default();

    for source in sources {
        let ids = match source.enumerate() {
            Ok(ids) => ids,
            Err(err) => {
                counts.failed += 1;
                sync_failed("ENUMERATE_FAILED", "enumerate-sessions", source.name(), "", &err);
                continue;
            }
        };

        for id in ids {
            let raw = match source.fetch(&id) {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    counts.empty += 1;
                    continue;
                }
                Err(err) => {
                    counts.failed += 1;
                    sync_failed("FETCH_FAILED", "fetch-session", source.name(), &id, &err);
                    continue;
                }
            };

            let hash = content_hash(&raw);
            let key = (source.name().to_string(), id.clone());
            if !opts.force && known_hashes.get(&key) == Some(&hash) {
                counts.unchanged += 1;
                continue;
            }

            let Some(session) = parse_session(&id, &raw, extract) else {
                counts.empty += 1;
                if remove_source_ref(&mut records, &key.0, &key.1) {
                    counts.removed += 1;
                }
                continue;
            };
            upsert(
                &mut records,
                StoredSession {
                    session,
                    source: key.0,
                    source_ref: key.1,
                    content_hash: hash,
                    synced_at_epoch_secs: synced_at,
                },
            );
            counts.synced += 1;
        }
    }

    let records: Vec<StoredSession> = records.into_values().collect();
    let written = !opts.dry_run && (counts.synced > 0 || counts.removed > 0);
    if written {
        store.save(&records)?;
    }

    Ok(SyncOutcome {
        counts,
        total_records: records.len(),
        records_path: store.records_path(),
        written,
    })
}
