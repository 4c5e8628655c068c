//! Content-deduplication fingerprint index.
//!
//! Every discovered `(url, title)` pair maps to a short deterministic digest.
//! The index gates ticket creation: a fingerprint that is already present and
//! unexpired means the content was seen before and no new ticket is filed.
//!
//! The concurrent ingest path uses an atomic reservation so at most one
//! ticket is ever created per fingerprint even when the same content is
//! discovered by two workers at once: `reserve` claims the fingerprint under
//! the index lock, the caller files the ticket, then `confirm`s (or
//! `release`s on failure).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use vigil_shared::{ContentFingerprint, DedupConfig, Result, VigilError};

/// Fingerprints are SHA-256 digests truncated to this many hex chars.
const HASH_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Fingerprint computation
// ---------------------------------------------------------------------------

/// Compute the fingerprint digest for a `(url, title)` pair.
///
/// The digest input is `normalize(url) + lowercase(title)`, so trivial URL
/// variations (fragments, trailing slashes) and title casing do not defeat
/// deduplication.
pub fn fingerprint(url: &str, title: &str) -> String {
    let input = format!("{}{}", normalize_url(url), title.to_lowercase());
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..HASH_LEN].to_string()
}

/// Normalize a URL for deduplication (strip fragment and trailing slash;
/// the `url` crate lowercases the host on parse).
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        // Unparseable input still fingerprints deterministically.
        return raw.trim().to_lowercase();
    };
    url.set_fragment(None);
    let mut s = url.to_string();
    // Remove trailing slash for consistency (except root path)
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

// ---------------------------------------------------------------------------
// FingerprintIndex
// ---------------------------------------------------------------------------

/// One stored entry. Reserved entries block duplicates but are dropped from
/// snapshots until confirmed.
#[derive(Debug, Clone)]
struct Entry {
    fp: ContentFingerprint,
    confirmed: bool,
}

/// A fingerprint claimed by `reserve` but not yet confirmed or released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// The claimed fingerprint hash.
    pub hash: String,
}

/// Thread-safe dedup store with time- and count-bounded retention.
///
/// Shared across batch workers; every check-or-claim happens under one
/// mutex, and no lock is held across I/O.
pub struct FingerprintIndex {
    entries: Mutex<HashMap<String, Entry>>,
    retention: Duration,
    max_entries: usize,
    snapshot_path: Option<PathBuf>,
}

impl FingerprintIndex {
    /// Create an index from config, loading the snapshot file if configured
    /// and present.
    pub fn from_config(config: &DedupConfig) -> Result<Self> {
        let snapshot_path = if config.index_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(&config.index_path))
        };

        let index = Self {
            entries: Mutex::new(HashMap::new()),
            retention: Duration::days(config.retention_days),
            max_entries: config.max_entries,
            snapshot_path,
        };

        if let Some(path) = index.snapshot_path.clone() {
            if path.exists() {
                index.load_snapshot(&path)?;
            }
        }

        Ok(index)
    }

    /// In-memory index with explicit bounds (tests, dry runs).
    pub fn in_memory(retention_days: i64, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention: Duration::days(retention_days),
            max_entries,
            snapshot_path: None,
        }
    }

    /// Whether a ticket should be created for this content.
    ///
    /// Non-mutating: calling it twice without an intervening `record`
    /// returns the same answer both times.
    pub fn should_create(&self, url: &str, title: &str) -> bool {
        self.should_create_at(url, title, Utc::now())
    }

    fn should_create_at(&self, url: &str, title: &str, now: DateTime<Utc>) -> bool {
        let hash = fingerprint(url, title);
        let entries = self.lock();
        match entries.get(&hash) {
            Some(entry) => self.is_expired(&entry.fp, now),
            None => true,
        }
    }

    /// Record a fingerprint after its ticket was successfully created.
    ///
    /// Idempotent on the first write: an existing unexpired entry is
    /// returned unchanged (fingerprints are written at most once).
    pub fn record(&self, url: &str, title: &str) -> ContentFingerprint {
        self.record_at(url, title, Utc::now())
    }

    fn record_at(&self, url: &str, title: &str, now: DateTime<Utc>) -> ContentFingerprint {
        let hash = fingerprint(url, title);
        let mut entries = self.lock();

        if let Some(entry) = entries.get_mut(&hash) {
            if !self.is_expired(&entry.fp, now) {
                entry.confirmed = true;
                return entry.fp.clone();
            }
        }

        let fp = ContentFingerprint {
            hash: hash.clone(),
            first_seen: now,
            source_url: url.to_string(),
            normalized_title: title.to_lowercase(),
        };
        entries.insert(
            hash,
            Entry {
                fp: fp.clone(),
                confirmed: true,
            },
        );
        Self::evict(&mut entries, self.retention, self.max_entries, now);
        fp
    }

    /// Atomically claim a fingerprint for ticket creation.
    ///
    /// Returns `None` when the content is already known (or claimed by a
    /// concurrent worker). The caller must `confirm` after the ticket is
    /// created, or `release` if creation fails.
    pub fn reserve(&self, url: &str, title: &str) -> Option<Reservation> {
        let now = Utc::now();
        let hash = fingerprint(url, title);
        let mut entries = self.lock();

        if let Some(entry) = entries.get(&hash) {
            if !self.is_expired(&entry.fp, now) {
                return None;
            }
        }

        entries.insert(
            hash.clone(),
            Entry {
                fp: ContentFingerprint {
                    hash: hash.clone(),
                    first_seen: now,
                    source_url: url.to_string(),
                    normalized_title: title.to_lowercase(),
                },
                confirmed: false,
            },
        );
        Self::evict(&mut entries, self.retention, self.max_entries, now);
        Some(Reservation { hash })
    }

    /// Finalize a reservation after the ticket exists.
    pub fn confirm(&self, reservation: &Reservation) -> Option<ContentFingerprint> {
        let mut entries = self.lock();
        entries.get_mut(&reservation.hash).map(|entry| {
            entry.confirmed = true;
            entry.fp.clone()
        })
    }

    /// Drop a reservation whose ticket creation failed, so the content can
    /// be retried on a later discovery pass.
    pub fn release(&self, reservation: &Reservation) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(&reservation.hash) {
            if !entry.confirmed {
                entries.remove(&reservation.hash);
            }
        }
    }

    /// Number of stored fingerprints (confirmed and reserved).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the index holds no fingerprints.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn is_expired(&self, fp: &ContentFingerprint, now: DateTime<Utc>) -> bool {
        now - fp.first_seen > self.retention
    }

    /// Retention pass: drop expired entries, then oldest-first down to the
    /// count bound. Eviction may drop fingerprints for content still
    /// referenced by an open ticket; the resulting staleness window is an
    /// accepted trade-off.
    fn evict(
        entries: &mut HashMap<String, Entry>,
        retention: Duration,
        max_entries: usize,
        now: DateTime<Utc>,
    ) {
        entries.retain(|_, e| now - e.fp.first_seen <= retention);

        if entries.len() > max_entries {
            let mut by_age: Vec<(String, DateTime<Utc>)> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.fp.first_seen))
                .collect();
            by_age.sort_by_key(|(_, first_seen)| *first_seen);

            let excess = entries.len() - max_entries;
            for (hash, _) in by_age.into_iter().take(excess) {
                debug!(%hash, "evicting fingerprint over count bound");
                entries.remove(&hash);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("fingerprint index mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    // -----------------------------------------------------------------------
    // Snapshot persistence
    // -----------------------------------------------------------------------

    /// Write confirmed fingerprints to the configured snapshot file.
    /// No-op when the index is in-memory only.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let confirmed: Vec<ContentFingerprint> = {
            let entries = self.lock();
            entries
                .values()
                .filter(|e| e.confirmed)
                .map(|e| e.fp.clone())
                .collect()
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VigilError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(&confirmed)
            .map_err(|e| VigilError::validation(format!("snapshot serialize: {e}")))?;
        std::fs::write(path, json).map_err(|e| VigilError::io(path, e))?;

        debug!(count = confirmed.len(), path = %path.display(), "fingerprint snapshot saved");
        Ok(())
    }

    fn load_snapshot(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| VigilError::io(path, e))?;
        let fingerprints: Vec<ContentFingerprint> = serde_json::from_str(&content)
            .map_err(|e| VigilError::validation(format!("invalid snapshot {}: {e}", path.display())))?;

        let now = Utc::now();
        let mut entries = self.lock();
        for fp in fingerprints {
            entries.insert(
                fp.hash.clone(),
                Entry {
                    fp,
                    confirmed: true,
                },
            );
        }
        Self::evict(&mut entries, self.retention, self.max_entries, now);

        debug!(count = entries.len(), "fingerprint snapshot loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_16_hex_chars() {
        let hash = fingerprint("https://x.com/a", "Report A");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_normalizes_url_and_title() {
        let a = fingerprint("https://x.com/a#section", "Report A");
        let b = fingerprint("https://x.com/a", "REPORT A");
        assert_eq!(a, b);

        let c = fingerprint("https://x.com/other", "Report A");
        assert_ne!(a, c);
    }

    #[test]
    fn normalize_strips_trailing_slash_except_root() {
        assert_eq!(
            normalize_url("https://x.com/a/b/"),
            "https://x.com/a/b"
        );
        assert_eq!(normalize_url("https://x.com/"), "https://x.com/");
    }

    #[test]
    fn should_create_is_idempotent_without_record() {
        let index = FingerprintIndex::in_memory(90, 100);
        assert!(index.should_create("https://x.com/a", "Report A"));
        assert!(index.should_create("https://x.com/a", "Report A"));
    }

    #[test]
    fn dedup_scenario_second_check_is_false_after_record() {
        let index = FingerprintIndex::in_memory(90, 100);
        assert!(index.should_create("https://x.com/a", "Report A"));
        index.record("https://x.com/a", "Report A");
        assert!(!index.should_create("https://x.com/a", "Report A"));
    }

    #[test]
    fn record_writes_at_most_once() {
        let index = FingerprintIndex::in_memory(90, 100);
        let first = index.record("https://x.com/a", "Report A");
        let second = index.record("https://x.com/a", "Report A");
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.first_seen, second.first_seen);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn expired_entries_allow_recreation() {
        let index = FingerprintIndex::in_memory(30, 100);
        let old = Utc::now() - Duration::days(31);
        index.record_at("https://x.com/a", "Report A", old);
        assert!(index.should_create("https://x.com/a", "Report A"));
    }

    #[test]
    fn count_bound_evicts_oldest_first() {
        let index = FingerprintIndex::in_memory(365, 2);
        let now = Utc::now();
        index.record_at("https://x.com/1", "One", now - Duration::days(3));
        index.record_at("https://x.com/2", "Two", now - Duration::days(2));
        index.record_at("https://x.com/3", "Three", now - Duration::days(1));

        assert_eq!(index.len(), 2);
        // Oldest entry is gone, so its content is creatable again.
        assert!(index.should_create("https://x.com/1", "One"));
        assert!(!index.should_create("https://x.com/3", "Three"));
    }

    #[test]
    fn reserve_blocks_concurrent_duplicates() {
        let index = FingerprintIndex::in_memory(90, 100);
        let claim = index.reserve("https://x.com/a", "Report A").expect("first claim");
        // Second discovery of the same content while the first is in flight.
        assert!(index.reserve("https://x.com/a", "Report A").is_none());
        assert!(!index.should_create("https://x.com/a", "Report A"));

        index.confirm(&claim);
        assert!(!index.should_create("https://x.com/a", "Report A"));
    }

    #[test]
    fn released_reservation_can_be_retried() {
        let index = FingerprintIndex::in_memory(90, 100);
        let claim = index.reserve("https://x.com/a", "Report A").expect("claim");
        index.release(&claim);
        assert!(index.should_create("https://x.com/a", "Report A"));
        assert!(index.reserve("https://x.com/a", "Report A").is_some());
    }

    #[test]
    fn release_keeps_confirmed_entries() {
        let index = FingerprintIndex::in_memory(90, 100);
        let claim = index.reserve("https://x.com/a", "Report A").expect("claim");
        index.confirm(&claim);
        index.release(&claim);
        assert!(!index.should_create("https://x.com/a", "Report A"));
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fingerprints.json");

        let config = DedupConfig {
            retention_days: 90,
            max_entries: 100,
            index_path: path.to_string_lossy().to_string(),
        };

        let index = FingerprintIndex::from_config(&config).expect("create index");
        index.record("https://x.com/a", "Report A");
        let pending = index.reserve("https://x.com/b", "Report B").expect("claim");
        index.save().expect("save snapshot");
        drop(pending);

        let reloaded = FingerprintIndex::from_config(&config).expect("reload index");
        // Confirmed entry survives; the unconfirmed reservation does not.
        assert!(!reloaded.should_create("https://x.com/a", "Report A"));
        assert!(reloaded.should_create("https://x.com/b", "Report B"));
    }
}
