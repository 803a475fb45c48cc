//! Session Registry & Transfer Service
//!
//! Tracks connected clients, their disambiguated display names, and the
//! image blobs they share. The registry is the single in-memory authority:
//! sessions and blobs live and die with the process, and a session's blobs
//! die with its connection.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::archive::bundle_images;
use crate::error::ShareError;
use crate::score::{MATCH_THRESHOLD, similarity};

/// Separator between the owner and filename halves of a blob key.
pub const KEY_SEPARATOR: &str = "__";

/// Default per-upload byte cap. The transport enforces the same limit as
/// its max message size.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024; // 50MB

/// A live client connection: server-assigned id, disambiguated display
/// name, and the filenames it has shared, in upload order.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: String,
    pub display_name: String,
    pub shared: Vec<String>,
}

/// One search result: a blob key and its 0–100 match score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub key: String,
    pub score: u8,
}

/// Build the blob store key for an owner/filename pair.
pub fn blob_key(owner: &str, filename: &str) -> String {
    format!("{owner}{KEY_SEPARATOR}{filename}")
}

/// Split a blob key back into owner and filename at the FIRST separator.
/// Display names cannot contain the separator (underscore runs are
/// collapsed at connect time), so the first occurrence is the right one.
pub fn split_key(key: &str) -> (&str, &str) {
    key.split_once(KEY_SEPARATOR).unwrap_or(("", key))
}

/// Collapse runs of underscores to a single underscore.
fn collapse_underscores(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        if c == '_' {
            if !prev_underscore {
                out.push(c);
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }
    out
}

#[derive(Default)]
struct RegistryInner {
    /// connection_id -> session
    sessions: HashMap<String, Session>,
    /// `owner__filename` -> raw bytes. Insertion order is observable:
    /// search ties are broken by it.
    blobs: IndexMap<String, Vec<u8>>,
}

/// The process-wide registry. Both maps sit behind one lock: connect,
/// upload and disconnect touch them together and must not interleave.
pub struct ShareRegistry {
    inner: RwLock<RegistryInner>,
    max_upload_bytes: usize,
}

impl Default for ShareRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ShareRegistry {
    pub fn new() -> Self {
        Self::with_upload_cap(DEFAULT_MAX_UPLOAD_BYTES)
    }

    pub fn with_upload_cap(max_upload_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Register a new session. The raw name is normalized (underscore runs
    /// collapsed), then disambiguated against every currently-connected
    /// session with an incrementing numeric suffix: `name`, `name2`, …
    /// Always succeeds; an empty name is as valid as any other.
    pub async fn connect(&self, raw_name: &str) -> Session {
        let base = collapse_underscores(raw_name);
        let mut inner = self.inner.write().await;

        let display_name = {
            let taken: HashSet<&str> = inner
                .sessions
                .values()
                .map(|s| s.display_name.as_str())
                .collect();
            if taken.contains(base.as_str()) {
                let mut n = 2u64;
                loop {
                    let candidate = format!("{base}{n}");
                    if !taken.contains(candidate.as_str()) {
                        break candidate;
                    }
                    n += 1;
                }
            } else {
                base.clone()
            }
        };

        let session = Session {
            connection_id: Uuid::new_v4().to_string(),
            display_name,
            shared: Vec::new(),
        };
        info!(
            "Connected {} as {:?}",
            session.connection_id, session.display_name
        );
        inner
            .sessions
            .insert(session.connection_id.clone(), session.clone());
        session
    }

    /// Store an uploaded payload under `owner__filename`. Re-uploading the
    /// same filename overwrites the previous bytes (last write wins). The
    /// payload is NOT validated as image data; that is the client's job.
    pub async fn upload_image(
        &self,
        connection_id: &str,
        filename: &str,
        payload: Vec<u8>,
    ) -> Result<(), ShareError> {
        if filename.is_empty() || filename.contains(KEY_SEPARATOR) {
            return Err(ShareError::InvalidFilename {
                filename: filename.to_string(),
            });
        }
        if payload.len() > self.max_upload_bytes {
            return Err(ShareError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_upload_bytes,
            });
        }

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let session = inner.sessions.get_mut(connection_id).ok_or_else(|| {
            ShareError::SessionNotFound {
                connection_id: connection_id.to_string(),
            }
        })?;

        let key = blob_key(&session.display_name, filename);
        if !session.shared.iter().any(|f| f == filename) {
            session.shared.push(filename.to_string());
        }
        debug!(
            "Stored {} ({} bytes) for {}",
            key,
            payload.len(),
            session.display_name
        );
        inner.blobs.insert(key, payload);
        Ok(())
    }

    /// Fuzzy-match `query` against every stored key, excluding the caller's
    /// own uploads. Hits scoring below the threshold are dropped; the rest
    /// come back in descending score order, ties in blob insertion order.
    pub async fn search(
        &self,
        connection_id: &str,
        query: &str,
    ) -> Result<Vec<SearchHit>, ShareError> {
        let inner = self.inner.read().await;
        let session =
            inner
                .sessions
                .get(connection_id)
                .ok_or_else(|| ShareError::SessionNotFound {
                    connection_id: connection_id.to_string(),
                })?;

        let own_prefix = format!("{}{}", session.display_name, KEY_SEPARATOR);
        let mut hits: Vec<SearchHit> = inner
            .blobs
            .keys()
            .filter(|key| !key.starts_with(&own_prefix))
            .filter_map(|key| {
                let score = similarity(query, key);
                (score >= MATCH_THRESHOLD).then(|| SearchHit {
                    key: key.clone(),
                    score,
                })
            })
            .collect();
        // Stable sort: equal scores keep insertion order.
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(hits)
    }

    /// Bundle the requested keys into a zip archive (entry path
    /// `owner/filename`). All-or-nothing: any missing key fails the whole
    /// call and no archive is produced.
    pub async fn download_images(
        &self,
        connection_id: &str,
        keys: &[String],
    ) -> Result<Vec<u8>, ShareError> {
        let inner = self.inner.read().await;
        if !inner.sessions.contains_key(connection_id) {
            return Err(ShareError::SessionNotFound {
                connection_id: connection_id.to_string(),
            });
        }

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = inner
                .blobs
                .get(key)
                .ok_or_else(|| ShareError::KeyNotFound { key: key.clone() })?;
            let (owner, filename) = split_key(key);
            entries.push((owner, filename, bytes.as_slice()));
        }
        bundle_images(entries)
    }

    /// Remove a session and purge every blob it owned. Irreversible; a
    /// duplicate teardown (transport races) is a no-op.
    pub async fn disconnect(&self, connection_id: &str) -> Option<Session> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let session = inner.sessions.remove(connection_id)?;

        let prefix = format!("{}{}", session.display_name, KEY_SEPARATOR);
        let before = inner.blobs.len();
        inner.blobs.retain(|key, _| !key.starts_with(&prefix));
        info!(
            "Disconnected {:?}, purged {} blob(s)",
            session.display_name,
            before - inner.blobs.len()
        );
        Some(session)
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn blob_count(&self) -> usize {
        self.inner.read().await.blobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Name disambiguation
    // =========================================================================

    #[tokio::test]
    async fn colliding_names_get_numeric_suffixes() {
        let registry = ShareRegistry::new();
        let first = registry.connect("alice").await;
        let second = registry.connect("alice").await;
        let third = registry.connect("alice").await;

        assert_eq!(first.display_name, "alice");
        assert_eq!(second.display_name, "alice2");
        assert_eq!(third.display_name, "alice3");
    }

    #[tokio::test]
    async fn names_stay_unique_under_collision_storm() {
        let registry = ShareRegistry::new();
        let mut seen = HashSet::new();
        for _ in 0..20 {
            let session = registry.connect("bob").await;
            assert!(seen.insert(session.display_name));
        }
    }

    #[tokio::test]
    async fn underscore_runs_collapse_before_dedup() {
        let registry = ShareRegistry::new();
        let a = registry.connect("a_b").await;
        let b = registry.connect("a__b").await;

        assert_eq!(a.display_name, "a_b");
        // "a__b" normalizes to "a_b", which now collides.
        assert_eq!(b.display_name, "a_b2");
    }

    #[tokio::test]
    async fn display_names_never_contain_the_separator() {
        let registry = ShareRegistry::new();
        let session = registry.connect("we__ird___name").await;
        assert!(!session.display_name.contains(KEY_SEPARATOR));
    }

    #[tokio::test]
    async fn empty_name_is_valid_and_dedupes() {
        let registry = ShareRegistry::new();
        let first = registry.connect("").await;
        let second = registry.connect("").await;

        assert_eq!(first.display_name, "");
        assert_eq!(second.display_name, "2");
    }

    #[tokio::test]
    async fn freed_names_are_reusable_after_disconnect() {
        let registry = ShareRegistry::new();
        let first = registry.connect("carol").await;
        registry.disconnect(&first.connection_id).await;

        let second = registry.connect("carol").await;
        assert_eq!(second.display_name, "carol");
    }

    // =========================================================================
    // Upload
    // =========================================================================

    #[tokio::test]
    async fn upload_requires_a_live_session() {
        let registry = ShareRegistry::new();
        let err = registry
            .upload_image("no-such-id", "cat.png", vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn upload_rejects_separator_in_filename() {
        let registry = ShareRegistry::new();
        let session = registry.connect("alice").await;
        let err = registry
            .upload_image(&session.connection_id, "sneaky__name.png", vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::InvalidFilename { .. }));
    }

    #[tokio::test]
    async fn upload_rejects_empty_filename() {
        let registry = ShareRegistry::new();
        let session = registry.connect("alice").await;
        let err = registry
            .upload_image(&session.connection_id, "", vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::InvalidFilename { .. }));
    }

    #[tokio::test]
    async fn upload_enforces_the_byte_cap() {
        let registry = ShareRegistry::with_upload_cap(8);
        let session = registry.connect("alice").await;
        let err = registry
            .upload_image(&session.connection_id, "big.png", vec![0; 9])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShareError::PayloadTooLarge { size: 9, max: 8 }
        ));
    }

    #[tokio::test]
    async fn reupload_overwrites_without_duplicating_shared_list() {
        let registry = ShareRegistry::new();
        let session = registry.connect("alice").await;
        registry
            .upload_image(&session.connection_id, "cat.png", b"old".to_vec())
            .await
            .unwrap();
        registry
            .upload_image(&session.connection_id, "cat.png", b"new".to_vec())
            .await
            .unwrap();

        assert_eq!(registry.blob_count().await, 1);

        // A second viewer downloads and sees only the latest bytes.
        let viewer = registry.connect("bob").await;
        let archive = registry
            .download_images(&viewer.connection_id, &["alice__cat.png".to_string()])
            .await
            .unwrap();
        let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut zip.by_name("alice/cat.png").unwrap(), &mut buf).unwrap();
        assert_eq!(buf, b"new");
    }

    // =========================================================================
    // Search
    // =========================================================================

    #[tokio::test]
    async fn search_excludes_own_uploads_even_on_exact_match() {
        let registry = ShareRegistry::new();
        let alice = registry.connect("alice").await;
        registry
            .upload_image(&alice.connection_id, "cat.png", vec![1])
            .await
            .unwrap();

        let hits = registry
            .search(&alice.connection_id, "alice__cat.png")
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_ranks_by_descending_score() {
        let registry = ShareRegistry::new();
        let alice = registry.connect("alice").await;
        registry
            .upload_image(&alice.connection_id, "sunset.jpg", vec![1])
            .await
            .unwrap();
        registry
            .upload_image(&alice.connection_id, "cat.png", vec![2])
            .await
            .unwrap();

        let bob = registry.connect("bob").await;
        let hits = registry
            .search(&bob.connection_id, "alice__cat.png")
            .await
            .unwrap();
        assert_eq!(hits[0].key, "alice__cat.png");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn search_ties_keep_blob_insertion_order() {
        let registry = ShareRegistry::new();
        let bob = registry.connect("bob").await;
        let cal = registry.connect("cal").await;
        registry
            .upload_image(&bob.connection_id, "cat.png", vec![1])
            .await
            .unwrap();
        registry
            .upload_image(&cal.connection_id, "cat.png", vec![2])
            .await
            .unwrap();

        let viewer = registry.connect("dora").await;
        let hits = registry.search(&viewer.connection_id, "cat").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].score, hits[1].score);
        assert_eq!(hits[0].key, "bob__cat.png");
        assert_eq!(hits[1].key, "cal__cat.png");
    }

    #[tokio::test]
    async fn search_with_no_matches_is_empty_not_an_error() {
        let registry = ShareRegistry::new();
        let session = registry.connect("alice").await;
        let hits = registry
            .search(&session.connection_id, "anything")
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_requires_a_live_session() {
        let registry = ShareRegistry::new();
        let err = registry.search("no-such-id", "cat").await.unwrap_err();
        assert!(matches!(err, ShareError::SessionNotFound { .. }));
    }

    // =========================================================================
    // Download
    // =========================================================================

    #[tokio::test]
    async fn upload_then_download_roundtrips_the_bytes() {
        let registry = ShareRegistry::new();
        let alice = registry.connect("alice").await;
        registry
            .upload_image(&alice.connection_id, "cat.png", b"meow-bytes".to_vec())
            .await
            .unwrap();

        let bob = registry.connect("bob").await;
        let archive = registry
            .download_images(&bob.connection_id, &["alice__cat.png".to_string()])
            .await
            .unwrap();

        let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
        assert_eq!(zip.len(), 1);
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut zip.by_name("alice/cat.png").unwrap(), &mut buf).unwrap();
        assert_eq!(buf, b"meow-bytes");
    }

    #[tokio::test]
    async fn download_missing_key_fails_whole_request() {
        let registry = ShareRegistry::new();
        let alice = registry.connect("alice").await;
        registry
            .upload_image(&alice.connection_id, "cat.png", vec![1])
            .await
            .unwrap();

        let bob = registry.connect("bob").await;
        let err = registry
            .download_images(
                &bob.connection_id,
                &[
                    "alice__cat.png".to_string(),
                    "nonexistent__key".to_string(),
                ],
            )
            .await
            .unwrap_err();
        match err {
            ShareError::KeyNotFound { key } => assert_eq!(key, "nonexistent__key"),
            other => panic!("expected KeyNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_requires_a_live_session() {
        let registry = ShareRegistry::new();
        let err = registry
            .download_images("no-such-id", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::SessionNotFound { .. }));
    }

    // =========================================================================
    // Disconnect
    // =========================================================================

    #[tokio::test]
    async fn disconnect_purges_owned_blobs() {
        let registry = ShareRegistry::new();
        let alice = registry.connect("alice").await;
        registry
            .upload_image(&alice.connection_id, "cat.png", vec![1])
            .await
            .unwrap();
        registry
            .upload_image(&alice.connection_id, "dog.png", vec![2])
            .await
            .unwrap();

        registry.disconnect(&alice.connection_id).await;
        assert_eq!(registry.blob_count().await, 0);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn disconnect_leaves_other_owners_blobs_alone() {
        let registry = ShareRegistry::new();
        let alice = registry.connect("alice").await;
        let bob = registry.connect("bob").await;
        registry
            .upload_image(&alice.connection_id, "cat.png", vec![1])
            .await
            .unwrap();
        registry
            .upload_image(&bob.connection_id, "dog.png", vec![2])
            .await
            .unwrap();

        registry.disconnect(&alice.connection_id).await;
        assert_eq!(registry.blob_count().await, 1);

        let carol = registry.connect("carol").await;
        let hits = registry.search(&carol.connection_id, "dog").await.unwrap();
        assert_eq!(hits[0].key, "bob__dog.png");
    }

    #[tokio::test]
    async fn duplicate_disconnect_is_a_noop() {
        let registry = ShareRegistry::new();
        let session = registry.connect("alice").await;
        assert!(registry.disconnect(&session.connection_id).await.is_some());
        assert!(registry.disconnect(&session.connection_id).await.is_none());
    }

    // =========================================================================
    // Key helpers
    // =========================================================================

    #[test]
    fn split_key_at_first_separator() {
        assert_eq!(split_key("alice__cat.png"), ("alice", "cat.png"));
        assert_eq!(blob_key("alice", "cat.png"), "alice__cat.png");
    }

    #[test]
    fn collapse_underscores_folds_runs() {
        assert_eq!(collapse_underscores("a__b___c"), "a_b_c");
        assert_eq!(collapse_underscores("plain"), "plain");
        assert_eq!(collapse_underscores("____"), "_");
    }
}
