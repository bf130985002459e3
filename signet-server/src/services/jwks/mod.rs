use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::{watch, RwLock};

use signet_slo::Result;
use signet_storage::{
    key::{Jwks, ListParams},
    KeyRepository, List, Pagination,
};

/// Validators for conditional requests against the published key set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTag {
    /// Strong validator over the serialized document, quoted.
    pub etag: String,
    /// Newest key change, truncated to whole seconds.
    pub last_modified: DateTime<Utc>,
}

impl CacheTag {
    /// True when the request validators still match, i.e. the client's copy
    /// is current and a 304 is in order. `If-None-Match` wins over
    /// `If-Modified-Since` when both are present.
    pub fn matches(
        &self,
        if_none_match: Option<&str>,
        if_modified_since: Option<&str>,
    ) -> bool {
        if let Some(candidates) = if_none_match {
            return candidates
                .split(',')
                .map(str::trim)
                .any(|c| c == "*" || c == self.etag);
        }
        if let Some(since) = if_modified_since {
            if let Ok(since) = DateTime::parse_from_rfc2822(since) {
                return self.last_modified <= since.with_timezone(&Utc);
            }
        }
        false
    }

    pub fn http_date(&self) -> String {
        self.last_modified
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }
}

/// One published rendition of the key set.
#[derive(Debug, Clone)]
pub struct JwksSnapshot {
    pub jwks: Jwks,
    /// The exact bytes served, so the ETag always matches the body.
    pub body: Vec<u8>,
    pub tag: CacheTag,
}

struct CachedEntry {
    snapshot: JwksSnapshot,
    built_at: Instant,
    version: u64,
}

/// Builds the JWKS document from publishable keys, with a short-lived
/// cache. A rotation bumps the watch channel and invalidates the cache
/// before its time-based expiry.
pub struct JwksBuilder<S> {
    repo: S,
    ttl: Duration,
    version: watch::Receiver<u64>,
    cached: RwLock<Option<CachedEntry>>,
}

impl<S> JwksBuilder<S>
where
    S: KeyRepository,
{
    pub fn new(
        repo: S,
        ttl: Duration,
        version: watch::Receiver<u64>,
    ) -> Self {
        Self {
            repo,
            ttl,
            version,
            cached: RwLock::new(None),
        }
    }

    pub async fn build(&self) -> Result<JwksSnapshot> {
        let version = *self.version.borrow();
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.version == version
                    && entry.built_at.elapsed() < self.ttl
                {
                    return Ok(entry.snapshot.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // another task may have rebuilt while we waited for the lock
        if let Some(entry) = cached.as_ref() {
            if entry.version == version && entry.built_at.elapsed() < self.ttl
            {
                return Ok(entry.snapshot.clone());
            }
        }

        let snapshot = self.rebuild().await?;
        *cached = Some(CachedEntry {
            snapshot: snapshot.clone(),
            built_at: Instant::now(),
            version,
        });
        Ok(snapshot)
    }

    async fn rebuild(&self) -> Result<JwksSnapshot> {
        let now = Utc::now();
        let mut output = List::default();
        self.repo
            .list(
                &ListParams {
                    publishable_at: Some(now),
                    pagination: Pagination {
                        limit: 0,
                        order_by: Some("kid".to_owned()),
                        count_disable: true,
                        ..Default::default()
                    },
                    ..Default::default()
                },
                &mut output,
            )
            .await?;

        let last_modified = output
            .data
            .iter()
            .map(|k| k.updated_at)
            .max()
            .unwrap_or(now)
            .with_nanosecond(0)
            .unwrap_or(now);

        // kid order fixes the serialization, so equal key sets hash equal
        let mut keys: Vec<_> =
            output.data.into_iter().map(|k| k.public_jwk).collect();
        keys.sort_by(|a, b| a.kid.cmp(&b.kid));

        let jwks = Jwks { keys };
        let body = serde_json::to_vec(&jwks).map_err(signet_slo::errors::any)?;

        let digest = Sha256::digest(&body);
        let etag = format!(
            "\"{}\"",
            digest[..16]
                .iter()
                .fold(String::with_capacity(32), |mut acc, b| {
                    use std::fmt::Write;
                    let _ = write!(acc, "{b:02x}");
                    acc
                })
        );

        Ok(JwksSnapshot {
            jwks,
            body,
            tag: CacheTag {
                etag,
                last_modified,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use signet_storage::{
        key::{Algorithm, RotationPolicy},
        MemoryKeyRepository, MemoryLease, MemoryPrivateKeyStore,
    };

    use crate::services::key::{KeyManager, KeyRotator};

    use super::*;

    struct Fixture {
        rotator: KeyRotator<
            Arc<MemoryKeyRepository>,
            MemoryPrivateKeyStore,
            MemoryLease,
        >,
        builder: JwksBuilder<Arc<MemoryKeyRepository>>,
    }

    fn fixture(ttl: Duration) -> Fixture {
        let repo = Arc::new(MemoryKeyRepository::new());
        let manager = KeyManager::new(
            Arc::clone(&repo),
            MemoryPrivateKeyStore::new(),
            RotationPolicy::default(),
        )
        .unwrap();
        let rotator = KeyRotator::new(
            manager,
            Arc::new(MemoryLease::new()),
            Algorithm::ES256,
        );
        let builder = JwksBuilder::new(repo, ttl, rotator.subscribe());
        Fixture { rotator, builder }
    }

    #[tokio::test]
    async fn document_is_deterministic_and_sorted() {
        let f = fixture(Duration::ZERO);
        f.rotator.rotate().await.unwrap();
        f.rotator.rotate().await.unwrap();

        let a = f.builder.build().await.unwrap();
        let b = f.builder.build().await.unwrap();
        assert_eq!(a.tag.etag, b.tag.etag);
        assert_eq!(a.body, b.body);

        let kids: Vec<_> =
            a.jwks.keys.iter().map(|k| k.kid.clone()).collect();
        let mut sorted = kids.clone();
        sorted.sort();
        assert_eq!(kids, sorted);
        assert_eq!(a.jwks.keys.len(), 2);
    }

    #[tokio::test]
    async fn rotation_invalidates_the_cache() {
        let f = fixture(Duration::from_secs(3600));
        f.rotator.rotate().await.unwrap();
        let before = f.builder.build().await.unwrap();

        // within ttl the cached rendition is reused
        assert_eq!(
            f.builder.build().await.unwrap().tag.etag,
            before.tag.etag
        );

        f.rotator.rotate().await.unwrap();
        let after = f.builder.build().await.unwrap();
        assert_ne!(before.tag.etag, after.tag.etag);
    }

    #[tokio::test]
    async fn empty_key_set_builds_an_empty_document() {
        let f = fixture(Duration::ZERO);
        let snapshot = f.builder.build().await.unwrap();
        assert!(snapshot.jwks.is_empty());
    }

    #[test]
    fn cache_tag_matching() {
        let tag = CacheTag {
            etag: "\"abc\"".to_owned(),
            last_modified: DateTime::parse_from_rfc2822(
                "Sun, 06 Nov 1994 08:49:37 GMT",
            )
            .unwrap()
            .with_timezone(&Utc),
        };

        assert!(tag.matches(Some("\"abc\""), None));
        assert!(tag.matches(Some("\"other\", \"abc\""), None));
        assert!(tag.matches(Some("*"), None));
        assert!(!tag.matches(Some("\"other\""), None));

        assert!(tag.matches(None, Some("Sun, 06 Nov 1994 08:49:37 GMT")));
        assert!(tag.matches(None, Some("Mon, 07 Nov 1994 00:00:00 GMT")));
        assert!(!tag.matches(None, Some("Sat, 05 Nov 1994 00:00:00 GMT")));
        assert!(!tag.matches(None, Some("not a date")));

        // If-None-Match takes precedence over If-Modified-Since
        assert!(!tag.matches(
            Some("\"other\""),
            Some("Mon, 07 Nov 1994 00:00:00 GMT")
        ));
        assert!(!tag.matches(None, None));
    }
}
