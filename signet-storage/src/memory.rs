use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    RwLock,
};

use async_trait::async_trait;

use signet_slo::{errors, Result};

use crate::{
    key::{Key, ListParams, PrivateMaterial},
    KeyRepository, List, PrivateKeyStore, RotationLease,
};

/// In-memory key repository for tests and single-process setups.
#[derive(Debug, Default)]
pub struct MemoryKeyRepository {
    keys: RwLock<HashMap<String, Key>>,
}

impl MemoryKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(key: &Key, opts: &ListParams) -> bool {
        if let Some(status) = opts.status {
            if key.status != status {
                return false;
            }
        }
        if let Some(at) = opts.publishable_at {
            if !key.should_publish(at) {
                return false;
            }
        }
        if let Some(before) = opts.expired_before {
            match key.not_after {
                Some(na) if na < before => {}
                _ => return false,
            }
        }
        true
    }
}

#[async_trait]
impl KeyRepository for MemoryKeyRepository {
    async fn put(&self, key: &Key) -> Result<()> {
        let mut keys = self.keys.write().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        if keys.contains_key(&key.kid) {
            return Err(errors::already_exists(&key.kid));
        }
        keys.insert(key.kid.clone(), key.clone());
        Ok(())
    }

    async fn update(&self, key: &Key) -> Result<()> {
        let mut keys = self.keys.write().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        match keys.get_mut(&key.kid) {
            Some(existing) => {
                *existing = key.clone();
                Ok(())
            }
            None => Err(errors::not_found(&key.kid)),
        }
    }

    async fn get(&self, output: &mut Key) -> Result<()> {
        let keys = self.keys.read().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        match keys.get(&output.kid) {
            Some(key) => {
                *output = key.clone();
                Ok(())
            }
            None => Err(errors::not_found(&output.kid)),
        }
    }

    async fn delete(&self, kid: &str) -> Result<()> {
        let mut keys = self.keys.write().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        keys.remove(kid);
        Ok(())
    }

    async fn list(
        &self,
        opts: &ListParams,
        output: &mut List<Key>,
    ) -> Result<()> {
        let keys = self.keys.read().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        let mut matched: Vec<Key> = keys
            .values()
            .filter(|k| Self::matches(k, opts))
            .cloned()
            .collect();
        // newest first, matching the repository default ordering
        matched.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then(a.kid.cmp(&b.kid))
        });

        output.total = matched.len() as i64;
        output.limit = opts.pagination.limit;
        output.offset = opts.pagination.offset;
        let start = (opts.pagination.offset as usize).min(matched.len());
        let mut page = matched.split_off(start);
        if opts.pagination.limit > 0 {
            page.truncate(opts.pagination.limit as usize);
        }
        output.data = page;
        Ok(())
    }

    async fn count(&self, opts: &ListParams) -> Result<i64> {
        let keys = self.keys.read().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        Ok(keys.values().filter(|k| Self::matches(k, opts)).count() as i64)
    }
}

/// Single-process lease. Acquire flips a flag, release clears it.
#[derive(Debug, Default)]
pub struct MemoryLease {
    held: AtomicBool,
}

impl MemoryLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RotationLease for MemoryLease {
    async fn try_acquire(&self) -> Result<bool> {
        Ok(self
            .held
            .compare_exchange(
                false,
                true,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok())
    }

    async fn release(&self) -> Result<()> {
        self.held.store(false, Ordering::Release);
        Ok(())
    }
}

/// In-memory private key store for tests.
#[derive(Debug, Default)]
pub struct MemoryPrivateKeyStore {
    materials: RwLock<HashMap<String, PrivateMaterial>>,
}

impl MemoryPrivateKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrivateKeyStore for MemoryPrivateKeyStore {
    async fn put(&self, kid: &str, material: &PrivateMaterial) -> Result<()> {
        let mut materials = self.materials.write().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        if materials.contains_key(kid) {
            return Err(errors::already_exists(kid));
        }
        materials.insert(kid.to_owned(), material.clone());
        Ok(())
    }

    async fn get(&self, kid: &str) -> Result<PrivateMaterial> {
        let materials = self.materials.read().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        materials
            .get(kid)
            .cloned()
            .ok_or_else(|| errors::not_found(kid))
    }

    async fn delete(&self, kid: &str) -> Result<()> {
        let mut materials = self.materials.write().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        match materials.remove(kid) {
            Some(_) => Ok(()),
            None => Err(errors::not_found(kid)),
        }
    }

    async fn exists(&self, kid: &str) -> Result<bool> {
        let materials = self.materials.read().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        Ok(materials.contains_key(kid))
    }

    async fn kids(&self) -> Result<Vec<String>> {
        let materials = self.materials.read().map_err(|err| {
            errors::any(std::io::Error::other(err.to_string()))
        })?;
        Ok(materials.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::key::{Algorithm, KeyStatus, PublicJwk};

    use super::*;

    fn key(kid: &str, status: KeyStatus) -> Key {
        Key {
            kid: kid.to_owned(),
            status,
            algorithm: Algorithm::RS256,
            public_jwk: PublicJwk {
                kty: "RSA".to_owned(),
                key_use: "sig".to_owned(),
                alg: "RS256".to_owned(),
                kid: kid.to_owned(),
                n: Some("n".to_owned()),
                e: Some("AQAB".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn repository_crud() {
        let repo = MemoryKeyRepository::new();
        repo.put(&key("k-001", KeyStatus::Active)).await.unwrap();
        assert!(repo
            .put(&key("k-001", KeyStatus::Active))
            .await
            .is_err());

        let mut out = Key {
            kid: "k-001".to_owned(),
            ..Default::default()
        };
        repo.get(&mut out).await.unwrap();
        assert_eq!(out.status, KeyStatus::Active);

        let mut updated = out.clone();
        updated.status = KeyStatus::Grace;
        repo.update(&updated).await.unwrap();
        repo.get(&mut out).await.unwrap();
        assert_eq!(out.status, KeyStatus::Grace);

        assert!(repo
            .update(&key("k-404", KeyStatus::Active))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn list_filters() {
        let now = Utc::now();
        let repo = MemoryKeyRepository::new();
        repo.put(&key("k-001", KeyStatus::Active)).await.unwrap();
        repo.put(&key("k-002", KeyStatus::Grace)).await.unwrap();
        let mut retired = key("k-003", KeyStatus::Retired);
        retired.not_after = Some(now - Duration::hours(1));
        repo.put(&retired).await.unwrap();

        let mut out = List::default();
        repo.list(
            &ListParams {
                publishable_at: Some(now),
                ..Default::default()
            },
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(out.data.len(), 2);

        let mut out = List::default();
        repo.list(
            &ListParams {
                expired_before: Some(now),
                ..Default::default()
            },
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(out.data.len(), 1);
        assert_eq!(out.data[0].kid, "k-003");
    }

    #[tokio::test]
    async fn lease_is_exclusive() {
        let lease = MemoryLease::new();
        assert!(lease.try_acquire().await.unwrap());
        assert!(!lease.try_acquire().await.unwrap());
        lease.release().await.unwrap();
        assert!(lease.try_acquire().await.unwrap());
    }
}
