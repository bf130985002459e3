use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use signet_slo::{errors, Result};
use signet_storage::{
    key::{Algorithm, KeyStatus, ListParams},
    KeyRepository, List, Pagination, PrivateKeyStore, RotationLease,
};

use super::KeyManager;
use crate::var::KEY_ROTATIONS_TOTAL;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    utoipa::ToSchema,
)]
pub struct RotationOutcome {
    pub rotated: bool,
    pub graced: usize,
    pub retired: usize,
    pub removed: usize,
    pub repaired: usize,
}

/// Runs the rotation workflow under an exclusive lease.
///
/// Exactly one holder rotates at a time; contenders get
/// `RotationInProgress` instead of blocking. Every completed pass bumps the
/// watch channel so caches rebuild.
pub struct KeyRotator<S, P, L> {
    manager: KeyManager<S, P>,
    lease: Arc<L>,
    algorithm: Algorithm,
    notifier: watch::Sender<u64>,
}

impl<S, P, L> KeyRotator<S, P, L>
where
    S: KeyRepository,
    P: PrivateKeyStore,
    L: RotationLease,
{
    pub fn new(
        manager: KeyManager<S, P>,
        lease: Arc<L>,
        algorithm: Algorithm,
    ) -> Self {
        let (notifier, _) = watch::channel(0);
        Self {
            manager,
            lease,
            algorithm,
            notifier,
        }
    }

    /// Receiver for cache invalidation; the value bumps after each pass
    /// that changed the key set.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }

    /// Forces a rotation now. `RotationInProgress` if another holder has
    /// the lease.
    pub async fn rotate(&self) -> Result<RotationOutcome> {
        if !self.lease.try_acquire().await? {
            return Err(errors::rotation_in_progress());
        }
        let result = self.run(true).await;
        self.lease.release().await?;
        self.finish(result)
    }

    /// Background pass: rotates when the newest active key is due,
    /// otherwise only sweeps grace and expired keys. A busy lease is not an
    /// error here, another instance is already on it.
    pub async fn maintain(&self) -> Result<RotationOutcome> {
        if !self.lease.try_acquire().await? {
            debug!("rotation lease is held elsewhere, skipping pass");
            return Ok(RotationOutcome::default());
        }
        let due = match self.should_rotate().await {
            Ok(due) => due,
            Err(err) => {
                self.lease.release().await?;
                return Err(err);
            }
        };
        let result = self.run(due).await;
        self.lease.release().await?;
        self.finish(result)
    }

    fn finish(
        &self,
        result: Result<RotationOutcome>,
    ) -> Result<RotationOutcome> {
        if let Ok(outcome) = &result {
            if outcome.rotated {
                KEY_ROTATIONS_TOTAL.inc();
            }
            if *outcome != RotationOutcome::default() {
                self.notifier.send_modify(|v| *v += 1);
            }
        }
        result
    }

    /// True when there is no active key or the newest one has outlived the
    /// rotation interval.
    pub async fn should_rotate(&self) -> Result<bool> {
        let actives = self.manager.active_keys().await?;
        let now = Utc::now();
        match actives.first() {
            Some(newest) => Ok(newest.created_at
                + Duration::seconds(self.manager.policy().rotation_interval)
                <= now),
            None => Ok(true),
        }
    }

    async fn run(&self, rotate: bool) -> Result<RotationOutcome> {
        let mut outcome = RotationOutcome::default();
        let now = Utc::now();

        if rotate {
            let previous = self.manager.active_keys().await?;
            let created = self.manager.create_key(self.algorithm).await?;
            info!("rotated in new signing key {}", created.kid);
            outcome.rotated = true;

            for old in &previous {
                self.demote(&old.kid).await?;
                outcome.graced += 1;
            }
        }

        // grace keys whose period has elapsed stop verifying
        let grace_deadline =
            now - Duration::seconds(self.manager.policy().grace_period);
        let mut graced = List::default();
        self.manager
            .list_keys(
                &ListParams {
                    status: Some(KeyStatus::Grace),
                    pagination: all_newest_first(),
                    ..Default::default()
                },
                &mut graced,
            )
            .await?;
        for key in &graced.data {
            if key.updated_at <= grace_deadline {
                self.manager.retire(&key.kid).await?;
                outcome.retired += 1;
            }
        }

        // cap active plus grace; the oldest grace keys retire first
        let actives = self.manager.active_keys().await?;
        let mut verifying = List::default();
        self.manager
            .list_keys(
                &ListParams {
                    status: Some(KeyStatus::Grace),
                    pagination: all_newest_first(),
                    ..Default::default()
                },
                &mut verifying,
            )
            .await?;
        let max = self.manager.policy().max_keys_in_jwks;
        let excess = (actives.len() + verifying.data.len()).saturating_sub(max);
        for key in verifying.data.iter().rev().take(excess) {
            self.manager.retire(&key.kid).await?;
            outcome.retired += 1;
        }

        outcome.removed = self.manager.cleanup_expired(now).await?;
        outcome.repaired = self.manager.sweep().await?;
        Ok(outcome)
    }

    /// Demotes a freshly superseded key, retrying transient failures.
    /// Leaving the old key active would break the single-active invariant,
    /// so surrendering too early is worse than a few extra attempts.
    async fn demote(&self, kid: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.manager.enter_grace(kid).await {
                Ok(_) => return Ok(()),
                // someone else already demoted it, nothing left to do
                Err(err)
                    if matches!(
                        err.kind(),
                        errors::Code::InvalidTransition(_)
                    ) =>
                {
                    return Ok(());
                }
                Err(err) if attempt < 2 => {
                    attempt += 1;
                    warn!(
                        "demoting {} failed (attempt {}): {}",
                        kid, attempt, err
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(
                        100 * attempt,
                    ))
                    .await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn all_newest_first() -> Pagination {
    Pagination {
        limit: 0,
        order_by: Some("created_at DESC".to_owned()),
        count_disable: true,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use signet_storage::{
        MemoryKeyRepository, MemoryLease, MemoryPrivateKeyStore,
    };

    use signet_storage::key::RotationPolicy;

    use super::*;

    fn rotator() -> KeyRotator<
        MemoryKeyRepository,
        MemoryPrivateKeyStore,
        MemoryLease,
    > {
        let manager = KeyManager::new(
            MemoryKeyRepository::new(),
            MemoryPrivateKeyStore::new(),
            RotationPolicy {
                rotation_interval: 3600,
                grace_period: 600,
                max_keys_in_jwks: 2,
            },
        )
        .unwrap();
        KeyRotator::new(manager, Arc::new(MemoryLease::new()), Algorithm::ES256)
    }

    #[tokio::test]
    async fn first_rotation_bootstraps_an_active_key() {
        let r = rotator();
        let outcome = r.maintain().await.unwrap();
        assert!(outcome.rotated);
        assert!(r.manager.get_active_key().await.is_ok());
    }

    #[tokio::test]
    async fn rotation_keeps_previous_key_verifying() {
        let r = rotator();
        r.rotate().await.unwrap();
        let first = r.manager.get_active_key().await.unwrap();

        let outcome = r.rotate().await.unwrap();
        assert!(outcome.rotated);
        assert_eq!(outcome.graced, 1);

        let second = r.manager.get_active_key().await.unwrap();
        assert_ne!(first.kid, second.kid);

        let old = r.manager.get_key(&first.kid).await.unwrap();
        assert_eq!(old.status, KeyStatus::Grace);
        assert!(old.can_verify(Utc::now()));
    }

    #[tokio::test]
    async fn rotation_caps_active_and_grace_keys() {
        let r = rotator();
        r.rotate().await.unwrap();
        r.rotate().await.unwrap();
        let outcome = r.rotate().await.unwrap();
        // two actives-turned-grace plus one new exceeds max 2
        assert_eq!(outcome.retired, 1);

        // the cap applies within the rotating pass itself
        assert_eq!(r.manager.active_keys().await.unwrap().len(), 1);
        let mut grace = List::default();
        r.manager
            .list_keys(
                &ListParams {
                    status: Some(KeyStatus::Grace),
                    pagination: all_newest_first(),
                    ..Default::default()
                },
                &mut grace,
            )
            .await
            .unwrap();
        assert_eq!(grace.data.len(), 1);

        let mut publishable = List::default();
        r.manager
            .list_keys(
                &ListParams {
                    publishable_at: Some(Utc::now()),
                    pagination: all_newest_first(),
                    ..Default::default()
                },
                &mut publishable,
            )
            .await
            .unwrap();
        assert!(publishable.data.len() <= 2);
    }

    #[tokio::test]
    async fn busy_lease_rejects_forced_rotation() {
        let r = rotator();
        r.lease.try_acquire().await.unwrap();

        let err = r.rotate().await.unwrap_err();
        assert!(err.to_string().contains("rotation is already in progress"));

        // background passes skip silently instead
        let outcome = r.maintain().await.unwrap();
        assert_eq!(outcome, RotationOutcome::default());

        r.lease.release().await.unwrap();
        assert!(r.rotate().await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_rotations_have_one_winner() {
        let r = Arc::new(rotator());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = Arc::clone(&r);
            handles.push(tokio::spawn(async move { r.rotate().await }));
        }
        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                // losers surface RotationInProgress rather than queueing up
                Err(err) => assert!(err
                    .to_string()
                    .contains("rotation is already in progress")),
            }
        }
        assert!(wins >= 1);
        // whatever interleaving happened, exactly one key signs
        assert_eq!(r.manager.active_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribers_learn_about_changes() {
        let r = rotator();
        let mut rx = r.subscribe();
        let before = *rx.borrow_and_update();
        r.rotate().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update() > before);
    }
}
