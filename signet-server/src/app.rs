use std::{ops::Deref, str::FromStr, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use sqlx::MySqlPool;
use tracing::info;

use signet_slo::errors;
use signet_storage::{
    key::{Algorithm, RotationPolicy},
    KeyRepoImpl, MariadbLease, PemFileStore,
};

use crate::{
    services::{
        jwks::JwksBuilder,
        key::{KeyManager, KeyRotator},
        token::{TokenSigner, TokenVerifier},
    },
    AppConfig,
};

const ROTATION_LEASE: &str = "signet:key-rotation";

pub struct App {
    pub config: AppConfig,
    pub store: Store,
    pub key_manager: KeyManager<KeyRepoImpl, PemFileStore>,
    pub key_rotator: KeyRotator<KeyRepoImpl, PemFileStore, MariadbLease>,
    pub jwks: JwksBuilder<KeyRepoImpl>,
    pub signer: TokenSigner<KeyRepoImpl, PemFileStore>,
    pub verifier: TokenVerifier<KeyRepoImpl>,
}

impl App {
    pub fn new(pool: MySqlPool, config: AppConfig) -> Result<Self> {
        info!("initializing key services...");

        let store = Store::new(pool.clone(), &config.keys_dir);

        let policy = RotationPolicy {
            rotation_interval: config.rotation_interval,
            grace_period: config.grace_period,
            max_keys_in_jwks: config.max_keys_in_jwks,
        };
        let key_manager = KeyManager::new(
            store.key.clone(),
            store.private.clone(),
            policy,
        )?;

        let algorithm = Algorithm::from_str(&config.algorithm)?;
        let key_rotator = KeyRotator::new(
            key_manager.clone(),
            Arc::new(MariadbLease::new(pool, ROTATION_LEASE)),
            algorithm,
        );

        let jwks = JwksBuilder::new(
            store.key.clone(),
            Duration::from_secs(config.jwks_cache_ttl),
            key_rotator.subscribe(),
        );

        let signer = TokenSigner::new(
            key_manager.clone(),
            config.endpoint.clone(),
            config.expiration,
            key_rotator.subscribe(),
        );

        let verifier = TokenVerifier::new(
            store.key.clone(),
            config.endpoint.clone(),
            config.allowed_audiences.clone(),
            config.clock_skew,
        );

        info!("key services successfully initialized!");
        Ok(Self {
            config,
            store,
            key_manager,
            key_rotator,
            jwks,
            signer,
            verifier,
        })
    }
}

pub struct Store {
    pub key: KeyRepoImpl,
    pub private: PemFileStore,
}

impl Store {
    pub fn new(pool: MySqlPool, keys_dir: &str) -> Self {
        Self {
            key: KeyRepoImpl::new(pool),
            private: PemFileStore::new(keys_dir),
        }
    }
}

#[derive(Clone)]
pub struct AppState(pub Arc<App>);

// deref so you can still access the inner fields easily
impl Deref for AppState {
    type Target = App;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AppState
where
    Self: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = errors::WithBacktrace;
    async fn from_request_parts(
        _: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::from_ref(state))
    }
}
