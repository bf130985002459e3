pub mod key;
mod mariadb;
mod memory;
mod model;
mod pem;
mod pool;

pub use mariadb::*;
pub use memory::{MemoryKeyRepository, MemoryLease, MemoryPrivateKeyStore};
pub use model::{List, Pagination, ID};
pub use pem::PemFileStore;
pub use pool::connection_manager;

use async_trait::async_trait;

use signet_slo::Result;

use key::{Key, ListParams, PrivateMaterial};

/// Persistence of public key records.
///
/// Records are append-then-mutate: `put` refuses to overwrite an existing
/// kid, later lifecycle changes go through `update`.
#[async_trait]
pub trait KeyRepository: Send + Sync {
    /// Inserts a new record. `AlreadyExists` if the kid is taken.
    async fn put(&self, key: &Key) -> Result<()>;
    /// Rewrites an existing record. `NotFound` if the kid is unknown.
    async fn update(&self, key: &Key) -> Result<()>;
    /// Loads the record whose kid is set on `output`.
    async fn get(&self, output: &mut Key) -> Result<()>;
    async fn delete(&self, kid: &str) -> Result<()>;
    async fn list(
        &self,
        opts: &ListParams,
        output: &mut List<Key>,
    ) -> Result<()>;
    async fn count(&self, opts: &ListParams) -> Result<i64>;
}

/// Exclusive lease guarding the rotation workflow. At most one holder at a
/// time across every process sharing the backing store.
#[async_trait]
pub trait RotationLease: Send + Sync {
    /// Non-blocking acquire; `false` means another holder has it.
    async fn try_acquire(&self) -> Result<bool>;
    async fn release(&self) -> Result<()>;
}

/// Private key material, kept apart from the public record store.
#[async_trait]
pub trait PrivateKeyStore: Send + Sync {
    async fn put(&self, kid: &str, material: &PrivateMaterial) -> Result<()>;
    async fn get(&self, kid: &str) -> Result<PrivateMaterial>;
    async fn delete(&self, kid: &str) -> Result<()>;
    async fn exists(&self, kid: &str) -> Result<bool>;
    /// Every kid with stored material, for reconciliation sweeps.
    async fn kids(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: KeyRepository + ?Sized> KeyRepository for std::sync::Arc<T> {
    async fn put(&self, key: &Key) -> Result<()> {
        (**self).put(key).await
    }
    async fn update(&self, key: &Key) -> Result<()> {
        (**self).update(key).await
    }
    async fn get(&self, output: &mut Key) -> Result<()> {
        (**self).get(output).await
    }
    async fn delete(&self, kid: &str) -> Result<()> {
        (**self).delete(kid).await
    }
    async fn list(
        &self,
        opts: &ListParams,
        output: &mut List<Key>,
    ) -> Result<()> {
        (**self).list(opts, output).await
    }
    async fn count(&self, opts: &ListParams) -> Result<i64> {
        (**self).count(opts).await
    }
}

#[async_trait]
impl<T: PrivateKeyStore + ?Sized> PrivateKeyStore for std::sync::Arc<T> {
    async fn put(&self, kid: &str, material: &PrivateMaterial) -> Result<()> {
        (**self).put(kid, material).await
    }
    async fn get(&self, kid: &str) -> Result<PrivateMaterial> {
        (**self).get(kid).await
    }
    async fn delete(&self, kid: &str) -> Result<()> {
        (**self).delete(kid).await
    }
    async fn exists(&self, kid: &str) -> Result<bool> {
        (**self).exists(kid).await
    }
    async fn kids(&self) -> Result<Vec<String>> {
        (**self).kids().await
    }
}

#[cfg(any(test, feature = "mock"))]
mockall::mock! {
    pub KeyRepo {}

    #[async_trait]
    impl KeyRepository for KeyRepo {
        async fn put(&self, key: &Key) -> Result<()>;
        async fn update(&self, key: &Key) -> Result<()>;
        async fn get(&self, output: &mut Key) -> Result<()>;
        async fn delete(&self, kid: &str) -> Result<()>;
        async fn list(
            &self,
            opts: &ListParams,
            output: &mut List<Key>,
        ) -> Result<()>;
        async fn count(&self, opts: &ListParams) -> Result<i64>;
    }
}
