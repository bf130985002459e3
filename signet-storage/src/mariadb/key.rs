use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{
    mysql::MySql, pool::PoolConnection, types::Json, MySqlPool, Row,
};
use tokio::sync::Mutex;

use signet_slo::{errors, Result};

use crate::{
    key::{Algorithm, Key, KeyStatus, ListParams, PublicJwk},
    KeyRepository, List, RotationLease,
};

#[derive(Clone, Debug)]
pub struct KeyRepoImpl {
    pool: MySqlPool,
}

impl KeyRepoImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn row_to_key(row: &sqlx::mysql::MySqlRow) -> Result<Key> {
        let status_repr = row.try_get::<i8, _>("status").map_err(errors::any)?;
        let status = KeyStatus::from_repr(status_repr as u8).ok_or_else(
            || {
                errors::any(std::io::Error::other(format!(
                    "unknown key status value {status_repr}"
                )))
            },
        )?;
        let algorithm = Algorithm::from_str(
            &row.try_get::<String, _>("algorithm").map_err(errors::any)?,
        )?;
        Ok(Key {
            kid: row.try_get("kid").map_err(errors::any)?,
            status,
            algorithm,
            public_jwk: row
                .try_get::<Json<PublicJwk>, _>("public_jwk")
                .map_err(errors::any)?
                .0,
            not_before: row
                .try_get::<Option<NaiveDateTime>, _>("not_before")
                .map_err(errors::any)?
                .map(|t| t.and_utc()),
            not_after: row
                .try_get::<Option<NaiveDateTime>, _>("not_after")
                .map_err(errors::any)?
                .map(|t| t.and_utc()),
            created_at: row
                .try_get::<NaiveDateTime, _>("created_at")
                .map_err(errors::any)?
                .and_utc(),
            updated_at: row
                .try_get::<NaiveDateTime, _>("updated_at")
                .map_err(errors::any)?
                .and_utc(),
        })
    }

    fn wheres(opts: &ListParams) -> String {
        let mut wheres = String::from("1 = 1");
        if let Some(status) = opts.status {
            wheres.push_str(&format!(" AND `status` = {}", status as u8));
        }
        if let Some(at) = opts.publishable_at {
            let at = fmt_datetime(at);
            wheres.push_str(&format!(
                " AND `status` IN ({}, {})",
                KeyStatus::Active as u8,
                KeyStatus::Grace as u8,
            ));
            wheres.push_str(&format!(
                " AND (`not_before` IS NULL OR `not_before` <= '{at}')"
            ));
            wheres.push_str(&format!(
                " AND (`not_after` IS NULL OR `not_after` > '{at}')"
            ));
        }
        if let Some(before) = opts.expired_before {
            wheres.push_str(&format!(
                " AND `not_after` IS NOT NULL AND `not_after` < '{}'",
                fmt_datetime(before),
            ));
        }
        wheres
    }
}

fn fmt_datetime(t: DateTime<Utc>) -> String {
    t.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[async_trait]
impl KeyRepository for KeyRepoImpl {
    #[tracing::instrument(skip(self, key), fields(kid = %key.kid))]
    async fn put(&self, key: &Key) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO `key`
            (`kid`,`status`,`algorithm`,`public_jwk`,`not_before`,`not_after`,`created_at`,`updated_at`)
            VALUES(?,?,?,?,?,?,?,?);"#,
        )
        .bind(&key.kid)
        .bind(key.status as u8)
        .bind(key.algorithm.to_string())
        .bind(Json(&key.public_jwk))
        .bind(key.not_before.map(|t| t.naive_utc()))
        .bind(key.not_after.map(|t| t.naive_utc()))
        .bind(key.created_at.naive_utc())
        .bind(key.updated_at.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                errors::already_exists(&key.kid)
            }
            _ => errors::any(err),
        })?;

        Ok(())
    }

    #[tracing::instrument(skip(self, key), fields(kid = %key.kid))]
    async fn update(&self, key: &Key) -> Result<()> {
        let affected = sqlx::query(
            r#"UPDATE `key`
            SET `status` = ?, `algorithm` = ?, `public_jwk` = ?,
                `not_before` = ?, `not_after` = ?, `updated_at` = ?
            WHERE `kid` = ?;"#,
        )
        .bind(key.status as u8)
        .bind(key.algorithm.to_string())
        .bind(Json(&key.public_jwk))
        .bind(key.not_before.map(|t| t.naive_utc()))
        .bind(key.not_after.map(|t| t.naive_utc()))
        .bind(key.updated_at.naive_utc())
        .bind(&key.kid)
        .execute(&self.pool)
        .await
        .map_err(errors::any)?
        .rows_affected();

        if affected == 0 {
            return Err(errors::not_found(&key.kid));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, output), fields(kid = %output.kid))]
    async fn get(&self, output: &mut Key) -> Result<()> {
        let row = match sqlx::query(
            r#"SELECT `kid`,`status`,`algorithm`,`public_jwk`,`not_before`,`not_after`,`created_at`,`updated_at`
            FROM `key`
            WHERE `kid` = ?;"#,
        )
        .bind(&output.kid)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(v) => match v {
                Some(value) => Ok(value),
                None => Err(errors::not_found(&output.kid)),
            },
            Err(err) => Err(errors::any(err)),
        }?;
        *output = Self::row_to_key(&row)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, kid: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM `key` WHERE `kid` = ?;"#)
            .bind(kid)
            .execute(&self.pool)
            .await
            .map_err(errors::any)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, opts, output))]
    async fn list(
        &self,
        opts: &ListParams,
        output: &mut List<Key>,
    ) -> Result<()> {
        let mut wheres = Self::wheres(opts);
        if !opts.pagination.count_disable {
            output.total = self.count(opts).await?;
        }
        opts.pagination.convert(&mut wheres);
        output.limit = opts.pagination.limit;
        output.offset = opts.pagination.offset;

        let rows = sqlx::query(
            format!(
                r#"SELECT `kid`,`status`,`algorithm`,`public_jwk`,`not_before`,`not_after`,`created_at`,`updated_at`
                FROM `key`
                WHERE {};"#,
                wheres,
            )
            .as_str(),
        )
        .fetch_all(&self.pool)
        .await
        .map_err(errors::any)?;
        for row in rows.iter() {
            output.data.push(Self::row_to_key(row)?);
        }
        Ok(())
    }

    async fn count(&self, opts: &ListParams) -> Result<i64> {
        let row = sqlx::query(
            format!(
                r#"SELECT COUNT(*) as `count` FROM `key` WHERE {};"#,
                Self::wheres(opts),
            )
            .as_str(),
        )
        .fetch_one(&self.pool)
        .await
        .map_err(errors::any)?;
        row.try_get("count").map_err(errors::any)
    }
}

/// Cross-process rotation lease backed by MySQL advisory locks.
///
/// `GET_LOCK` is session scoped, so the acquiring connection is pinned until
/// `release` gives the lock back. Dropping the connection also frees it,
/// which covers crashed holders.
pub struct MariadbLease {
    pool: MySqlPool,
    name: String,
    held: Mutex<Option<PoolConnection<MySql>>>,
}

impl MariadbLease {
    pub fn new(pool: MySqlPool, name: &str) -> Self {
        Self {
            pool,
            name: name.to_owned(),
            held: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RotationLease for MariadbLease {
    async fn try_acquire(&self) -> Result<bool> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Ok(false);
        }
        let mut conn = self.pool.acquire().await.map_err(errors::any)?;
        let row = sqlx::query(r#"SELECT GET_LOCK(?, 0) as `acquired`;"#)
            .bind(&self.name)
            .fetch_one(&mut *conn)
            .await
            .map_err(errors::any)?;
        let acquired = row
            .try_get::<Option<i64>, _>("acquired")
            .map_err(errors::any)?
            == Some(1);
        if acquired {
            *held = Some(conn);
        }
        Ok(acquired)
    }

    async fn release(&self) -> Result<()> {
        let mut held = self.held.lock().await;
        if let Some(mut conn) = held.take() {
            sqlx::query(r#"SELECT RELEASE_LOCK(?);"#)
                .bind(&self.name)
                .execute(&mut *conn)
                .await
                .map_err(errors::any)?;
        }
        Ok(())
    }
}
