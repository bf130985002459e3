use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use signet_slo::{errors, Result};

#[derive(Debug, Clone)]
pub struct ServiceAuthConfig {
    pub base_url: String,
    pub sub: String,
    pub aud: Vec<String>,
    /// Requested token lifetime in seconds; `None` takes the server default.
    pub ttl: Option<i64>,
    /// Seconds before expiry at which a fresh token is requested.
    pub refresh_before: i64,
    pub attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct IssuedToken {
    token: String,
    kid: String,
    expires_at: i64,
}

/// Keeps a service token on hand, renewing it ahead of expiry.
///
/// When the issuer is unreachable the helper keeps serving the old token
/// until it actually expires, and only then surfaces the fetch error.
pub struct ServiceAuthHelper {
    client: reqwest::Client,
    config: ServiceAuthConfig,
    current: RwLock<Option<IssuedToken>>,
}

impl ServiceAuthHelper {
    pub fn new(client: reqwest::Client, config: ServiceAuthConfig) -> Self {
        Self {
            client,
            config,
            current: RwLock::new(None),
        }
    }

    /// A token valid right now, fetching or renewing as needed.
    pub async fn token(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        if let Some(current) = self.current.read().await.as_ref() {
            if now < current.expires_at - self.config.refresh_before {
                return Ok(current.token.clone());
            }
        }

        match self.fetch().await {
            Ok(issued) => {
                debug!(
                    "issued service token under kid {} until {}",
                    issued.kid, issued.expires_at
                );
                let token = issued.token.clone();
                *self.current.write().await = Some(issued);
                Ok(token)
            }
            Err(err) => {
                // inside the refresh window the old token still works
                if let Some(current) = self.current.read().await.as_ref() {
                    if now < current.expires_at {
                        warn!(
                            "token renewal failed, serving current token: {}",
                            err
                        );
                        return Ok(current.token.clone());
                    }
                }
                Err(err)
            }
        }
    }

    /// Background renewal loop for services that want a warm token at all
    /// times. Wakes shortly before each expiry.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        loop {
            if let Err(err) = self.token().await {
                warn!("service token renewal failed: {}", err);
            }
            let sleep = self.next_wakeup().await;
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {},
                _ = &mut shutdown => break,
            }
        }
    }

    async fn next_wakeup(&self) -> Duration {
        let now = Utc::now().timestamp();
        match self.current.read().await.as_ref() {
            Some(current) => {
                let due = current.expires_at - self.config.refresh_before;
                Duration::from_secs(due.saturating_sub(now).max(5) as u64)
            }
            // no token yet, retry soon
            None => Duration::from_secs(5),
        }
    }

    async fn fetch(&self) -> Result<IssuedToken> {
        let url = format!(
            "{}/v1/token/sign",
            self.config.base_url.trim_end_matches('/')
        );
        let mut body = serde_json::json!({
            "sub": self.config.sub,
            "aud": self.config.aud,
            "attributes": self.config.attributes,
        });
        if let Some(ttl) = self.config.ttl {
            body["ttl"] = ttl.into();
        }
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(errors::any)?;
        if !response.status().is_success() {
            return Err(errors::anyhow(anyhow::anyhow!(
                "sign endpoint answered {}",
                response.status()
            )));
        }
        response.json().await.map_err(errors::any)
    }
}
