use std::time::{Duration, Instant};

use http::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use http::StatusCode;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use signet_slo::{errors, Result};
use signet_storage::key::{Jwks, PublicJwk};

/// Spacing between forced refreshes, so a flood of tokens with a bogus kid
/// cannot hammer the key endpoint.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct CacheState {
    jwks: Jwks,
    etag: Option<String>,
    last_modified: Option<String>,
    fetched: bool,
}

/// Rate limiter over refresh attempts. `pass` answers whether enough time
/// has gone by since the last attempt, and records the attempt if so.
#[derive(Debug)]
pub(crate) struct RefreshGate {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RefreshGate {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub(crate) async fn pass(&self) -> bool {
        let mut last = self.last.lock().await;
        match *last {
            Some(at) if at.elapsed() < self.min_interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }
}

/// Client-side copy of the published key set.
///
/// Refreshes are conditional: the stored ETag and Last-Modified validators
/// ride along and a 304 keeps the current copy.
pub struct JwksCache {
    client: reqwest::Client,
    url: String,
    state: RwLock<CacheState>,
    gate: RefreshGate,
}

impl JwksCache {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!(
                "{}/.well-known/jwks.json",
                base_url.trim_end_matches('/')
            ),
            state: RwLock::new(CacheState::default()),
            gate: RefreshGate::new(MIN_REFRESH_INTERVAL),
        }
    }

    pub async fn find(&self, kid: &str) -> Option<PublicJwk> {
        let state = self.state.read().await;
        state.jwks.find_by_kid(kid).cloned()
    }

    /// Looks up a kid, fetching the key set on a miss. At most one forced
    /// refresh per backoff window; a kid that stays unknown afterwards is
    /// `NotFound`.
    pub async fn get(&self, kid: &str) -> Result<PublicJwk> {
        if let Some(jwk) = self.find(kid).await {
            return Ok(jwk);
        }
        if self.gate.pass().await {
            debug!("kid {} not cached, refreshing key set", kid);
            self.refresh().await?;
        }
        self.find(kid)
            .await
            .ok_or_else(|| errors::not_found(kid))
    }

    /// Unconditionally re-fetches (conditionally on the wire).
    pub async fn refresh(&self) -> Result<()> {
        let (etag, last_modified) = {
            let state = self.state.read().await;
            (state.etag.clone(), state.last_modified.clone())
        };

        let mut request = self.client.get(&self.url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(lm) = last_modified {
            request = request.header(IF_MODIFIED_SINCE, lm);
        }

        let response = request.send().await.map_err(errors::any)?;
        match response.status() {
            StatusCode::OK => {
                let etag = header_string(&response, ETAG);
                let last_modified = header_string(&response, LAST_MODIFIED);
                let jwks: Jwks =
                    response.json().await.map_err(errors::any)?;

                let mut state = self.state.write().await;
                state.jwks = jwks;
                state.etag = etag;
                state.last_modified = last_modified;
                state.fetched = true;
                Ok(())
            }
            StatusCode::NOT_MODIFIED => Ok(()),
            status => Err(errors::anyhow(anyhow::anyhow!(
                "key endpoint answered {} for {}",
                status,
                self.url
            ))),
        }
    }

    /// True once a key set has been fetched, even an empty one.
    pub async fn primed(&self) -> bool {
        self.state.read().await.fetched
    }

    /// Current copy of the key set.
    pub async fn snapshot(&self) -> Jwks {
        self.state.read().await.jwks.clone()
    }
}

fn header_string(
    response: &reqwest::Response,
    name: http::header::HeaderName,
) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}
