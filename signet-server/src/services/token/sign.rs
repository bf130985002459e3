use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use utoipa::ToSchema;

use signet_slo::{errors, next_id, Result};
use signet_storage::{
    key::{Algorithm, Key},
    KeyRepository, PrivateKeyStore,
};

use crate::services::key::KeyManager;

use super::{Claims, SignRequest, RESERVED_CLAIMS};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SignedToken {
    pub token: String,
    pub kid: String,
    pub expires_at: i64,
}

struct CachedSigner {
    key: Key,
    encoding: EncodingKey,
    version: u64,
}

/// Issues tokens under the current active key.
///
/// The resolved key and its parsed encoding key are cached; a rotation
/// bumps the watch channel and forces re-resolution on the next sign.
pub struct TokenSigner<S, P> {
    manager: KeyManager<S, P>,
    issuer: String,
    default_ttl: i64,
    version: watch::Receiver<u64>,
    cached: RwLock<Option<CachedSigner>>,
}

impl<S, P> TokenSigner<S, P>
where
    S: KeyRepository,
    P: PrivateKeyStore,
{
    pub fn new(
        manager: KeyManager<S, P>,
        issuer: String,
        default_ttl: i64,
        version: watch::Receiver<u64>,
    ) -> Self {
        Self {
            manager,
            issuer,
            default_ttl,
            version,
            cached: RwLock::new(None),
        }
    }

    pub async fn sign(&self, req: &SignRequest) -> Result<SignedToken> {
        let now = Utc::now();
        let (key, encoding) = self.signing_key(now).await?;

        let ttl = req.ttl.unwrap_or(self.default_ttl);
        let expires_at = now.timestamp() + ttl;
        // reserved names never ride along as attributes; they would
        // duplicate the registered members in the signed payload
        let mut attributes = req.attributes.clone();
        attributes
            .retain(|name, _| !RESERVED_CLAIMS.contains(&name.as_str()));
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: req.sub.clone(),
            user_id: req.user_id.clone(),
            account_id: req.account_id.clone(),
            aud: req.aud.clone(),
            exp: expires_at,
            nbf: Some(now.timestamp()),
            iat: now.timestamp(),
            jti: next_id().map_err(errors::any)?.to_string(),
            attributes,
        };

        let mut header = Header::new(jwt_algorithm(key.algorithm));
        header.kid = Some(key.kid.clone());

        let token =
            encode(&header, &claims, &encoding).map_err(errors::any)?;
        Ok(SignedToken {
            token,
            kid: key.kid,
            expires_at,
        })
    }

    async fn signing_key(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Key, EncodingKey)> {
        let version = *self.version.borrow();
        {
            let cached = self.cached.read().await;
            if let Some(signer) = cached.as_ref() {
                if signer.version == version && signer.key.can_sign(now) {
                    return Ok((
                        signer.key.clone(),
                        signer.encoding.clone(),
                    ));
                }
            }
        }

        let key = self.manager.get_active_key().await?;
        let material = match self.manager.private_material(&key.kid).await {
            Ok(material) => material,
            Err(err) => {
                if err.is_not_found() {
                    tracing::error!(
                        "active key {} has no private material, the next \
                         maintenance sweep will retire it",
                        key.kid
                    );
                }
                return Err(err);
            }
        };
        let encoding = match key.algorithm {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                EncodingKey::from_rsa_pem(material.pem.as_bytes())
            }
            Algorithm::ES256 | Algorithm::ES384 => {
                EncodingKey::from_ec_pem(material.pem.as_bytes())
            }
            Algorithm::EdDSA => {
                EncodingKey::from_ed_pem(material.pem.as_bytes())
            }
        }
        .map_err(errors::any)?;

        let mut cached = self.cached.write().await;
        *cached = Some(CachedSigner {
            key: key.clone(),
            encoding: encoding.clone(),
            version,
        });
        Ok((key, encoding))
    }
}

pub(crate) fn jwt_algorithm(algorithm: Algorithm) -> jsonwebtoken::Algorithm {
    match algorithm {
        Algorithm::RS256 => jsonwebtoken::Algorithm::RS256,
        Algorithm::RS384 => jsonwebtoken::Algorithm::RS384,
        Algorithm::RS512 => jsonwebtoken::Algorithm::RS512,
        Algorithm::ES256 => jsonwebtoken::Algorithm::ES256,
        Algorithm::ES384 => jsonwebtoken::Algorithm::ES384,
        Algorithm::EdDSA => jsonwebtoken::Algorithm::EdDSA,
    }
}
