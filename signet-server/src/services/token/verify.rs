use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Serialize;
use std::str::FromStr;
use utoipa::ToSchema;

use signet_slo::{errors, Result};
use signet_storage::{
    key::{Algorithm, Key, KeyStatus},
    KeyRepository,
};

use super::{sign::jwt_algorithm, Claims};

/// Every way a token check can come out. Failed checks are ordinary values;
/// only infrastructure trouble surfaces as an error.
#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyStatus {
    Valid { claims: Claims },
    Malformed { detail: String },
    MissingKid,
    UnsupportedAlgorithm { alg: String },
    UnknownKid,
    RetiredKey,
    KeyNotYetValid,
    KeyExpired,
    AlgorithmMismatch,
    SignatureInvalid,
    Expired,
    NotYetValid,
    IssuerMismatch,
    AudienceMismatch,
}

impl VerifyStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyStatus::Valid { .. })
    }

    /// Wire code carried in the `status` member of verification responses.
    pub fn code(&self) -> &'static str {
        match self {
            VerifyStatus::Valid { .. } => "valid",
            VerifyStatus::Malformed { .. } => "malformed",
            VerifyStatus::MissingKid => "missing_kid",
            VerifyStatus::UnsupportedAlgorithm { .. } => {
                "unsupported_algorithm"
            }
            VerifyStatus::UnknownKid => "unknown_kid",
            VerifyStatus::RetiredKey => "retired_key",
            VerifyStatus::KeyNotYetValid => "key_not_yet_valid",
            VerifyStatus::KeyExpired => "key_expired",
            VerifyStatus::AlgorithmMismatch => "algorithm_mismatch",
            VerifyStatus::SignatureInvalid => "signature_invalid",
            VerifyStatus::Expired => "expired",
            VerifyStatus::NotYetValid => "not_yet_valid",
            VerifyStatus::IssuerMismatch => "issuer_mismatch",
            VerifyStatus::AudienceMismatch => "audience_mismatch",
        }
    }

    /// Detail for negative verdicts that carry one.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            VerifyStatus::Malformed { detail } => Some(detail.clone()),
            VerifyStatus::UnsupportedAlgorithm { alg } => {
                Some(format!("unsupported algorithm {alg}"))
            }
            _ => None,
        }
    }

    fn malformed<S: ToString>(detail: S) -> Self {
        VerifyStatus::Malformed {
            detail: detail.to_string(),
        }
    }
}

/// Stateless verification against the public key records. Nothing here
/// touches private material.
pub struct TokenVerifier<S> {
    repo: S,
    issuer: String,
    audiences: Vec<String>,
    clock_skew: i64,
}

impl<S> TokenVerifier<S>
where
    S: KeyRepository,
{
    pub fn new(
        repo: S,
        issuer: String,
        audiences: Vec<String>,
        clock_skew: i64,
    ) -> Self {
        Self {
            repo,
            issuer,
            audiences,
            clock_skew,
        }
    }

    pub async fn verify(&self, token: &str) -> Result<VerifyStatus> {
        let (alg, kid) = match parse_header(token) {
            Ok(v) => v,
            Err(status) => return Ok(status),
        };

        let mut key = Key {
            kid,
            ..Default::default()
        };
        match self.repo.get(&mut key).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                return Ok(VerifyStatus::UnknownKid)
            }
            Err(err) => return Err(err),
        }

        let now = Utc::now();
        if key.status == KeyStatus::Retired {
            return Ok(VerifyStatus::RetiredKey);
        }
        if key.is_not_yet_valid(now) {
            return Ok(VerifyStatus::KeyNotYetValid);
        }
        if key.is_expired(now) {
            return Ok(VerifyStatus::KeyExpired);
        }
        if alg != key.algorithm {
            return Ok(VerifyStatus::AlgorithmMismatch);
        }

        let decoding = decoding_key(&key)?;
        let mut validation = Validation::new(jwt_algorithm(key.algorithm));
        validation.leeway = self.clock_skew.max(0) as u64;
        validation.validate_nbf = true;
        if self.issuer.is_empty() {
            validation.iss = None;
        } else {
            validation.set_issuer(&[&self.issuer]);
        }
        if self.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.audiences);
        }

        match decode::<Claims>(token, &decoding, &validation) {
            Ok(data) => Ok(VerifyStatus::Valid {
                claims: data.claims,
            }),
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                Ok(match err.kind() {
                    ErrorKind::InvalidSignature => {
                        VerifyStatus::SignatureInvalid
                    }
                    ErrorKind::ExpiredSignature => VerifyStatus::Expired,
                    ErrorKind::ImmatureSignature => VerifyStatus::NotYetValid,
                    ErrorKind::InvalidIssuer => VerifyStatus::IssuerMismatch,
                    ErrorKind::InvalidAudience => {
                        VerifyStatus::AudienceMismatch
                    }
                    ErrorKind::InvalidAlgorithm => {
                        VerifyStatus::AlgorithmMismatch
                    }
                    ErrorKind::InvalidToken
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_)
                    | ErrorKind::MissingRequiredClaim(_) => {
                        VerifyStatus::malformed(&err)
                    }
                    _ => return Err(errors::any(err)),
                })
            }
        }
    }
}

/// Pre-parses the JOSE header so `alg: none` and foreign algorithms are
/// rejected by name before any cryptography runs.
fn parse_header(token: &str) -> std::result::Result<(Algorithm, String), VerifyStatus> {
    let mut parts = token.split('.');
    let header = match (parts.next(), parts.next(), parts.next(), parts.next())
    {
        (Some(h), Some(_), Some(_), None) if !h.is_empty() => h,
        _ => {
            return Err(VerifyStatus::malformed(
                "token is not a three-part JWT",
            ))
        }
    };

    let raw = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(VerifyStatus::malformed)?;
    let value: serde_json::Value =
        serde_json::from_slice(&raw).map_err(VerifyStatus::malformed)?;

    let alg = match value.get("alg").and_then(|v| v.as_str()) {
        Some(alg) => alg,
        None => return Err(VerifyStatus::malformed("header has no alg")),
    };
    let alg = Algorithm::from_str(alg).map_err(|_| {
        VerifyStatus::UnsupportedAlgorithm {
            alg: alg.to_owned(),
        }
    })?;

    let kid = match value.get("kid").and_then(|v| v.as_str()) {
        Some(kid) if !kid.is_empty() => kid.to_owned(),
        _ => return Err(VerifyStatus::MissingKid),
    };
    Ok((alg, kid))
}

fn decoding_key(key: &Key) -> Result<DecodingKey> {
    let jwk = &key.public_jwk;
    let missing = || {
        errors::anyhow(anyhow::anyhow!(
            "stored jwk {} is missing components",
            key.kid
        ))
    };
    match key.algorithm {
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
            let (n, e) = match (&jwk.n, &jwk.e) {
                (Some(n), Some(e)) => (n, e),
                _ => return Err(missing()),
            };
            DecodingKey::from_rsa_components(n, e).map_err(errors::any)
        }
        Algorithm::ES256 | Algorithm::ES384 => {
            let (x, y) = match (&jwk.x, &jwk.y) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(missing()),
            };
            DecodingKey::from_ec_components(x, y).map_err(errors::any)
        }
        Algorithm::EdDSA => {
            let x = jwk.x.as_ref().ok_or_else(missing)?;
            DecodingKey::from_ed_components(x).map_err(errors::any)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use tokio::sync::watch;

    use signet_storage::{
        key::RotationPolicy, MemoryKeyRepository, MemoryPrivateKeyStore,
    };

    use crate::services::{
        key::KeyManager,
        token::{SignRequest, TokenSigner},
    };

    use super::*;

    struct Fixture {
        repo: Arc<MemoryKeyRepository>,
        manager:
            KeyManager<Arc<MemoryKeyRepository>, Arc<MemoryPrivateKeyStore>>,
        signer:
            TokenSigner<Arc<MemoryKeyRepository>, Arc<MemoryPrivateKeyStore>>,
        _version: watch::Sender<u64>,
    }

    const ISSUER: &str = "https://signet.test";

    fn fixture() -> Fixture {
        let repo = Arc::new(MemoryKeyRepository::new());
        let manager = KeyManager::new(
            Arc::clone(&repo),
            Arc::new(MemoryPrivateKeyStore::new()),
            RotationPolicy::default(),
        )
        .unwrap();
        let (tx, rx) = watch::channel(0);
        let signer = TokenSigner::new(
            manager.clone(),
            ISSUER.to_owned(),
            3600,
            rx,
        );
        Fixture {
            repo,
            manager,
            signer,
            _version: tx,
        }
    }

    fn verifier(
        f: &Fixture,
        audiences: Vec<String>,
    ) -> TokenVerifier<Arc<MemoryKeyRepository>> {
        TokenVerifier::new(
            Arc::clone(&f.repo),
            ISSUER.to_owned(),
            audiences,
            60,
        )
    }

    fn request() -> SignRequest {
        SignRequest {
            sub: "svc-payments".to_owned(),
            user_id: Some("u-42".to_owned()),
            account_id: None,
            aud: vec!["svc-ledger".to_owned()],
            ttl: None,
            attributes: Default::default(),
        }
    }

    #[tokio::test]
    async fn sign_then_verify_round_trip() {
        for alg in [
            Algorithm::RS256,
            Algorithm::ES256,
            Algorithm::ES384,
            Algorithm::EdDSA,
        ] {
            let f = fixture();
            let key = f.manager.create_key(alg).await.unwrap();
            let signed = f.signer.sign(&request()).await.unwrap();
            assert_eq!(signed.kid, key.kid);

            let status = verifier(&f, vec!["svc-ledger".to_owned()])
                .verify(&signed.token)
                .await
                .unwrap();
            match status {
                VerifyStatus::Valid { claims } => {
                    assert_eq!(claims.sub, "svc-payments");
                    assert_eq!(claims.user_id.as_deref(), Some("u-42"));
                    assert_eq!(claims.iss, ISSUER);
                }
                other => panic!("expected valid, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn reserved_attributes_cannot_forge_registered_claims() {
        let f = fixture();
        f.manager.create_key(Algorithm::ES256).await.unwrap();

        let mut attributes = std::collections::HashMap::new();
        attributes.insert(
            "exp".to_owned(),
            serde_json::json!(9_999_999_999i64),
        );
        attributes.insert("iss".to_owned(), serde_json::json!("evil"));
        attributes.insert("role".to_owned(), serde_json::json!("admin"));
        let signed = f
            .signer
            .sign(&SignRequest {
                attributes,
                ..request()
            })
            .await
            .unwrap();

        match verifier(&f, vec!["svc-ledger".to_owned()])
            .verify(&signed.token)
            .await
            .unwrap()
        {
            VerifyStatus::Valid { claims } => {
                assert_eq!(claims.exp, signed.expires_at);
                assert_eq!(claims.iss, ISSUER);
                assert!(!claims.attributes.contains_key("exp"));
                assert!(!claims.attributes.contains_key("iss"));
                assert_eq!(
                    claims.attributes.get("role"),
                    Some(&serde_json::json!("admin"))
                );
            }
            other => panic!("expected valid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let f = fixture();
        f.manager.create_key(Algorithm::ES256).await.unwrap();
        let signed = f.signer.sign(&request()).await.unwrap();

        let mut parts: Vec<&str> = signed.token.split('.').collect();
        let flipped =
            if parts[2].starts_with('A') { "B" } else { "A" }.to_owned()
                + &parts[2][1..];
        parts[2] = &flipped;
        let tampered = parts.join(".");

        assert_eq!(
            verifier(&f, vec![]).verify(&tampered).await.unwrap(),
            VerifyStatus::SignatureInvalid
        );
    }

    #[tokio::test]
    async fn retired_key_fails_closed() {
        let f = fixture();
        let key = f.manager.create_key(Algorithm::ES256).await.unwrap();
        let signed = f.signer.sign(&request()).await.unwrap();

        f.manager.force_retire(&key.kid).await.unwrap();
        assert_eq!(
            verifier(&f, vec![]).verify(&signed.token).await.unwrap(),
            VerifyStatus::RetiredKey
        );
    }

    #[tokio::test]
    async fn unknown_kid_is_reported() {
        let f = fixture();
        f.manager.create_key(Algorithm::ES256).await.unwrap();
        let signed = f.signer.sign(&request()).await.unwrap();

        let other = fixture();
        other.manager.create_key(Algorithm::ES256).await.unwrap();
        assert_eq!(
            verifier(&other, vec![])
                .verify(&signed.token)
                .await
                .unwrap(),
            VerifyStatus::UnknownKid
        );
    }

    #[tokio::test]
    async fn alg_none_and_garbage_are_rejected() {
        let f = fixture();
        let v = verifier(&f, vec![]);

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","kid":"k"}"#);
        let body = URL_SAFE_NO_PAD.encode(br#"{"sub":"x"}"#);
        let none_token = format!("{header}.{body}.");
        assert_eq!(
            v.verify(&none_token).await.unwrap(),
            VerifyStatus::UnsupportedAlgorithm {
                alg: "none".to_owned()
            }
        );

        assert!(matches!(
            v.verify("definitely-not-a-jwt").await.unwrap(),
            VerifyStatus::Malformed { .. }
        ));
        assert!(matches!(
            v.verify("a.b").await.unwrap(),
            VerifyStatus::Malformed { .. }
        ));

        // kid is mandatory
        let no_kid = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256"}"#);
        assert_eq!(
            v.verify(&format!("{no_kid}.{body}.c")).await.unwrap(),
            VerifyStatus::MissingKid
        );
    }

    #[tokio::test]
    async fn expired_token_is_reported() {
        let f = fixture();
        f.manager.create_key(Algorithm::ES256).await.unwrap();
        let signed = f
            .signer
            .sign(&SignRequest {
                ttl: Some(1),
                ..request()
            })
            .await
            .unwrap();

        // inside the skew window the token still verifies
        tokio::time::sleep(StdDuration::from_secs(2)).await;
        assert!(verifier(&f, vec![])
            .verify(&signed.token)
            .await
            .unwrap()
            .is_valid());

        // with no skew it is expired
        let strict = TokenVerifier::new(
            Arc::clone(&f.repo),
            ISSUER.to_owned(),
            vec![],
            0,
        );
        assert_eq!(
            strict.verify(&signed.token).await.unwrap(),
            VerifyStatus::Expired
        );
    }

    #[tokio::test]
    async fn repository_failures_surface_as_errors() {
        let mut repo = signet_storage::MockKeyRepo::new();
        repo.expect_get().returning(|_| {
            Err(errors::any(std::io::Error::other("db down")))
        });
        let v =
            TokenVerifier::new(repo, ISSUER.to_owned(), vec![], 60);

        let header =
            URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","kid":"k-1"}"#);
        let token = format!("{header}.e30.sig");
        assert!(v.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn audience_and_issuer_are_enforced() {
        let f = fixture();
        f.manager.create_key(Algorithm::ES256).await.unwrap();
        let signed = f.signer.sign(&request()).await.unwrap();

        assert_eq!(
            verifier(&f, vec!["svc-other".to_owned()])
                .verify(&signed.token)
                .await
                .unwrap(),
            VerifyStatus::AudienceMismatch
        );

        let wrong_issuer = TokenVerifier::new(
            Arc::clone(&f.repo),
            "https://someone-else.test".to_owned(),
            vec![],
            60,
        );
        assert_eq!(
            wrong_issuer.verify(&signed.token).await.unwrap(),
            VerifyStatus::IssuerMismatch
        );
    }
}
