use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use signet_slo::{errors, Result};
use signet_storage::key::{Algorithm, PublicJwk};

use crate::{Claims, JwksCache};

/// Verifies tokens against the cached key set, no round trip per token.
pub struct LocalVerifier {
    cache: JwksCache,
    issuer: Option<String>,
    audiences: Vec<String>,
    leeway: u64,
}

impl LocalVerifier {
    pub fn new(
        cache: JwksCache,
        issuer: Option<String>,
        audiences: Vec<String>,
        leeway: u64,
    ) -> Self {
        Self {
            cache,
            issuer,
            audiences,
            leeway,
        }
    }

    pub async fn verify(&self, token: &str) -> Result<Claims> {
        let (alg, kid) = parse_header(token)?;
        // a miss refreshes the key set once before giving up
        let jwk = self.cache.get(&kid).await?;

        let jwk_alg = Algorithm::from_str(&jwk.alg)?;
        if alg != jwk_alg {
            return Err(errors::unauthorized());
        }

        let decoding = decoding_key(&jwk)?;
        let mut validation =
            Validation::new(jwt_algorithm(alg));
        validation.leeway = self.leeway;
        validation.validate_nbf = true;
        match &self.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => validation.iss = None,
        }
        if self.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.audiences);
        }

        let data = decode::<Claims>(token, &decoding, &validation)
            .map_err(|err| {
                errors::forbidden(&format!("token rejected: {err}"))
            })?;
        Ok(data.claims)
    }
}

fn parse_header(token: &str) -> Result<(Algorithm, String)> {
    let mut parts = token.split('.');
    let header = match (parts.next(), parts.next(), parts.next(), parts.next())
    {
        (Some(h), Some(_), Some(_), None) if !h.is_empty() => h,
        _ => return Err(errors::bad_request("token is not a three-part JWT")),
    };
    let raw = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|err| errors::bad_request(&err))?;
    let value: serde_json::Value =
        serde_json::from_slice(&raw).map_err(|err| errors::bad_request(&err))?;

    let alg = value
        .get("alg")
        .and_then(|v| v.as_str())
        .ok_or_else(|| errors::bad_request("header has no alg"))?;
    let alg = Algorithm::from_str(alg)?;

    let kid = value
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| errors::bad_request("header has no kid"))?;
    Ok((alg, kid.to_owned()))
}

fn decoding_key(jwk: &PublicJwk) -> Result<DecodingKey> {
    let missing = || {
        errors::bad_request(&format!("jwk {} is missing components", jwk.kid))
    };
    match jwk.kty.as_str() {
        "RSA" => {
            let (n, e) = match (&jwk.n, &jwk.e) {
                (Some(n), Some(e)) => (n, e),
                _ => return Err(missing()),
            };
            DecodingKey::from_rsa_components(n, e).map_err(errors::any)
        }
        "EC" => {
            let (x, y) = match (&jwk.x, &jwk.y) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(missing()),
            };
            DecodingKey::from_ec_components(x, y).map_err(errors::any)
        }
        "OKP" => {
            let x = jwk.x.as_ref().ok_or_else(missing)?;
            DecodingKey::from_ed_components(x).map_err(errors::any)
        }
        other => Err(errors::bad_request(&format!(
            "unsupported key type: {other}"
        ))),
    }
}

fn jwt_algorithm(algorithm: Algorithm) -> jsonwebtoken::Algorithm {
    match algorithm {
        Algorithm::RS256 => jsonwebtoken::Algorithm::RS256,
        Algorithm::RS384 => jsonwebtoken::Algorithm::RS384,
        Algorithm::RS512 => jsonwebtoken::Algorithm::RS512,
        Algorithm::ES256 => jsonwebtoken::Algorithm::ES256,
        Algorithm::ES384 => jsonwebtoken::Algorithm::ES384,
        Algorithm::EdDSA => jsonwebtoken::Algorithm::EdDSA,
    }
}

/// Verdict as serialized by the verify endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    pub status: String,
    pub claims: Option<Claims>,
    pub failure_reason: Option<String>,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        self.status == "valid"
    }
}

/// Delegates verification to the issuing service.
pub struct RemoteVerifier {
    client: reqwest::Client,
    url: String,
}

impl RemoteVerifier {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!(
                "{}/v1/token/verify",
                base_url.trim_end_matches('/')
            ),
        }
    }

    pub async fn verify(&self, token: &str) -> Result<Verdict> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "access_token": token,
                "include_metadata": true,
            }))
            .send()
            .await
            .map_err(errors::any)?;
        if !response.status().is_success() {
            return Err(errors::anyhow(anyhow::anyhow!(
                "verify endpoint answered {}",
                response.status()
            )));
        }
        response.json().await.map_err(errors::any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_parsing() {
        let header =
            URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","kid":"k-1"}"#);
        let (alg, kid) =
            parse_header(&format!("{header}.e30.sig")).unwrap();
        assert_eq!(alg, Algorithm::ES256);
        assert_eq!(kid, "k-1");

        assert!(parse_header("x.y").is_err());

        let none = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","kid":"k"}"#);
        assert!(parse_header(&format!("{none}.e30.")).is_err());
    }

    #[test]
    fn verdict_deserializes_with_and_without_claims() {
        let valid: Verdict = serde_json::from_str(
            r#"{"valid":true,"status":"valid","claims":{"iss":"i","sub":"s","user_id":"u-42","exp":1,"iat":1,"jti":"1"}}"#,
        )
        .unwrap();
        assert!(valid.is_valid());
        let claims = valid.claims.unwrap();
        assert_eq!(claims.sub, "s");
        assert_eq!(claims.user_id.as_deref(), Some("u-42"));

        let retired: Verdict = serde_json::from_str(
            r#"{"valid":false,"status":"retired_key"}"#,
        )
        .unwrap();
        assert!(!retired.is_valid());
        assert!(retired.claims.is_none());

        let malformed: Verdict = serde_json::from_str(
            r#"{"valid":false,"status":"malformed","failure_reason":"not a JWT"}"#,
        )
        .unwrap();
        assert_eq!(malformed.failure_reason.as_deref(), Some("not a JWT"));
    }
}
