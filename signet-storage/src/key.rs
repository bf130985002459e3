use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use signet_slo::{errors, Result};

/// Lifecycle state of a signing key.
///
/// `Active` signs and verifies, `Grace` only verifies, `Retired` does
/// neither. Verification lookups against a retired kid must fail closed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active = 1,
    Grace = 2,
    Retired = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    EnterGrace,
    Retire,
    ForceRetire,
}

impl KeyStatus {
    /// Total transition function. Every `(state, transition)` pair maps to
    /// either the next state or `InvalidTransition`.
    pub fn apply(self, transition: Transition) -> Result<KeyStatus> {
        match (self, transition) {
            (KeyStatus::Active, Transition::EnterGrace) => {
                Ok(KeyStatus::Grace)
            }
            (KeyStatus::Grace, Transition::Retire) => Ok(KeyStatus::Retired),
            (_, Transition::ForceRetire) => Ok(KeyStatus::Retired),
            (from, transition) => Err(errors::invalid_transition(&format!(
                "{:?} is not allowed from {}",
                transition, from
            ))),
        }
    }

    pub fn from_repr(value: u8) -> Option<KeyStatus> {
        match value {
            1 => Some(KeyStatus::Active),
            2 => Some(KeyStatus::Grace),
            3 => Some(KeyStatus::Retired),
            _ => None,
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStatus::Active => write!(f, "active"),
            KeyStatus::Grace => write!(f, "grace"),
            KeyStatus::Retired => write!(f, "retired"),
        }
    }
}

impl FromStr for KeyStatus {
    type Err = errors::WithBacktrace;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(KeyStatus::Active),
            "grace" => Ok(KeyStatus::Grace),
            "retired" => Ok(KeyStatus::Retired),
            _ => Err(errors::bad_request(&format!(
                "unknown key status: {value}"
            ))),
        }
    }
}

/// Supported signature algorithms.
///
/// ES512 is deliberately absent: the token stack has no P-521 support, so
/// tokens carrying it are rejected as unsupported rather than half-handled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema,
)]
pub enum Algorithm {
    RS256,
    RS384,
    RS512,
    ES256,
    ES384,
    EdDSA,
}

impl Algorithm {
    /// JWK key type for this algorithm (RFC 7518 §6.1).
    pub fn kty(&self) -> &'static str {
        match self {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => "RSA",
            Algorithm::ES256 | Algorithm::ES384 => "EC",
            Algorithm::EdDSA => "OKP",
        }
    }

    /// Curve name, fixed by the algorithm; `None` for RSA.
    pub fn crv(&self) -> Option<&'static str> {
        match self {
            Algorithm::ES256 => Some("P-256"),
            Algorithm::ES384 => Some("P-384"),
            Algorithm::EdDSA => Some("Ed25519"),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::RS256 => write!(f, "RS256"),
            Algorithm::RS384 => write!(f, "RS384"),
            Algorithm::RS512 => write!(f, "RS512"),
            Algorithm::ES256 => write!(f, "ES256"),
            Algorithm::ES384 => write!(f, "ES384"),
            Algorithm::EdDSA => write!(f, "EdDSA"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = errors::WithBacktrace;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "RS256" => Ok(Algorithm::RS256),
            "RS384" => Ok(Algorithm::RS384),
            "RS512" => Ok(Algorithm::RS512),
            "ES256" => Ok(Algorithm::ES256),
            "ES384" => Ok(Algorithm::ES384),
            "EdDSA" => Ok(Algorithm::EdDSA),
            _ => Err(errors::unsupported_algorithm(value)),
        }
    }
}

/// Public half of a signing key in JWK form (RFC 7517).
///
/// Field order matters: serialization must stay byte-stable so the JWKS
/// ETag only changes when the key set changes.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default,
)]
pub struct PublicJwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    pub kid: String,
    // RSA: n/e; EC: crv/x/y; OKP: crv/x
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl PublicJwk {
    pub fn validate(&self) -> Result<()> {
        if self.kid.is_empty() {
            return Err(errors::bad_request("jwk kid cannot be empty"));
        }
        if self.key_use != "sig" {
            return Err(errors::bad_request("jwk use must be \"sig\""));
        }
        if self.alg.is_empty() {
            return Err(errors::bad_request("jwk alg cannot be empty"));
        }
        let non_empty = |v: &Option<String>| {
            v.as_deref().is_some_and(|s| !s.is_empty())
        };
        match self.kty.as_str() {
            "RSA" => {
                if !non_empty(&self.n) || !non_empty(&self.e) {
                    return Err(errors::bad_request(
                        "n and e are required for RSA",
                    ));
                }
            }
            "EC" => {
                if !non_empty(&self.crv)
                    || !non_empty(&self.x)
                    || !non_empty(&self.y)
                {
                    return Err(errors::bad_request(
                        "crv, x and y are required for EC",
                    ));
                }
            }
            "OKP" => {
                if !non_empty(&self.crv) || !non_empty(&self.x) {
                    return Err(errors::bad_request(
                        "crv and x are required for OKP",
                    ));
                }
            }
            other => {
                return Err(errors::bad_request(&format!(
                    "unsupported key type: {other}"
                )));
            }
        }
        Ok(())
    }
}

/// JSON Web Key Set, ordered by kid ascending for deterministic output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Jwks {
    pub keys: Vec<PublicJwk>,
}

impl Jwks {
    pub fn find_by_kid(&self, kid: &str) -> Option<&PublicJwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// A signing key record as stored in the public-key repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Key {
    pub kid: String,
    pub status: KeyStatus,
    pub algorithm: Algorithm,
    pub public_jwk: PublicJwk,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Key {
    fn default() -> Self {
        Self {
            kid: String::new(),
            status: KeyStatus::Active,
            algorithm: Algorithm::RS256,
            public_jwk: PublicJwk::default(),
            not_before: None,
            not_after: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Key {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after.is_some_and(|t| now >= t)
    }

    pub fn is_not_yet_valid(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_some_and(|t| now < t)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_not_yet_valid(now)
    }

    /// Only an active key inside its validity window signs.
    pub fn can_sign(&self, now: DateTime<Utc>) -> bool {
        self.status == KeyStatus::Active && self.is_valid_at(now)
    }

    /// Active and grace keys verify.
    pub fn can_verify(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, KeyStatus::Active | KeyStatus::Grace)
            && self.is_valid_at(now)
    }

    /// Publishable keys land in `/.well-known/jwks.json`.
    pub fn should_publish(&self, now: DateTime<Utc>) -> bool {
        self.can_verify(now)
    }

    /// Applies a lifecycle transition through the lookup table.
    pub fn transition(&mut self, transition: Transition) -> Result<()> {
        self.status = self.status.apply(transition)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Enforces the record invariants before persistence.
    pub fn validate(&self) -> Result<()> {
        if self.kid.is_empty() {
            return Err(errors::bad_request("kid cannot be empty"));
        }
        if self.public_jwk.kid != self.kid {
            return Err(errors::bad_request(
                "key kid and jwk kid must be equal",
            ));
        }
        if self.public_jwk.alg != self.algorithm.to_string() {
            return Err(errors::bad_request(
                "key algorithm and jwk alg must be equal",
            ));
        }
        if self.public_jwk.kty != self.algorithm.kty() {
            return Err(errors::bad_request(
                "jwk kty does not match the algorithm",
            ));
        }
        self.public_jwk.validate()?;
        if let (Some(nb), Some(na)) = (self.not_before, self.not_after) {
            if nb >= na {
                return Err(errors::bad_request(
                    "not_before must precede not_after",
                ));
            }
        }
        Ok(())
    }
}

/// Private key material, opaque outside the private-key store and signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMaterial {
    pub algorithm: Algorithm,
    /// PKCS#8 PEM encoding of the private key.
    pub pem: String,
}

/// Rotation policy, durations in seconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema,
)]
pub struct RotationPolicy {
    pub rotation_interval: i64,
    pub grace_period: i64,
    pub max_keys_in_jwks: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            rotation_interval: 30 * 24 * 60 * 60,
            grace_period: 7 * 24 * 60 * 60,
            max_keys_in_jwks: 3,
        }
    }
}

impl RotationPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.rotation_interval <= 0 {
            return Err(errors::bad_request(
                "rotation interval must be positive",
            ));
        }
        if self.grace_period <= 0 {
            return Err(errors::bad_request("grace period must be positive"));
        }
        if self.max_keys_in_jwks < 2 {
            return Err(errors::bad_request(
                "max keys in jwks must be at least 2",
            ));
        }
        if self.grace_period >= self.rotation_interval {
            return Err(errors::bad_request(
                "grace period must be shorter than the rotation interval",
            ));
        }
        Ok(())
    }
}

/// Filters for key listing and sweeps.
#[derive(Debug, Default, Clone)]
pub struct ListParams {
    pub status: Option<KeyStatus>,
    /// Keys publishable at the given instant: status in {active, grace} and
    /// the validity window contains it.
    pub publishable_at: Option<DateTime<Utc>>,
    /// Keys whose `not_after` is strictly before the given instant.
    pub expired_before: Option<DateTime<Utc>>,
    pub pagination: crate::Pagination,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn rsa_jwk(kid: &str) -> PublicJwk {
        PublicJwk {
            kty: "RSA".to_owned(),
            key_use: "sig".to_owned(),
            alg: "RS256".to_owned(),
            kid: kid.to_owned(),
            n: Some("sXchTestModulus".to_owned()),
            e: Some("AQAB".to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn status_transitions_are_total() {
        assert_eq!(
            KeyStatus::Active.apply(Transition::EnterGrace).unwrap(),
            KeyStatus::Grace
        );
        assert_eq!(
            KeyStatus::Grace.apply(Transition::Retire).unwrap(),
            KeyStatus::Retired
        );
        for status in
            [KeyStatus::Active, KeyStatus::Grace, KeyStatus::Retired]
        {
            assert_eq!(
                status.apply(Transition::ForceRetire).unwrap(),
                KeyStatus::Retired
            );
        }
        assert!(KeyStatus::Grace.apply(Transition::EnterGrace).is_err());
        assert!(KeyStatus::Active.apply(Transition::Retire).is_err());
        assert!(KeyStatus::Retired.apply(Transition::Retire).is_err());
    }

    #[test]
    fn jwk_structural_validation() {
        let mut jwk = rsa_jwk("k-001");
        assert!(jwk.validate().is_ok());

        jwk.e = None;
        assert!(jwk.validate().is_err());

        let ec = PublicJwk {
            kty: "EC".to_owned(),
            key_use: "sig".to_owned(),
            alg: "ES256".to_owned(),
            kid: "k-002".to_owned(),
            crv: Some("P-256".to_owned()),
            x: Some("x".to_owned()),
            y: Some("y".to_owned()),
            ..Default::default()
        };
        assert!(ec.validate().is_ok());

        let okp_missing_x = PublicJwk {
            kty: "OKP".to_owned(),
            key_use: "sig".to_owned(),
            alg: "EdDSA".to_owned(),
            kid: "k-003".to_owned(),
            crv: Some("Ed25519".to_owned()),
            ..Default::default()
        };
        assert!(okp_missing_x.validate().is_err());

        let enc = PublicJwk {
            key_use: "enc".to_owned(),
            ..rsa_jwk("k-004")
        };
        assert!(enc.validate().is_err());
    }

    #[test]
    fn key_invariants() {
        let now = Utc::now();
        let mut key = Key {
            kid: "k-001".to_owned(),
            algorithm: Algorithm::RS256,
            public_jwk: rsa_jwk("k-001"),
            not_before: Some(now),
            not_after: Some(now + Duration::days(37)),
            ..Default::default()
        };
        assert!(key.validate().is_ok());

        key.public_jwk.kid = "k-999".to_owned();
        assert!(key.validate().is_err());
        key.public_jwk.kid = "k-001".to_owned();

        key.not_after = Some(now - Duration::seconds(1));
        assert!(key.validate().is_err());
    }

    #[test]
    fn validity_window_gates_capabilities() {
        let now = Utc::now();
        let mut key = Key {
            kid: "k-001".to_owned(),
            public_jwk: rsa_jwk("k-001"),
            not_before: Some(now - Duration::hours(1)),
            not_after: Some(now + Duration::hours(1)),
            ..Default::default()
        };
        assert!(key.can_sign(now));
        assert!(key.should_publish(now));

        key.transition(Transition::EnterGrace).unwrap();
        assert!(!key.can_sign(now));
        assert!(key.can_verify(now));
        assert!(key.should_publish(now));

        key.transition(Transition::Retire).unwrap();
        assert!(!key.can_verify(now));
        assert!(!key.should_publish(now));

        // expired window blocks even an active key
        let expired = Key {
            kid: "k-002".to_owned(),
            public_jwk: rsa_jwk("k-002"),
            not_after: Some(now - Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!expired.can_sign(now));
    }

    #[test]
    fn policy_validation() {
        assert!(RotationPolicy::default().validate().is_ok());
        assert!(RotationPolicy {
            rotation_interval: 60,
            grace_period: 60,
            max_keys_in_jwks: 3,
        }
        .validate()
        .is_err());
        assert!(RotationPolicy {
            rotation_interval: 600,
            grace_period: 60,
            max_keys_in_jwks: 1,
        }
        .validate()
        .is_err());
    }

    #[test]
    fn algorithm_parsing_rejects_outsiders() {
        assert_eq!("RS256".parse::<Algorithm>().unwrap(), Algorithm::RS256);
        assert_eq!("EdDSA".parse::<Algorithm>().unwrap(), Algorithm::EdDSA);
        assert!("ES512".parse::<Algorithm>().is_err());
        assert!("none".parse::<Algorithm>().is_err());
        assert!("HS256".parse::<Algorithm>().is_err());
    }
}
