mod sign;
mod verify;

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

pub use sign::{SignedToken, TokenSigner};
pub use verify::{TokenVerifier, VerifyStatus};

/// Registered claims plus free-form attributes carried through flattened.
#[derive(
    Debug, Clone, Serialize, Deserialize, Default, PartialEq, ToSchema,
)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_seq",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aud: Vec<String>,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    pub iat: i64,
    pub jti: String,
    #[serde(flatten)]
    pub attributes: HashMap<String, serde_json::Value>,
}

/// Payload members owned by the signer. Attributes flatten into the same
/// JSON object, so letting a caller reuse one of these names would emit a
/// duplicate member and hand last-wins parsers a forged value.
pub(crate) const RESERVED_CLAIMS: [&str; 9] = [
    "iss",
    "sub",
    "user_id",
    "account_id",
    "aud",
    "exp",
    "nbf",
    "iat",
    "jti",
];

fn check_attributes(
    attributes: &HashMap<String, serde_json::Value>,
) -> std::result::Result<(), ValidationError> {
    if attributes
        .keys()
        .any(|name| RESERVED_CLAIMS.contains(&name.as_str()))
    {
        return Err(ValidationError::new(
            "attribute shadows a registered claim",
        ));
    }
    Ok(())
}

// `aud` is a single string or an array on the wire (RFC 7519 §4.1.3)
fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Aud {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Aud::deserialize(deserializer)? {
        Aud::One(v) => vec![v],
        Aud::Many(v) => v,
    })
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SignRequest {
    #[validate(length(min = 1, max = 255))]
    pub sub: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub aud: Vec<String>,
    /// Lifetime in seconds; the configured default applies when absent.
    #[serde(default)]
    #[validate(range(min = 1, max = 86400))]
    pub ttl: Option<i64>,
    #[serde(default)]
    #[validate(custom(function = "check_attributes"))]
    pub attributes: HashMap<String, serde_json::Value>,
}
