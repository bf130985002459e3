pub mod jwks;
pub mod service_auth;
pub mod verify;

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

pub use jwks::JwksCache;
pub use service_auth::{ServiceAuthConfig, ServiceAuthHelper};
pub use verify::{LocalVerifier, RemoteVerifier, Verdict};

pub fn version() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Claims as issued by the token endpoint; unknown members land in
/// `attributes`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
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
