use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;

use signet_slo::{errors, Result};
use signet_storage::key::{Algorithm, PrivateMaterial, PublicJwk};

/// Mints fresh key pairs: PKCS#8 PEM private material plus the matching
/// public JWK.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyGenerator;

impl KeyGenerator {
    pub fn generate(
        algorithm: Algorithm,
        kid: &str,
    ) -> Result<(PublicJwk, PrivateMaterial)> {
        let (pem, jwk) = match algorithm {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                Self::generate_rsa(algorithm, kid)?
            }
            Algorithm::ES256 => Self::generate_p256(kid)?,
            Algorithm::ES384 => Self::generate_p384(kid)?,
            Algorithm::EdDSA => Self::generate_ed25519(kid)?,
        };
        Ok((jwk, PrivateMaterial { algorithm, pem }))
    }

    fn generate_rsa(
        algorithm: Algorithm,
        kid: &str,
    ) -> Result<(String, PublicJwk)> {
        let mut rng = rand::thread_rng();
        let private_key =
            rsa::RsaPrivateKey::new(&mut rng, 2048).map_err(errors::any)?;
        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(errors::any)?
            .to_string();

        let jwk = PublicJwk {
            kty: "RSA".to_owned(),
            key_use: "sig".to_owned(),
            alg: algorithm.to_string(),
            kid: kid.to_owned(),
            n: Some(URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be())),
            e: Some(URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be())),
            ..Default::default()
        };
        Ok((pem, jwk))
    }

    fn generate_p256(kid: &str) -> Result<(String, PublicJwk)> {
        let secret = p256::SecretKey::random(&mut rand::thread_rng());
        let pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(errors::any)?
            .to_string();

        let point = secret.public_key().to_encoded_point(false);
        let (x, y) = match (point.x(), point.y()) {
            (Some(x), Some(y)) => (x.to_vec(), y.to_vec()),
            _ => {
                return Err(errors::anyhow(anyhow::anyhow!(
                    "generated P-256 point is not affine"
                )))
            }
        };
        let jwk = PublicJwk {
            kty: "EC".to_owned(),
            key_use: "sig".to_owned(),
            alg: Algorithm::ES256.to_string(),
            kid: kid.to_owned(),
            crv: Some("P-256".to_owned()),
            x: Some(URL_SAFE_NO_PAD.encode(x)),
            y: Some(URL_SAFE_NO_PAD.encode(y)),
            ..Default::default()
        };
        Ok((pem, jwk))
    }

    fn generate_p384(kid: &str) -> Result<(String, PublicJwk)> {
        let secret = p384::SecretKey::random(&mut rand::thread_rng());
        let pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(errors::any)?
            .to_string();

        let point = secret.public_key().to_encoded_point(false);
        let (x, y) = match (point.x(), point.y()) {
            (Some(x), Some(y)) => (x.to_vec(), y.to_vec()),
            _ => {
                return Err(errors::anyhow(anyhow::anyhow!(
                    "generated P-384 point is not affine"
                )))
            }
        };
        let jwk = PublicJwk {
            kty: "EC".to_owned(),
            key_use: "sig".to_owned(),
            alg: Algorithm::ES384.to_string(),
            kid: kid.to_owned(),
            crv: Some("P-384".to_owned()),
            x: Some(URL_SAFE_NO_PAD.encode(x)),
            y: Some(URL_SAFE_NO_PAD.encode(y)),
            ..Default::default()
        };
        Ok((pem, jwk))
    }

    fn generate_ed25519(kid: &str) -> Result<(String, PublicJwk)> {
        let signing_key =
            ed25519_dalek::SigningKey::generate(&mut rand::thread_rng());
        let pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(errors::any)?
            .to_string();

        let jwk = PublicJwk {
            kty: "OKP".to_owned(),
            key_use: "sig".to_owned(),
            alg: Algorithm::EdDSA.to_string(),
            kid: kid.to_owned(),
            crv: Some("Ed25519".to_owned()),
            x: Some(
                URL_SAFE_NO_PAD.encode(signing_key.verifying_key().as_bytes()),
            ),
            ..Default::default()
        };
        Ok((pem, jwk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_material_is_usable() {
        let (jwk, material) =
            KeyGenerator::generate(Algorithm::RS256, "k-rsa").unwrap();
        assert!(jwk.validate().is_ok());
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.e.as_deref(), Some("AQAB"));
        assert!(jsonwebtoken::EncodingKey::from_rsa_pem(
            material.pem.as_bytes()
        )
        .is_ok());
    }

    #[test]
    fn ec_material_is_usable() {
        for (alg, crv) in
            [(Algorithm::ES256, "P-256"), (Algorithm::ES384, "P-384")]
        {
            let (jwk, material) =
                KeyGenerator::generate(alg, "k-ec").unwrap();
            assert!(jwk.validate().is_ok());
            assert_eq!(jwk.crv.as_deref(), Some(crv));
            assert!(jsonwebtoken::EncodingKey::from_ec_pem(
                material.pem.as_bytes()
            )
            .is_ok());
        }
    }

    #[test]
    fn ed25519_material_is_usable() {
        let (jwk, material) =
            KeyGenerator::generate(Algorithm::EdDSA, "k-ed").unwrap();
        assert!(jwk.validate().is_ok());
        assert_eq!(jwk.crv.as_deref(), Some("Ed25519"));
        assert!(jsonwebtoken::EncodingKey::from_ed_pem(
            material.pem.as_bytes()
        )
        .is_ok());
    }
}
