//! HS256 identity tokens.

use chrono::{Duration, Utc};
use codebridge_core::{AccountId, IdentityVerifier, VerifyError};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct IssuedClaims<'a> {
    sub: &'a str,
    iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    sub: String,
    /// NumericDate; may be fractional.
    #[serde(default)]
    exp: Option<f64>,
}

/// Verifies (and issues) HS256 identity tokens with a shared secret.
pub struct HmacTokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl HmacTokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub"]);
        // exp is optional and checked against the f64 claim in `verify`.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verifier with a random per-process secret.
    pub fn random() -> Self {
        let key: [u8; 32] = rand::rng().random();
        Self::new(&key)
    }

    /// Issue a token for `account`. `None` issues a token without expiry.
    pub fn issue(
        &self,
        account: &str,
        ttl: Option<Duration>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = IssuedClaims {
            sub: account,
            iat: now.timestamp(),
            exp: ttl.map(|ttl| (now + ttl).timestamp()),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }
}

fn verify_error(err: jsonwebtoken::errors::Error) -> VerifyError {
    match err.kind() {
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        ErrorKind::InvalidSignature => VerifyError::BadSignature,
        ErrorKind::InvalidAlgorithm => VerifyError::UnsupportedAlgorithm("HS256 required".to_string()),
        ErrorKind::MissingRequiredClaim(_) => VerifyError::MissingSubject,
        _ => VerifyError::Malformed(err.to_string()),
    }
}

impl IdentityVerifier for HmacTokenVerifier {
    fn verify(&self, token: &str) -> Result<AccountId, VerifyError> {
        let header = decode_header(token).map_err(verify_error)?;
        if header.alg != Algorithm::HS256 {
            return Err(VerifyError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(verify_error)?
            .claims;

        if let Some(exp) = claims.exp {
            if Utc::now().timestamp() as f64 >= exp {
                return Err(VerifyError::Expired);
            }
        }
        if claims.sub.is_empty() {
            return Err(VerifyError::MissingSubject);
        }

        debug!(account = %claims.sub, "Identity token verified");
        Ok(AccountId::from(claims.sub))
    }
}
