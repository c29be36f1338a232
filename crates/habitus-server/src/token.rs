//! HS256 access tokens whose subject is the user's email.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use devcollab_settings::MIN_JWT_SECRET_BYTES;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("JWT secret is not valid base64: {0}")]
    InvalidSecret(#[from] base64::DecodeError),

    #[error("JWT secret decodes to {0} bytes, need at least {MIN_JWT_SECRET_BYTES}")]
    WeakSecret(usize),

    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    /// Keys from a base64 secret of at least [`MIN_JWT_SECRET_BYTES`]. A
    /// missing or blank secret gets a random key, so tokens do not survive a
    /// restart.
    pub fn new(secret: Option<&SecretString>, ttl: Duration) -> Result<Self, TokenError> {
        let configured = secret
            .map(|s| s.expose_secret().trim())
            .filter(|s| !s.is_empty());
        let key = match configured {
            Some(secret) => {
                let key = STANDARD.decode(secret)?;
                if key.len() < MIN_JWT_SECRET_BYTES {
                    return Err(TokenError::WeakSecret(key.len()));
                }
                key
            }
            None => {
                tracing::warn!("no JWT secret configured, using a per-process key");
                let mut key = vec![0u8; MIN_JWT_SECRET_BYTES];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Ok(Self {
            encoding: EncodingKey::from_secret(&key),
            decoding: DecodingKey::from_secret(&key),
            validation,
            ttl,
        })
    }

    pub fn issue(&self, subject: &str) -> Result<String, TokenError> {
        self.issue_at(subject, Utc::now())
    }

    pub fn issue_at(&self, subject: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Check signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        Ok(jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)?.claims)
    }
}
