//! HS256 token verification and (for dev tooling and tests) issuance.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use doccollab_core::UserId;

use crate::errors::AuthError;

/// Claims carried by a doccollab bearer token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user this token authenticates.
    pub sub: String,
    /// Expiry as unix seconds.
    pub exp: i64,
}

/// Verifies bearer tokens against the shared signing secret.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Build a verifier from the shared secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // No leeway: an expired token is expired.
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verify a token and return the authenticated user.
    ///
    /// A missing token (`None`) fails identically to an invalid one, just
    /// with a message telling the client to authenticate.
    pub fn verify(&self, token: Option<&str>) -> Result<UserId, AuthError> {
        let Some(token) = token else {
            return Err(AuthError::MissingToken);
        };
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Ok(UserId::from(data.claims.sub)),
            Err(err) => match err.kind() {
                ErrorKind::ExpiredSignature => {
                    debug!("rejected expired token");
                    Err(AuthError::Expired)
                }
                _ => {
                    debug!(error = %err, "rejected unverifiable token");
                    Err(AuthError::Invalid(err))
                }
            },
        }
    }
}

/// Issues tokens signed with the shared secret.
///
/// In production tokens come from the login service; this issuer exists for
/// local development and tests.
pub struct TokenIssuer {
    key: EncodingKey,
}

impl TokenIssuer {
    /// Build an issuer from the shared secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
        }
    }

    /// Issue a token for `user` valid for `ttl_secs` seconds.
    ///
    /// A negative TTL produces an already-expired token (used by tests).
    pub fn issue(&self, user: &UserId, ttl_secs: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user.as_str().to_owned(),
            exp: (Utc::now() + Duration::seconds(ttl_secs)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.key)
    }
}
