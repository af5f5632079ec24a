//! Signed access and refresh tokens.
//!
//! Access tokens carry `{id, role}` and live for `auth.access_token_ttl`. Refresh tokens carry
//! `{id, iat}` plus a random `jti` and live for `auth.refresh_token_ttl`. The two kinds are signed
//! with different HS256 secrets, so a token of one kind never verifies as the other. Expiry is
//! enforced here, with no leeway; callers never re-check `exp`.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::models::users::{CurrentUser, Role},
    config::AuthConfig,
    errors::Error,
    types::UserId,
};

/// Claims of a short-lived access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub id: UserId,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl From<AccessClaims> for CurrentUser {
    fn from(claims: AccessClaims) -> Self {
        Self {
            id: claims.id,
            role: claims.role,
        }
    }
}

/// Claims of a long-lived refresh token. `iat` is epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub id: UserId,
    pub iat: i64,
    pub exp: i64,
    /// Distinguishes tokens minted for the same user within the same second
    pub jti: Uuid,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Mints and verifies both token kinds.
pub struct TokenIssuer {
    access: SigningKeys,
    refresh: SigningKeys,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Result<Self, Error> {
        let secret = |value: &Option<String>, name: &str| {
            value.as_deref().filter(|s| !s.is_empty()).map(SigningKeys::from_secret).ok_or_else(|| Error::Internal {
                operation: format!("create token issuer: {name} is required"),
            })
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        Ok(Self {
            access: secret(&config.access_token_secret, "auth.access_token_secret")?,
            refresh: secret(&config.refresh_token_secret, "auth.refresh_token_secret")?,
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
            validation,
        })
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_access_token(&self, user_id: UserId, role: Role) -> Result<String, Error> {
        let iat = Utc::now().timestamp();
        let claims = AccessClaims {
            id: user_id,
            role,
            iat,
            exp: expires_at(iat, self.access_ttl)?,
        };
        sign(&claims, &self.access.encoding)
    }

    /// Mint a refresh token issued at `iat` (epoch seconds).
    pub fn issue_refresh_token(&self, user_id: UserId, iat: i64) -> Result<String, Error> {
        let claims = RefreshClaims {
            id: user_id,
            iat,
            exp: expires_at(iat, self.refresh_ttl)?,
            jti: Uuid::new_v4(),
        };
        sign(&claims, &self.refresh.encoding)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, Error> {
        decode::<AccessClaims>(token, &self.access.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| verification_error(e, "Invalid or expired token"))
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, Error> {
        decode::<RefreshClaims>(token, &self.refresh.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| verification_error(e, "Invalid or expired refresh token"))
    }
}

fn expires_at(iat: i64, ttl: Duration) -> Result<i64, Error> {
    i64::try_from(ttl.as_secs())
        .ok()
        .and_then(|secs| iat.checked_add(secs))
        .ok_or_else(|| Error::Internal {
            operation: format!("compute token expiry for ttl {ttl:?}"),
        })
}

fn sign<T: Serialize>(claims: &T, key: &EncodingKey) -> Result<String, Error> {
    encode(&Header::new(Algorithm::HS256), claims, key).map_err(|e| Error::Internal {
        operation: format!("sign token: {e}"),
    })
}

/// Client-caused failures collapse into one generic 401 message; key and library failures are 500s.
fn verification_error(e: jsonwebtoken::errors::Error, message: &str) -> Error {
    match e.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm => Error::unauthenticated(message),

        ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::RsaFailedSigning
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::MissingAlgorithm
        | ErrorKind::Crypto(_) => Error::Internal {
            operation: format!("verify token: {e}"),
        },

        _ => Error::Internal {
            operation: format!("verify token (unknown error): {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config() -> AuthConfig {
        AuthConfig {
            access_token_secret: Some("access-secret".to_string()),
            refresh_token_secret: Some("refresh-secret".to_string()),
            ..Default::default()
        }
    }

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&auth_config()).unwrap()
    }

    fn message(err: Error) -> String {
        match err {
            Error::Unauthenticated { message } => message.unwrap_or_default(),
            other => panic!("expected Unauthenticated, got {other:?}"),
        }
    }

    #[test]
    fn test_access_token_round_trip() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();

        let token = issuer.issue_access_token(user_id, Role::Admin).unwrap();
        let claims = issuer.verify_access(&token).unwrap();

        assert_eq!(CurrentUser::from(claims.clone()), CurrentUser { id: user_id, role: Role::Admin });
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn test_refresh_token_round_trip_keeps_iat() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();
        let iat = Utc::now().timestamp();

        let token = issuer.issue_refresh_token(user_id, iat).unwrap();
        let claims = issuer.verify_refresh(&token).unwrap();

        assert_eq!(claims.id, user_id);
        assert_eq!(claims.iat, iat);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn test_same_second_refresh_tokens_differ() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();
        let iat = Utc::now().timestamp();

        assert_ne!(
            issuer.issue_refresh_token(user_id, iat).unwrap(),
            issuer.issue_refresh_token(user_id, iat).unwrap()
        );
    }

    #[test]
    fn test_token_kinds_do_not_cross_verify() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();

        let access = issuer.issue_access_token(user_id, Role::Cashier).unwrap();
        let refresh = issuer.issue_refresh_token(user_id, Utc::now().timestamp()).unwrap();

        assert_eq!(message(issuer.verify_refresh(&access).unwrap_err()), "Invalid or expired refresh token");
        assert_eq!(message(issuer.verify_access(&refresh).unwrap_err()), "Invalid or expired token");
    }

    #[test]
    fn test_expired_access_token_rejected() {
        let issuer = issuer();
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            id: Uuid::new_v4(),
            role: Role::Admin,
            iat: now - 16 * 60,
            exp: now - 60,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"access-secret")).unwrap();

        assert_eq!(message(issuer.verify_access(&token).unwrap_err()), "Invalid or expired token");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let user_id = Uuid::new_v4();
        let token = issuer().issue_access_token(user_id, Role::Admin).unwrap();

        let other = TokenIssuer::new(&AuthConfig {
            access_token_secret: Some("another-secret".to_string()),
            ..auth_config()
        })
        .unwrap();

        assert!(matches!(other.verify_access(&token), Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_malformed_tokens_are_client_errors() {
        let issuer = issuer();
        for token in ["not.a.token", "invalid", "", "too.many.parts.in.this.token"] {
            assert!(
                matches!(issuer.verify_access(token), Err(Error::Unauthenticated { .. })),
                "expected Unauthenticated for {token:?}"
            );
        }
    }

    #[test]
    fn test_out_of_range_ttl_is_internal_error() {
        let issuer = TokenIssuer::new(&AuthConfig {
            access_token_ttl: Duration::from_secs(u64::MAX),
            refresh_token_ttl: Duration::from_secs(i64::MAX as u64),
            ..auth_config()
        })
        .unwrap();
        let user_id = Uuid::new_v4();

        assert!(matches!(issuer.issue_access_token(user_id, Role::Admin), Err(Error::Internal { .. })));
        assert!(matches!(
            issuer.issue_refresh_token(user_id, Utc::now().timestamp()),
            Err(Error::Internal { .. })
        ));
    }

    #[test]
    fn test_missing_secret_is_internal_error() {
        let config = AuthConfig {
            refresh_token_secret: None,
            ..auth_config()
        };
        assert!(matches!(TokenIssuer::new(&config), Err(Error::Internal { .. })));
    }
}
