use std::time::Duration;

use bcrypt::{hash, verify};
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{AuthPayload, PublicUser};
use crate::storage::{StoreError, Storage};

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no bearer token in request")]
    TokenMissing,
    #[error("token expired")]
    TokenExpired,
    #[error("token malformed or signature invalid")]
    TokenMalformed,
    #[error("token subject no longer exists")]
    UserRevoked,
    #[error("no account for that email")]
    InvalidEmail,
    #[error("password does not match")]
    InvalidPassword,
    #[error("token signing failed: {0}")]
    Signing(jsonwebtoken::errors::Error),
    #[error("password hash check failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenMissing => ApiError::Unauthorized("Unauthorized: Token not found"),
            AuthError::TokenExpired => ApiError::Unauthorized("Unauthorized: Token expired"),
            AuthError::TokenMalformed => ApiError::Unauthorized("Unauthorized: Token is invalid"),
            AuthError::UserRevoked => ApiError::Unauthorized("Unauthorized: Invalid user"),
            AuthError::InvalidEmail => ApiError::Unauthorized("Unauthorized: Email Invalid"),
            AuthError::InvalidPassword => ApiError::Unauthorized("Unauthorized: Password Invalid"),
            other => ApiError::server("Token Check", other),
        }
    }
}

/// Result of a successful login: a fresh token plus the caller's public
/// profile.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: PublicUser,
}

/// Issues and verifies HS256 bearer tokens.
///
/// Verification also checks the subject against the credential store, so a
/// token outlives neither its expiry nor its user. Logout is not tracked
/// here: a token stays valid until it expires.
#[derive(Clone)]
pub struct SessionAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expires_in: Duration,
    storage: Storage,
}

impl SessionAuthority {
    pub fn new(secret: &[u8], expires_in: Duration, storage: Storage) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            expires_in,
            storage,
        }
    }

    pub fn issue_token(&self, user_id: u64) -> Result<String, AuthError> {
        let issued_at = Utc::now().timestamp();
        let lifetime = i64::try_from(self.expires_in.as_secs()).unwrap_or(i64::MAX);
        let claims = AuthPayload {
            sub: user_id,
            iat: issued_at,
            exp: issued_at.saturating_add(lifetime),
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &AuthPayload) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(AuthError::Signing)
    }

    /// Returns the user id the token was issued for.
    pub fn verify(&self, token: &str) -> Result<u64, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let claims = decode::<AuthPayload>(token, &self.decoding, &validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenMalformed,
            })?
            .claims;

        if !self.storage.user_exists(claims.sub)? {
            debug!(user_id = claims.sub, "token for deleted user");
            return Err(AuthError::UserRevoked);
        }
        Ok(claims.sub)
    }

    pub fn authenticate(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let user = self
            .storage
            .find_user_by_email(email)?
            .ok_or(AuthError::InvalidEmail)?;
        if !verify_password(password, &user.password_hash)? {
            return Err(AuthError::InvalidPassword);
        }
        Ok(Session {
            token: self.issue_token(user.id)?,
            user: user.public(),
        })
    }
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::TokenMissing)?;
    match header.split_once(' ') {
        Some((scheme, token))
            if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() =>
        {
            Ok(token.trim())
        }
        _ => Err(AuthError::TokenMalformed),
    }
}
