//! Auth gate: bearer-token issuance and verification for the admin role,
//! plus argon2 password-hash checking for the login flow.
//!
//! Tokens are HS256 JWTs carrying subject, issuer, and expiry. The gate is
//! stateless; revocation is out of scope.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use argon2::password_hash::{PasswordHasher, SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Errors produced by the auth gate.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong email/password, or a token that fails verification.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Token could not be created or parsed.
    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    /// Stored password hash is not a valid PHC string.
    #[error("password hash error: {0}")]
    Hash(String),
    /// System clock before the Unix epoch.
    #[error("system time error: {0}")]
    Clock(String),
}

/// Claims carried by an admin bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the admin's email.
    pub sub: String,
    /// Issued at (Unix seconds).
    pub iat: u64,
    /// Expiration (Unix seconds).
    pub exp: u64,
    /// Issuer.
    pub iss: String,
    /// Token id.
    pub jti: String,
}

/// Stateless credential verifier and token issuer.
#[derive(Clone)]
pub struct AuthGate {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .field("encoding_key", &"[REDACTED]")
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

impl AuthGate {
    pub fn new(secret: &str, issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            ttl,
        }
    }

    /// Issues a bearer token for the given subject, valid for the
    /// configured TTL.
    pub fn issue_token(&self, subject: &str) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::Clock(e.to_string()))?
            .as_secs();

        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        debug!("Issued token for subject: {}", subject);
        Ok(token)
    }

    /// Verifies signature, expiry, and issuer; returns the claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| AuthError::InvalidCredentials)?;
        Ok(data.claims)
    }

    /// Checks a plaintext password against a stored argon2 PHC string.
    pub fn verify_password(&self, hash: &str, password: &str) -> Result<(), AuthError> {
        let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Hash(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidCredentials)
    }

    /// Hashes a plaintext password for storage (admin seeding).
    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AuthGate {
        AuthGate::new("test-secret", "storefront-test", Duration::from_secs(3600))
    }

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let gate = gate();
        let token = gate.issue_token("admin@example.com").unwrap();
        let claims = gate.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "admin@example.com");
        assert_eq!(claims.iss, "storefront-test");
        assert_eq!(claims.exp, claims.iat + 3600);
    }

    #[test]
    fn test_reject_tampered_token() {
        let gate = gate();
        let mut token = gate.issue_token("admin@example.com").unwrap();
        token.push('x');
        assert!(matches!(
            gate.verify_token(&token),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_reject_foreign_secret() {
        let issuer_gate = AuthGate::new("other-secret", "storefront-test", Duration::from_secs(3600));
        let token = issuer_gate.issue_token("admin@example.com").unwrap();
        assert!(gate().verify_token(&token).is_err());
    }

    #[test]
    fn test_reject_wrong_issuer() {
        let issuer_gate = AuthGate::new("test-secret", "someone-else", Duration::from_secs(3600));
        let token = issuer_gate.issue_token("admin@example.com").unwrap();
        assert!(gate().verify_token(&token).is_err());
    }

    #[test]
    fn test_reject_expired_token() {
        let gate = gate();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let claims = Claims {
            sub: "admin@example.com".to_string(),
            iat: now - 7200,
            exp: now - 3600,
            iss: "storefront-test".to_string(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(gate.verify_token(&token).is_err());
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let gate = gate();
        let hash = gate.hash_password("hunter2").unwrap();
        assert!(gate.verify_password(&hash, "hunter2").is_ok());
        assert!(matches!(
            gate.verify_password(&hash, "hunter3"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_malformed_hash_is_not_credentials_error() {
        let gate = gate();
        assert!(matches!(
            gate.verify_password("not-a-phc-string", "hunter2"),
            Err(AuthError::Hash(_))
        ));
    }
}
