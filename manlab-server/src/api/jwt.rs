//! JWT validation for dashboard requests.
//!
//! The server only validates tokens; minting lives in the external auth
//! service. Token generation is kept for tests.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User ID (subject)
    pub sub: String,
    /// User roles for authorization
    pub roles: Vec<String>,
    /// Token issuer
    pub iss: String,
    /// Token audience
    pub aud: String,
    /// Expiration timestamp (Unix)
    pub exp: u64,
    /// Issued at timestamp (Unix)
    pub iat: u64,
}

/// JWT service error types.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token generation failed: {0}")]
    TokenGeneration(String),
    #[error("Token validation failed: {0}")]
    TokenValidation(String),
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token")]
    InvalidToken,
}

/// JWT validation service.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    expiration_secs: u64,
}

impl JwtService {
    /// Create a new JWT service.
    pub fn new(secret: &str, issuer: &str, audience: &str, expiration_secs: Option<u64>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            expiration_secs: expiration_secs.unwrap_or(3600),
        }
    }

    /// Generate a token. Dashboards get theirs from the auth collaborator;
    /// this exists for tests and tooling.
    pub fn generate_token(&self, user_id: &str, roles: Vec<String>) -> Result<String, JwtError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))?
            .as_secs();

        let claims = Claims {
            sub: user_id.to_string(),
            roles,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: now + self.expiration_secs,
            iat: now,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))
    }

    /// Validate a JWT token and extract claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidToken,
                _ => JwtError::TokenValidation(e.to_string()),
            })
    }
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiration_secs", &self.expiration_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service() -> JwtService {
        JwtService::new(
            "test-secret-key-32-chars-long!!",
            "test-issuer",
            "test-audience",
            Some(3600),
        )
    }

    #[test]
    fn test_generate_and_validate_token() {
        let service = create_test_service();
        let token = service
            .generate_token("user123", vec!["admin".to_string()])
            .expect("Token generation should succeed");

        let claims = service
            .validate_token(&token)
            .expect("Token validation should succeed");

        assert_eq!(claims.sub, "user123");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-audience");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_invalid_token() {
        let service = create_test_service();
        let result = service.validate_token("invalid.token.here");
        assert!(matches!(
            result,
            Err(JwtError::InvalidToken) | Err(JwtError::TokenValidation(_))
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let service1 =
            JwtService::new("secret1-32-chars-long-key!!!!!", "issuer", "audience", None);
        let service2 =
            JwtService::new("secret2-32-chars-long-key!!!!!", "issuer", "audience", None);

        let token = service1.generate_token("user", vec![]).unwrap();
        assert!(matches!(
            service2.validate_token(&token),
            Err(JwtError::InvalidToken)
        ));
    }
}
