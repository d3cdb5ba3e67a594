use crate::error::{AppError, Result};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Bearer token claims. Identity issuance lives outside this service; we
/// only verify tokens signed with the shared secret.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

impl Claims {
    #[must_use]
    pub fn new(user_id: Uuid, ttl_secs: u64) -> Self {
        let expiration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(std::time::Duration::from_secs(0))
            .as_secs() as usize
            + ttl_secs as usize;

        Self { sub: user_id, exp: expiration }
    }

    pub fn encode(&self, secret: &str) -> Result<String> {
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|_| AppError::Internal("Failed to encode token".to_string()))
    }

    pub fn decode(token: &str, secret: &str) -> Result<Self> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AppError::AuthError)?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_roundtrip() {
        let user_id = Uuid::new_v4();
        let secret = "test_secret";
        let claims = Claims::new(user_id, 3600);

        let token = claims.encode(secret).unwrap();
        let decoded = Claims::decode(&token, secret).unwrap();

        assert_eq!(claims, decoded);
    }

    #[test]
    fn test_claims_invalid_secret() {
        let user_id = Uuid::new_v4();
        let claims = Claims::new(user_id, 3600);
        let token = claims.encode("secret1").unwrap();

        let result = Claims::decode(&token, "secret2");
        assert!(matches!(result, Err(AppError::AuthError)));
    }

    #[test]
    fn test_claims_expired_token_rejected() {
        let user_id = Uuid::new_v4();
        let claims = Claims { sub: user_id, exp: 1 };
        let token = claims.encode("secret").unwrap();

        let result = Claims::decode(&token, "secret");
        assert!(matches!(result, Err(AppError::AuthError)));
    }
}
