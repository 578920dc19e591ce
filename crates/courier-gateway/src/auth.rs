use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use courier_types::api::Claims;
use courier_types::{ChatError, ChatResult, UserId};

/// Turns a client credential into a user id.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, token: &str) -> ChatResult<UserId>;
}

/// HS256 JWTs whose `sub` is the numeric user id.
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: UserId, ttl: chrono::Duration) -> ChatResult<String> {
        let claims = Claims {
            sub: user_id,
            exp: (chrono::Utc::now() + ttl).timestamp().max(0) as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ChatError::Fatal(format!("failed to sign token: {}", e)))
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn verify(&self, token: &str) -> ChatResult<UserId> {
        if token.is_empty() {
            return Err(ChatError::Auth("missing credential".into()));
        }

        let token_data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|e| ChatError::Auth(format!("invalid credential: {}", e)))?;

        Ok(token_data.claims.sub)
    }
}

/// Pull the credential out of an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}
