use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::{ApiErr, BrowserState};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id
    pub sub: i32,
    pub username: String,
    /// Unix timestamp expiry
    pub exp: u64,
}

impl Claims {
    /// Claims for `user_id` expiring `hours` from now.
    pub fn for_user(user_id: i32, username: &str, hours: u64) -> Self {
        Self {
            sub: user_id,
            username: username.to_string(),
            exp: Utc::now().timestamp().max(0) as u64 + hours * 3600,
        }
    }
}

pub fn encode_jwt(claims: &Claims, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims)
}

fn extract_bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Extractor: validates the Bearer token of a logged-in user. Every browser
/// query is scoped to [`AuthClaims::user_id`].
pub struct AuthClaims(pub Claims);

impl AuthClaims {
    pub fn user_id(&self) -> i32 {
        self.0.sub
    }
}

impl<S> FromRequestParts<S> for AuthClaims
where
    S: Send + Sync,
    BrowserState: FromRef<S>,
{
    type Rejection = ApiErr;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = BrowserState::from_ref(state);

        let token = extract_bearer(parts)
            .ok_or_else(|| ApiErr::unauthorized("Missing or invalid Authorization header"))?;

        let claims = decode_jwt(token, &state.jwt_secret).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            ApiErr::unauthorized("Invalid or expired token")
        })?;

        Ok(AuthClaims(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_wrong_secret() {
        let claims = Claims {
            sub: 3,
            username: "alice".into(),
            exp: u64::MAX / 2,
        };
        let token = encode_jwt(&claims, "secret").unwrap();
        assert_eq!(decode_jwt(&token, "secret").unwrap().sub, 3);
        assert!(decode_jwt(&token, "other").is_err());
    }

    #[test]
    fn test_for_user_expiry() {
        let claims = Claims::for_user(9, "bob", 2);
        let now = Utc::now().timestamp() as u64;
        assert!(claims.exp > now + 7000 && claims.exp <= now + 7200);
        assert_eq!(claims.sub, 9);
    }

    #[test]
    fn test_expired_token_rejected() {
        let claims = Claims {
            sub: 3,
            username: "alice".into(),
            exp: 1_000,
        };
        let token = encode_jwt(&claims, "secret").unwrap();
        assert!(decode_jwt(&token, "secret").is_err());
    }
}
