use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::models::auth::{AuthenticatedUser, Claims};
use crate::AppState;

/// The caller's identity when a valid bearer token is present.
///
/// Public pages accept anonymous callers, so a missing or invalid token yields
/// `MaybeUser(None)` rather than a rejection.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<AuthenticatedUser>);

impl MaybeUser {
    pub fn is_authenticated(&self) -> bool {
        self.0.is_some()
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));

        let user = match token {
            Some(token) => match decode_access_token(token, &state.config.jwt_secret) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::debug!("ignoring invalid bearer token: {e}");
                    None
                }
            },
            None => None,
        };
        Ok(MaybeUser(user))
    }
}

pub fn decode_access_token(token: &str, secret: &str) -> Result<AuthenticatedUser, anyhow::Error> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &key, &validation)?;
    let claims = data.claims;

    Ok(AuthenticatedUser {
        user_id: claims.sub.parse()?,
    })
}
