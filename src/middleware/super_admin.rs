use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::AppState;

/// Extractor guarding the website administration routes. Validates the
/// `X-Super-Admin-Key` header against `config.super_admin_key`.
pub struct SuperAdminAuth;

impl FromRequestParts<AppState> for SuperAdminAuth {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get("X-Super-Admin-Key")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing X-Super-Admin-Key header"))?;

        if !key_matches(key, &state.config.super_admin_key) {
            return Err((StatusCode::UNAUTHORIZED, "Invalid super-admin key"));
        }

        Ok(SuperAdminAuth)
    }
}

/// Compares without short-circuiting on the first differing byte.
fn key_matches(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len()
        && !expected.is_empty()
        && provided
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
