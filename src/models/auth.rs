use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims embedded in the JWT access token issued by the admin app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user UUID
    pub exp: usize,
    pub iat: usize,
}

/// Extracted from a validated JWT. Any authenticated caller may preview
/// inactive websites.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}
