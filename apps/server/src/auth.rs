use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::http::{header, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, AppState};

/// Access token lifetime (15 minutes).
pub const ACCESS_TTL_SECS: i64 = 15 * 60;
/// Refresh token lifetime (7 days).
pub const REFRESH_TTL_SECS: i64 = 7 * 24 * 3600;
/// OTP codes expire after 5 minutes.
pub const OTP_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: i64,
    pub role: String,
    pub exp: usize,
}

/// Identity resolved from a bearer token plus the users table. Write
/// operations always use this email, never one from a request body.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: i64,
    pub email: String,
    pub role: String,
}

pub fn issue_token(user_id: i64, role: &str, secret: &str, ttl_secs: i64) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        role: role.to_string(),
        exp: (Utc::now().timestamp() + ttl_secs) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| anyhow::anyhow!("token encoding failed: {}", e))
}

pub fn decode_token(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the caller from the access token. The user row must still exist
/// and be active.
pub async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<AuthedUser, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".into()))?;
    let claims = decode_token(token, &state.access_token_secret)
        .ok_or_else(|| ApiError::Unauthorized("Invalid token".into()))?;

    let row = sqlx::query_as::<_, (i64, String, String, String)>(
        "SELECT id, email, role, status FROM users WHERE id = ?",
    )
    .bind(claims.sub)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    if row.3 != "active" {
        return Err(ApiError::Forbidden("Account disabled".into()));
    }

    Ok(AuthedUser {
        id: row.0,
        email: row.1,
        role: row.2,
    })
}

pub fn is_admin_role(role: &str) -> bool {
    role == "admin" || role == "superadmin"
}

/// Like `require_user` but also demands an admin/superadmin role claim.
pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<AuthedUser, ApiError> {
    let user = require_user(state, headers).await?;
    if !is_admin_role(&user.role) {
        return Err(ApiError::Forbidden("Admin access required".into()));
    }
    Ok(user)
}

/// 6-digit one-time code.
pub fn generate_otp() -> i64 {
    rand::thread_rng().gen_range(100_000..=999_999)
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

// ── Tests ──
