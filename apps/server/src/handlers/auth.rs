//! Session endpoints: OTP login for customers, password + OTP step-up for
//! admins. Tokens travel in JSON responses and come back as bearer headers.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::{
    auth::{self, ACCESS_TTL_SECS, OTP_TTL_SECS, REFRESH_TTL_SECS},
    error::ApiError,
    models::*,
    store::fmt_instant,
    AppState,
};

// ── Customer login ──

/// POST /api/send-otp
pub async fn send_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendOtpRequest>,
) -> Result<Json<SimpleOk>, ApiError> {
    if body.email.is_empty() || !body.email.contains('@') {
        return Err(ApiError::Validation("Email is required".into()));
    }

    let code = auth::generate_otp();
    let expires_at = fmt_instant(Utc::now() + Duration::seconds(OTP_TTL_SECS));

    sqlx::query(
        "INSERT INTO otps (email, code, expires_at) VALUES (?, ?, ?)
         ON CONFLICT(email) DO UPDATE SET code = excluded.code, expires_at = excluded.expires_at",
    )
    .bind(&body.email)
    .bind(code)
    .bind(&expires_at)
    .execute(&state.db)
    .await?;

    state.mailer.send_otp(&body.email, code).await.map_err(|e| {
        tracing::error!("OTP mail failed for {}: {}", body.email, e);
        ApiError::Upstream("Failed to send OTP".into())
    })?;

    Ok(Json(SimpleOk::new("OTP sent to your email")))
}

/// POST /api/verify-otp — single-use code check, first-login user creation,
/// token issuance.
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyOtpRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if body.email.is_empty() || body.otp.is_empty() {
        return Err(ApiError::Validation("Missing fields".into()));
    }

    let record = sqlx::query_as::<_, (i64, String)>(
        "SELECT code, expires_at FROM otps WHERE email = ?",
    )
    .bind(&body.email)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::Validation("OTP not found".into()))?;

    if fmt_instant(Utc::now()) > record.1 {
        sqlx::query("DELETE FROM otps WHERE email = ?")
            .bind(&body.email)
            .execute(&state.db)
            .await?;
        return Err(ApiError::Validation("OTP expired".into()));
    }

    let supplied: i64 = body
        .otp
        .trim()
        .parse()
        .map_err(|_| ApiError::Validation("Invalid OTP".into()))?;
    if supplied != record.0 {
        return Err(ApiError::Validation("Invalid OTP".into()));
    }

    sqlx::query("DELETE FROM otps WHERE email = ?")
        .bind(&body.email)
        .execute(&state.db)
        .await?;

    // First login creates the account.
    sqlx::query("INSERT INTO users (email) VALUES (?) ON CONFLICT(email) DO NOTHING")
        .bind(&body.email)
        .execute(&state.db)
        .await?;

    let (user_id, role) =
        sqlx::query_as::<_, (i64, String)>("SELECT id, role FROM users WHERE email = ?")
            .bind(&body.email)
            .fetch_one(&state.db)
            .await?;

    let access_token =
        auth::issue_token(user_id, &role, &state.access_token_secret, ACCESS_TTL_SECS)?;
    let refresh_token =
        auth::issue_token(user_id, &role, &state.refresh_token_secret, REFRESH_TTL_SECS)?;

    sqlx::query("UPDATE users SET refresh_token = ? WHERE id = ?")
        .bind(&refresh_token)
        .bind(user_id)
        .execute(&state.db)
        .await?;

    Ok(Json(LoginResponse {
        success: true,
        user: SessionUser {
            email: body.email.clone(),
            role,
        },
        access_token,
        refresh_token,
        message: "Login Successful",
    }))
}

/// POST /api/refresh — rotate the access token against the stored refresh
/// token.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let claims = auth::decode_token(&body.refresh_token, &state.refresh_token_secret)
        .ok_or_else(|| ApiError::Unauthorized("Invalid refresh token".into()))?;

    let row = sqlx::query_as::<_, (Option<String>, String)>(
        "SELECT refresh_token, role FROM users WHERE id = ?",
    )
    .bind(claims.sub)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::Unauthorized("Invalid refresh token".into()))?;

    if row.0.as_deref() != Some(body.refresh_token.as_str()) {
        return Err(ApiError::Unauthorized("Invalid refresh token".into()));
    }

    let access_token =
        auth::issue_token(claims.sub, &row.1, &state.access_token_secret, ACCESS_TTL_SECS)?;

    Ok(Json(RefreshResponse { access_token }))
}

/// POST /api/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SimpleOk>, ApiError> {
    let user = auth::require_user(&state, &headers).await?;

    sqlx::query("UPDATE users SET refresh_token = NULL WHERE id = ?")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    Ok(Json(SimpleOk::new("Logged out")))
}

/// GET /api/profile
pub async fn profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = auth::require_user(&state, &headers).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "user": SessionUser {
            email: user.email,
            role: user.role,
        },
    })))
}

// ── Admin login (password, then OTP step-up) ──

/// POST /api/auth/admin/login
pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AdminLoginRequest>,
) -> Result<Json<SimpleOk>, ApiError> {
    let row = sqlx::query_as::<_, (i64, Option<String>)>(
        "SELECT id, password_hash FROM users
         WHERE email = ? AND role IN ('admin', 'superadmin')",
    )
    .bind(&body.email)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound("Admin not found".into()))?;

    let hash = row
        .1
        .ok_or_else(|| ApiError::Unauthorized("Invalid password".into()))?;
    if !auth::verify_password(&body.password, &hash) {
        return Err(ApiError::Unauthorized("Invalid password".into()));
    }

    let code = auth::generate_otp();
    let expires_at = fmt_instant(Utc::now() + Duration::seconds(OTP_TTL_SECS));

    sqlx::query(
        "INSERT INTO admin_otps (user_id, code, expires_at) VALUES (?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE
             SET code = excluded.code, expires_at = excluded.expires_at,
                 created_at = datetime('now')",
    )
    .bind(row.0)
    .bind(code)
    .bind(&expires_at)
    .execute(&state.db)
    .await?;

    state
        .mailer
        .send_admin_otp(&body.email, code)
        .await
        .map_err(|e| {
            tracing::error!("admin OTP mail failed for {}: {}", body.email, e);
            ApiError::Upstream("Failed to send OTP".into())
        })?;

    Ok(Json(SimpleOk::new("OTP sent to email")))
}

/// POST /api/auth/admin/verify-otp
pub async fn admin_verify_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyOtpRequest>,
) -> Result<Json<AdminLoginResponse>, ApiError> {
    let user = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, role FROM users WHERE email = ? AND role IN ('admin', 'superadmin')",
    )
    .bind(&body.email)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound("Admin not found".into()))?;

    let record = sqlx::query_as::<_, (i64, String)>(
        "SELECT code, expires_at FROM admin_otps WHERE user_id = ?",
    )
    .bind(user.0)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound("OTP not found".into()))?;

    if fmt_instant(Utc::now()) > record.1 {
        sqlx::query("DELETE FROM admin_otps WHERE user_id = ?")
            .bind(user.0)
            .execute(&state.db)
            .await?;
        return Err(ApiError::Validation("OTP expired".into()));
    }

    let supplied: i64 = body
        .otp
        .trim()
        .parse()
        .map_err(|_| ApiError::Validation("Invalid OTP".into()))?;
    if supplied != record.0 {
        return Err(ApiError::Validation("Invalid OTP".into()));
    }

    sqlx::query("DELETE FROM admin_otps WHERE user_id = ?")
        .bind(user.0)
        .execute(&state.db)
        .await?;

    let access_token =
        auth::issue_token(user.0, &user.1, &state.access_token_secret, ACCESS_TTL_SECS)?;
    let refresh_token =
        auth::issue_token(user.0, &user.1, &state.refresh_token_secret, REFRESH_TTL_SECS)?;

    sqlx::query("UPDATE users SET admin_refresh_token = ? WHERE id = ?")
        .bind(&refresh_token)
        .bind(user.0)
        .execute(&state.db)
        .await?;

    Ok(Json(AdminLoginResponse {
        success: true,
        role: user.1,
        access_token,
        refresh_token,
    }))
}

/// POST /api/auth/admin/refresh
pub async fn admin_refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let claims = auth::decode_token(&body.refresh_token, &state.refresh_token_secret)
        .ok_or_else(|| ApiError::Unauthorized("Invalid refresh token".into()))?;

    let row = sqlx::query_as::<_, (Option<String>, String)>(
        "SELECT admin_refresh_token, role FROM users WHERE id = ?",
    )
    .bind(claims.sub)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::Unauthorized("Invalid refresh token".into()))?;

    if row.0.as_deref() != Some(body.refresh_token.as_str()) || !auth::is_admin_role(&row.1) {
        return Err(ApiError::Unauthorized("Invalid refresh token".into()));
    }

    let access_token =
        auth::issue_token(claims.sub, &row.1, &state.access_token_secret, ACCESS_TTL_SECS)?;

    Ok(Json(RefreshResponse { access_token }))
}

/// POST /api/auth/admin/logout
pub async fn admin_logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SimpleOk>, ApiError> {
    let user = auth::require_admin(&state, &headers).await?;

    sqlx::query("UPDATE users SET admin_refresh_token = NULL WHERE id = ?")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    Ok(Json(SimpleOk::new("Logged out")))
}
