use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;

use crate::{auth, error::ApiError, models::UserPublic, store, AppState};

/// GET /api/auth/admin/users — all accounts, secrets excluded.
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::require_admin(&state, &headers).await?;

    let users = sqlx::query_as::<_, UserPublic>(
        "SELECT id, email, role, status, created_at FROM users
         ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(serde_json::json!({ "success": true, "data": users })))
}

/// GET /api/auth/admin/tickets — every ticket, newest first.
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::require_admin(&state, &headers).await?;

    let tickets = store::all_tickets(&state.db).await?;

    Ok(Json(serde_json::json!({ "success": true, "data": tickets })))
}
