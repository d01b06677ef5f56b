pub mod auth;
pub mod catalog;
pub mod db;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod rate_limit;
pub mod store;

use std::time::Instant;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_webhook_secret: String,
    pub mailer: mailer::Mailer,
    pub started_at: Instant,
}
