use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use volare_server::rate_limit::{
    rate_limit_admin, rate_limit_auth, rate_limit_booking, rate_limit_otp, rate_limit_public,
    RateLimitConfig, RateLimiter,
};
use volare_server::{db, handlers, mailer::Mailer, AppState};

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Tracing ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── Required env vars ──
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:volare.db?mode=rwc".into());
    let access_token_secret =
        std::env::var("ACCESS_TOKEN_SECRET").expect("ACCESS_TOKEN_SECRET must be set");
    let refresh_token_secret =
        std::env::var("REFRESH_TOKEN_SECRET").expect("REFRESH_TOKEN_SECRET must be set");

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());

    // ── Optional env vars ──
    let razorpay_key_id = std::env::var("RAZORPAY_KEY_ID").unwrap_or_default();
    let razorpay_key_secret = std::env::var("RAZORPAY_KEY_SECRET").unwrap_or_default();
    let razorpay_webhook_secret = std::env::var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_default();
    let mail_api_url = std::env::var("MAIL_API_URL").unwrap_or_default();
    let mail_api_key = std::env::var("MAIL_API_KEY").unwrap_or_default();
    let mail_from = std::env::var("MAIL_FROM")
        .unwrap_or_else(|_| "\"Wonder Volare\" <noreply@wondervolare.com>".into());
    let webapp_url = std::env::var("WEBAPP_URL").unwrap_or_default();

    if razorpay_key_id.is_empty() {
        tracing::warn!("RAZORPAY_KEY_ID not set — payments will fail");
    }
    if razorpay_webhook_secret.is_empty() {
        tracing::warn!("RAZORPAY_WEBHOOK_SECRET not set — webhooks will be rejected");
    }
    if mail_api_url.is_empty() {
        tracing::warn!("MAIL_API_URL not set — OTP and ticket emails will fail");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    if let (Ok(email), Ok(password)) = (
        std::env::var("SUPER_ADMIN_EMAIL"),
        std::env::var("SUPER_ADMIN_PASSWORD"),
    ) {
        db::seed_super_admin(&pool, &email, &password).await?;
    }

    let state = Arc::new(AppState {
        db: pool,
        access_token_secret,
        refresh_token_secret,
        razorpay_key_id,
        razorpay_key_secret,
        razorpay_webhook_secret,
        mailer: Mailer::new(mail_api_url, mail_api_key, mail_from),
        started_at: Instant::now(),
    });

    // ── Rate limiter ──
    let rate_limiter = RateLimiter::new();
    rate_limiter.add_tier(
        "public",
        RateLimitConfig {
            max_requests: 60,
            window: Duration::from_secs(60),
        },
    );
    rate_limiter.add_tier(
        "otp",
        RateLimitConfig {
            max_requests: 5,
            window: Duration::from_secs(600),
        },
    );
    rate_limiter.add_tier(
        "booking",
        RateLimitConfig {
            max_requests: 10,
            window: Duration::from_secs(300),
        },
    );
    rate_limiter.add_tier(
        "auth",
        RateLimitConfig {
            max_requests: 30,
            window: Duration::from_secs(60),
        },
    );
    rate_limiter.add_tier(
        "admin",
        RateLimitConfig {
            max_requests: 120,
            window: Duration::from_secs(60),
        },
    );

    // ── Background task: cleanup stale rate limit entries ──
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = if !webapp_url.is_empty() {
        let origins: Vec<axum::http::HeaderValue> = vec![
            webapp_url.parse().expect("WEBAPP_URL must be a valid URL"),
            "http://localhost:3001".parse().unwrap(), // local frontend dev
        ];
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // ── Router (groups with per-group rate limits) ──

    // 1. No-limit: health check + payment webhook
    let no_limit_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .route(
            "/api/webhooks/razorpay",
            post(handlers::payment::razorpay_webhook),
        );

    // 2. Public: read-only endpoints (60 req/min). GET /api/bookings doubles
    //    as the availability query; its my-tickets mode authenticates inside.
    let public_routes = Router::new()
        .route("/api/plans", get(handlers::booking::list_plans))
        .route("/api/bookings", get(handlers::booking::bookings_index))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_public));

    // 3. OTP mail-outs: strict (5 req/10min)
    let otp_routes = Router::new()
        .route("/api/send-otp", post(handlers::auth::send_otp))
        .route("/api/auth/admin/login", post(handlers::auth::admin_login))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_otp));

    // 4. Booking writes: order creation + payment confirmation (10 req/5min)
    let booking_routes = Router::new()
        .route(
            "/api/razorpay/create-order",
            post(handlers::booking::create_order),
        )
        .route("/api/bookings", post(handlers::booking::confirm_booking))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_booking));

    // 5. Authenticated client endpoints (30 req/min)
    let auth_routes = Router::new()
        .route("/api/verify-otp", post(handlers::auth::verify_otp))
        .route("/api/refresh", post(handlers::auth::refresh))
        .route("/api/logout", post(handlers::auth::logout))
        .route("/api/profile", get(handlers::auth::profile))
        .route(
            "/api/bookings/ticket/{ticket_number}",
            get(handlers::booking::ticket_by_number),
        )
        .route("/api/send-ticket", post(handlers::booking::send_ticket))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_auth));

    // 6. Admin endpoints (120 req/min)
    let admin_routes = Router::new()
        .route(
            "/api/auth/admin/verify-otp",
            post(handlers::auth::admin_verify_otp),
        )
        .route(
            "/api/auth/admin/refresh",
            post(handlers::auth::admin_refresh),
        )
        .route("/api/auth/admin/logout", post(handlers::auth::admin_logout))
        .route("/api/auth/admin/users", get(handlers::admin::list_users))
        .route("/api/auth/admin/tickets", get(handlers::admin::list_tickets))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_admin));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(otp_routes)
        .merge(booking_routes)
        .merge(auth_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Wonder Volare server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
