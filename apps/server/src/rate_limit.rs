use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for a single rate limit tier.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum requests allowed within one window.
    pub max_requests: u32,
    /// Fixed window length.
    pub window: Duration,
}

#[derive(Debug)]
struct WindowCounter {
    started: Instant,
    count: u32,
}

type TierMap = DashMap<&'static str, (RateLimitConfig, DashMap<IpAddr, WindowCounter>)>;

/// In-memory per-IP limiter using fixed-window counters, one map per tier.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tiers: Arc<TierMap>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            tiers: Arc::new(DashMap::new()),
        }
    }

    pub fn add_tier(&self, name: &'static str, config: RateLimitConfig) {
        self.tiers.insert(name, (config, DashMap::new()));
    }

    /// Returns `Ok(())` if allowed, `Err(retry_after_secs)` if limited.
    pub fn check(&self, tier: &'static str, ip: IpAddr) -> Result<(), u64> {
        let tier_entry = self.tiers.get(tier).expect("unknown rate limit tier");
        let (config, counters) = tier_entry.value();
        let now = Instant::now();

        let mut entry = counters.entry(ip).or_insert(WindowCounter {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= config.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= config.max_requests {
            let retry_after = (entry.started + config.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        entry.count += 1;
        Ok(())
    }

    /// Drop counters whose window closed more than one window ago. Call
    /// periodically from a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        for tier_entry in self.tiers.iter() {
            let (config, counters) = tier_entry.value();
            counters.retain(|_ip, c| now.duration_since(c.started) < config.window * 2);
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Client IP from X-Forwarded-For (reverse proxy) or the socket address.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]))
}

fn too_many_requests(retry_after: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(json!({
            "error": format!("Too many requests. Try again in {} seconds", retry_after)
        })),
    )
        .into_response()
}

async fn limit(
    limiter: RateLimiter,
    tier: &'static str,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check(tier, ip).map_err(too_many_requests)?;
    Ok(next.run(req).await)
}

// ── Middleware functions (one per tier) ──

/// Public read-only endpoints (60 req/min).
pub async fn rate_limit_public(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    limit(limiter, "public", req, next).await
}

/// OTP mail-outs (5 req/10min — keeps the mailbox and the gateway quiet).
pub async fn rate_limit_otp(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    limit(limiter, "otp", req, next).await
}

/// Order creation and payment confirmation (10 req/5min).
pub async fn rate_limit_booking(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    limit(limiter, "booking", req, next).await
}

/// Authenticated customer endpoints (30 req/min).
pub async fn rate_limit_auth(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    limit(limiter, "auth", req, next).await
}

/// Admin endpoints (120 req/min).
pub async fn rate_limit_admin(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    limit(limiter, "admin", req, next).await
}

// ── Tests ──
