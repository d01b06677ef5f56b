use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use crate::{error::ApiError, models::WebhookEvent, store, AppState};

type HmacSha256 = Hmac<Sha256>;

// ── Razorpay order creation ──

/// Create an order with the gateway. Amount is in paise.
pub async fn create_razorpay_order(
    key_id: &str,
    key_secret: &str,
    amount_paise: i64,
    receipt: &str,
) -> anyhow::Result<String> {
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "amount": amount_paise,
        "currency": "INR",
        "receipt": receipt,
    });

    let resp = client
        .post("https://api.razorpay.com/v1/orders")
        .basic_auth(key_id, Some(key_secret))
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        tracing::error!("Razorpay order creation failed: {} - {}", status, text);
        anyhow::bail!("Razorpay API error: {}", status);
    }

    let json: serde_json::Value = resp.json().await?;

    let order_id = json["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Missing order id"))?
        .to_string();

    tracing::info!("Razorpay order created: {}", order_id);
    Ok(order_id)
}

// ── Signatures ──

/// The client-side checkout signature: HMAC-SHA256 over `order_id|payment_id`
/// with the gateway key secret, hex-encoded.
pub fn payment_signature(key_secret: &str, order_id: &str, payment_id: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key_secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_payment_signature(
    key_secret: &str,
    order_id: &str,
    payment_id: &str,
    supplied: &str,
) -> bool {
    payment_signature(key_secret, order_id, payment_id) == supplied
}

/// Webhook signature: HMAC-SHA256 over the exact raw body bytes with the
/// dedicated webhook secret.
pub fn webhook_signature(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_webhook_signature(secret: &str, body: &[u8], supplied: &str) -> bool {
    webhook_signature(secret, body) == supplied
}

// ── Webhook reconciler ──

/// POST /api/webhooks/razorpay — server-to-server confirmation path.
///
/// The provider retries on non-2xx, so everything past signature
/// verification must tolerate being run more than once per event.
pub async fn razorpay_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get("x-razorpay-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !verify_webhook_signature(&state.razorpay_webhook_secret, &body, signature) {
        return Err(ApiError::SignatureMismatch("Invalid signature".into()));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|_| ApiError::Validation("Malformed webhook body".into()))?;

    if event.event == "order.paid" {
        let (Some(order), Some(payment)) = (event.payload.order, event.payload.payment) else {
            tracing::warn!("order.paid webhook missing order/payment entity");
            // 200 so the provider does not retry an unfixable event
            return Ok(Json(serde_json::json!({ "status": "ok" })));
        };

        let promoted =
            store::reconcile_order_paid(&state.db, &order.entity.id, &payment.entity.id).await?;

        if promoted > 0 {
            tracing::info!(
                "webhook confirmed order {} (payment {})",
                order.entity.id,
                payment.entity.id
            );
        } else {
            tracing::info!("webhook for order {} was a no-op", order.entity.id);
        }
    } else {
        tracing::debug!("Ignoring webhook event: {}", event.event);
    }

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "rzp_test_secret";

    #[test]
    fn test_payment_signature_round_trip() {
        let sig = payment_signature(SECRET, "order_abc", "pay_def");
        assert!(verify_payment_signature(SECRET, "order_abc", "pay_def", &sig));
    }

    #[test]
    fn test_payment_signature_single_byte_flip_rejected() {
        let sig = payment_signature(SECRET, "order_abc", "pay_def");
        let mut bytes = sig.into_bytes();
        bytes[0] = if bytes[0] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(!verify_payment_signature(
            SECRET, "order_abc", "pay_def", &tampered
        ));
    }

    #[test]
    fn test_payment_signature_covers_both_refs() {
        let sig = payment_signature(SECRET, "order_abc", "pay_def");
        assert!(!verify_payment_signature(SECRET, "order_xyz", "pay_def", &sig));
        assert!(!verify_payment_signature(SECRET, "order_abc", "pay_xyz", &sig));
    }

    #[test]
    fn test_payment_signature_is_hex() {
        let sig = payment_signature(SECRET, "o", "p");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sig = payment_signature(SECRET, "order_abc", "pay_def");
        assert!(!verify_payment_signature(
            "other_secret",
            "order_abc",
            "pay_def",
            &sig
        ));
    }

    #[test]
    fn test_webhook_signature_round_trip() {
        let body = br#"{"event":"order.paid"}"#;
        let sig = webhook_signature("whsec", body);
        assert!(verify_webhook_signature("whsec", body, &sig));
    }

    #[test]
    fn test_webhook_signature_covers_exact_bytes() {
        let sig = webhook_signature("whsec", br#"{"event":"order.paid"}"#);
        assert!(!verify_webhook_signature(
            "whsec",
            br#"{"event":"order.paid" }"#,
            &sig
        ));
    }

    #[test]
    fn test_webhook_and_payment_secrets_are_distinct_schemes() {
        // Same input, different keys must not collide.
        let body = b"order_abc|pay_def";
        assert_ne!(
            webhook_signature("secret_a", body),
            webhook_signature("secret_b", body)
        );
    }

    #[test]
    fn test_webhook_event_parses() {
        let raw = r#"{
            "event": "order.paid",
            "payload": {
                "order": { "entity": { "id": "order_abc" } },
                "payment": { "entity": { "id": "pay_def" } }
            }
        }"#;
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, "order.paid");
        assert_eq!(event.payload.order.unwrap().entity.id, "order_abc");
        assert_eq!(event.payload.payment.unwrap().entity.id, "pay_def");
    }

    #[test]
    fn test_webhook_event_without_payload() {
        let event: WebhookEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(event.event, "ping");
        assert!(event.payload.order.is_none());
    }
}
