use serde::{Deserialize, Serialize};

// ── Database models ──

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Ticket {
    pub id: i64,
    pub user_email: String,
    pub plan_id: i64,
    pub plan_name: String,
    /// UTC instant of IST midnight on the ride's civil date (RFC 3339).
    pub ride_date: String,
    pub time_slot: String,
    pub guests: i64,
    pub price_per_guest: i64,
    pub total_price: i64,
    pub ticket_number: String,
    pub qr_payload: String,
    /// pending_payment | confirmed | cancelled | completed
    pub status: String,
    pub locked_at: Option<String>,
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    #[serde(skip_serializing)]
    pub razorpay_signature: Option<String>,
    pub amount_paid: i64,
    /// pending | success | failed
    pub payment_status: String,
    pub email_sent: bool,
    pub email_sent_at: Option<String>,
    pub email_attempts: i64,
    pub whatsapp_sent: bool,
    pub whatsapp_sent_at: Option<String>,
    pub whatsapp_attempts: i64,
    pub created_at: String,
}

/// User row as exposed over the API (no password hash, no refresh tokens).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserPublic {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub status: String,
    pub created_at: String,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SlotAvailability {
    pub time: String,
    /// available | unavailable
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub slots: Vec<SlotAvailability>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub plan_id: i64,
    pub guests: i64,
    pub date: String,
    pub time_slot: String,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    /// Amount in paise, as the gateway quotes it.
    pub amount: i64,
    pub currency: &'static str,
    pub price_per_guest: i64,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmBookingRequest {
    pub plan_id: i64,
    pub date: String,
    pub time_slot: String,
    pub guests: i64,
    /// Echo of the server-quoted unit price; cross-checked against the
    /// catalog, never trusted.
    pub price_per_guest: Option<i64>,
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
}

/// The subset of a ticket returned from the confirmation endpoint.
#[derive(Debug, Serialize)]
pub struct TicketSummary {
    pub id: i64,
    pub ticket_number: String,
    pub qr_payload: String,
    pub plan_name: String,
    pub ride_date: String,
    pub time_slot: String,
    pub guests: i64,
    pub total_price: i64,
}

impl From<&Ticket> for TicketSummary {
    fn from(t: &Ticket) -> Self {
        Self {
            id: t.id,
            ticket_number: t.ticket_number.clone(),
            qr_payload: t.qr_payload.clone(),
            plan_name: t.plan_name.clone(),
            ride_date: t.ride_date.clone(),
            time_slot: t.time_slot.clone(),
            guests: t.guests,
            total_price: t.total_price,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmBookingResponse {
    pub success: bool,
    pub ticket: TicketSummary,
}

#[derive(Debug, Deserialize)]
pub struct SendTicketRequest {
    pub ticket_number: String,
}

// ── Auth ──

#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionUser {
    pub email: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: SessionUser,
    pub access_token: String,
    pub refresh_token: String,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AdminLoginResponse {
    pub success: bool,
    pub role: String,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct SimpleOk {
    pub success: bool,
    pub message: &'static str,
}

impl SimpleOk {
    pub fn new(message: &'static str) -> Self {
        Self {
            success: true,
            message,
        }
    }
}

// ── Razorpay webhook event (only the fields the reconciler reads) ──

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    pub order: Option<WebhookEntity>,
    pub payment: Option<WebhookEntity>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntity {
    pub entity: EntityBody,
}

#[derive(Debug, Deserialize)]
pub struct EntityBody {
    pub id: String,
}
