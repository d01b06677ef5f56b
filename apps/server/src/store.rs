//! Ticket store operations.
//!
//! All contention state lives in the `tickets` table; correctness under
//! concurrent requests rests on single-statement conditional UPDATEs
//! (`... WHERE status = 'pending_payment'`), not on in-process locking.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rand::Rng;
use sqlx::SqlitePool;

use crate::catalog::TIME_SLOTS;
use crate::models::{SlotAvailability, Ticket};

/// A pending hold stops counting against availability after this long.
pub const LOCK_STALE_MINUTES: i64 = 10;

/// The business runs on IST (UTC+05:30); day boundaries are civil IST days.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 1800;

fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap()
}

/// Fixed-width RFC 3339 in UTC, so stored instants compare correctly as text.
pub fn fmt_instant(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts a civil date (`YYYY-MM-DD`) or a full RFC 3339 instant, which is
/// folded onto its IST calendar day.
pub fn parse_ride_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&ist()).date_naive())
    })
}

/// [start, end] instants of the IST calendar day, in UTC.
pub fn day_window(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date
        .and_time(NaiveTime::MIN)
        .and_local_timezone(ist())
        .unwrap()
        .with_timezone(&Utc);
    (start, start + Duration::days(1) - Duration::seconds(1))
}

/// The stored representation of a ride date: IST midnight as a UTC instant.
pub fn ride_date_instant(date: NaiveDate) -> DateTime<Utc> {
    day_window(date).0
}

fn stale_cutoff(now: DateTime<Utc>) -> String {
    fmt_instant(now - Duration::minutes(LOCK_STALE_MINUTES))
}

// ── Ticket numbers & QR payload ──

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// `<PREFIX>-<millis base36>-<5 random alphanumerics>`, uppercased.
/// `PEND-` marks a provisional hold, `TKT-` a client-confirmed ticket and
/// `VAL-` one promoted by the webhook reconciler.
pub fn generate_ticket_number(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| char::from(rng.sample(rand::distributions::Alphanumeric)))
        .collect();
    format!(
        "{}-{}-{}",
        prefix,
        base36(Utc::now().timestamp_millis() as u64),
        suffix
    )
    .to_uppercase()
}

pub fn promote_ticket_number(number: &str) -> String {
    number.replacen("PEND-", "VAL-", 1)
}

/// Receipt id handed to the payment gateway when creating an order.
pub fn generate_receipt_id() -> String {
    format!("rcpt_{}", base36(Utc::now().timestamp_millis() as u64))
}

/// The JSON document shown at the counter; rendering it as an image is the
/// frontend's job.
pub fn qr_payload(
    ticket_number: &str,
    email: &str,
    plan_name: &str,
    ride_date: NaiveDate,
    time_slot: &str,
    guests: i64,
) -> String {
    serde_json::json!({
        "ticketNumber": ticket_number,
        "email": email,
        "plan": plan_name,
        "date": ride_date.format("%Y-%m-%d").to_string(),
        "time": time_slot,
        "people": guests,
    })
    .to_string()
}

// ── Availability ──

/// Per-slot availability for one IST calendar day. A slot is blocked by a
/// confirmed ticket or by a pending hold fresher than the staleness window.
pub async fn slot_availability(
    pool: &SqlitePool,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> sqlx::Result<Vec<SlotAvailability>> {
    let (start, end) = day_window(date);

    let blocked: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT time_slot FROM tickets
         WHERE ride_date >= ? AND ride_date <= ?
           AND (status = 'confirmed'
                OR (status = 'pending_payment' AND locked_at >= ?))",
    )
    .bind(fmt_instant(start))
    .bind(fmt_instant(end))
    .bind(stale_cutoff(now))
    .fetch_all(pool)
    .await?;

    Ok(TIME_SLOTS
        .iter()
        .map(|slot| SlotAvailability {
            time: slot.to_string(),
            status: if blocked.iter().any(|b| b == slot) {
                "unavailable"
            } else {
                "available"
            },
        })
        .collect())
}

// ── Reservation lock ──

pub struct LockRequest<'a> {
    pub user_email: &'a str,
    pub plan_id: i64,
    pub plan_name: &'a str,
    pub ride_date: NaiveDate,
    pub time_slot: &'a str,
    pub guests: i64,
    pub price_per_guest: i64,
    pub razorpay_order_id: &'a str,
}

/// Whether a foreign party blocks (date, slot): any confirmed ticket, or a
/// fresh pending hold belonging to someone else. The caller's own hold,
/// fresh or stale, never blocks re-entry.
pub async fn foreign_block_exists(
    pool: &SqlitePool,
    date: NaiveDate,
    time_slot: &str,
    user_email: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<bool> {
    let (start, end) = day_window(date);

    sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM tickets
         WHERE ride_date >= ? AND ride_date <= ? AND time_slot = ?
           AND (status = 'confirmed'
                OR (status = 'pending_payment' AND locked_at >= ? AND user_email <> ?))",
    )
    .bind(fmt_instant(start))
    .bind(fmt_instant(end))
    .bind(time_slot)
    .bind(stale_cutoff(now))
    .bind(user_email)
    .fetch_one(pool)
    .await
}

/// Create or refresh the caller's provisional hold. The filter keys on
/// (purchaser, day window, slot, status = pending), so repeated calls by the
/// same purchaser refresh one row and a confirmed ticket is never touched.
/// Returns the provisional ticket number.
pub async fn acquire_lock(
    pool: &SqlitePool,
    req: &LockRequest<'_>,
    now: DateTime<Utc>,
) -> sqlx::Result<String> {
    let (start, end) = day_window(req.ride_date);
    let ticket_number = generate_ticket_number("PEND");
    let total_price = req.price_per_guest * req.guests;

    let updated = sqlx::query(
        "UPDATE tickets
         SET plan_id = ?, plan_name = ?, guests = ?, price_per_guest = ?, total_price = ?,
             ticket_number = ?, locked_at = ?, razorpay_order_id = ?,
             razorpay_payment_id = NULL, razorpay_signature = NULL,
             amount_paid = 0, payment_status = 'pending'
         WHERE user_email = ? AND time_slot = ? AND status = 'pending_payment'
           AND ride_date >= ? AND ride_date <= ?",
    )
    .bind(req.plan_id)
    .bind(req.plan_name)
    .bind(req.guests)
    .bind(req.price_per_guest)
    .bind(total_price)
    .bind(&ticket_number)
    .bind(fmt_instant(now))
    .bind(req.razorpay_order_id)
    .bind(req.user_email)
    .bind(req.time_slot)
    .bind(fmt_instant(start))
    .bind(fmt_instant(end))
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        sqlx::query(
            "INSERT INTO tickets (user_email, plan_id, plan_name, ride_date, time_slot,
                 guests, price_per_guest, total_price, ticket_number, status, locked_at,
                 razorpay_order_id, payment_status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending_payment', ?, ?, 'pending', ?)",
        )
        .bind(req.user_email)
        .bind(req.plan_id)
        .bind(req.plan_name)
        .bind(fmt_instant(ride_date_instant(req.ride_date)))
        .bind(req.time_slot)
        .bind(req.guests)
        .bind(req.price_per_guest)
        .bind(total_price)
        .bind(&ticket_number)
        .bind(fmt_instant(now))
        .bind(req.razorpay_order_id)
        .bind(fmt_instant(now))
        .execute(pool)
        .await?;
    }

    Ok(ticket_number)
}

// ── Payment confirmation ──

/// A confirmed ticket on (date, slot) whose order reference differs from the
/// one being confirmed. Used as the conflict re-check before promotion, so a
/// retry of an already-confirmed order does not trip over itself.
pub async fn foreign_confirmed_exists(
    pool: &SqlitePool,
    date: NaiveDate,
    time_slot: &str,
    razorpay_order_id: &str,
) -> sqlx::Result<bool> {
    let (start, end) = day_window(date);

    sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM tickets
         WHERE ride_date >= ? AND ride_date <= ? AND time_slot = ?
           AND status = 'confirmed'
           AND (razorpay_order_id IS NULL OR razorpay_order_id <> ?)",
    )
    .bind(fmt_instant(start))
    .bind(fmt_instant(end))
    .bind(time_slot)
    .bind(razorpay_order_id)
    .fetch_one(pool)
    .await
}

/// Atomically promote the caller's pending hold for this order reference.
/// Returns the number of rows that transitioned (0 or 1).
pub async fn confirm_pending(
    pool: &SqlitePool,
    user_email: &str,
    razorpay_order_id: &str,
    razorpay_payment_id: &str,
    razorpay_signature: &str,
    ticket_number: &str,
    qr_payload: &str,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE tickets
         SET status = 'confirmed', payment_status = 'success',
             razorpay_payment_id = ?, razorpay_signature = ?,
             ticket_number = ?, qr_payload = ?, amount_paid = total_price
         WHERE user_email = ? AND razorpay_order_id = ? AND status = 'pending_payment'",
    )
    .bind(razorpay_payment_id)
    .bind(razorpay_signature)
    .bind(ticket_number)
    .bind(qr_payload)
    .bind(user_email)
    .bind(razorpay_order_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn find_by_order(
    pool: &SqlitePool,
    razorpay_order_id: &str,
) -> sqlx::Result<Option<Ticket>> {
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE razorpay_order_id = ?")
        .bind(razorpay_order_id)
        .fetch_optional(pool)
        .await
}

/// Fallback for a lost/expired hold: create the ticket directly in confirmed
/// state. The caller must have re-checked the foreign-confirmed conflict.
#[allow(clippy::too_many_arguments)]
pub async fn insert_confirmed(
    pool: &SqlitePool,
    req: &LockRequest<'_>,
    razorpay_payment_id: &str,
    razorpay_signature: &str,
    ticket_number: &str,
    qr_payload: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    let total_price = req.price_per_guest * req.guests;

    sqlx::query(
        "INSERT INTO tickets (user_email, plan_id, plan_name, ride_date, time_slot,
             guests, price_per_guest, total_price, ticket_number, qr_payload, status,
             razorpay_order_id, razorpay_payment_id, razorpay_signature,
             amount_paid, payment_status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'confirmed', ?, ?, ?, ?, 'success', ?)",
    )
    .bind(req.user_email)
    .bind(req.plan_id)
    .bind(req.plan_name)
    .bind(fmt_instant(ride_date_instant(req.ride_date)))
    .bind(req.time_slot)
    .bind(req.guests)
    .bind(req.price_per_guest)
    .bind(total_price)
    .bind(ticket_number)
    .bind(qr_payload)
    .bind(req.razorpay_order_id)
    .bind(razorpay_payment_id)
    .bind(razorpay_signature)
    .bind(total_price)
    .bind(fmt_instant(now))
    .execute(pool)
    .await?;

    Ok(())
}

// ── Webhook reconciliation ──

/// Promote an order the provider reports as paid. The `status <> 'confirmed'`
/// guard makes provider retries (and races with the client path) no-ops.
/// Returns the number of rows that transitioned.
pub async fn reconcile_order_paid(
    pool: &SqlitePool,
    razorpay_order_id: &str,
    razorpay_payment_id: &str,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE tickets
         SET status = 'confirmed', payment_status = 'success',
             razorpay_payment_id = ?,
             ticket_number = REPLACE(ticket_number, 'PEND-', 'VAL-')
         WHERE razorpay_order_id = ? AND status <> 'confirmed'",
    )
    .bind(razorpay_payment_id)
    .bind(razorpay_order_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// ── Retrieval & delivery tracking ──

pub async fn find_by_number(pool: &SqlitePool, ticket_number: &str) -> sqlx::Result<Option<Ticket>> {
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE ticket_number = ?")
        .bind(ticket_number)
        .fetch_optional(pool)
        .await
}

pub async fn tickets_for_user(pool: &SqlitePool, user_email: &str) -> sqlx::Result<Vec<Ticket>> {
    sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets WHERE user_email = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(user_email)
    .fetch_all(pool)
    .await
}

pub async fn all_tickets(pool: &SqlitePool) -> sqlx::Result<Vec<Ticket>> {
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets ORDER BY created_at DESC, id DESC")
        .fetch_all(pool)
        .await
}

/// Record a ticket-email attempt. A success flips the sent flag so the send
/// is never repeated; both outcomes bump the attempt counter.
pub async fn mark_email_result(
    pool: &SqlitePool,
    ticket_number: &str,
    sent: bool,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    if sent {
        sqlx::query(
            "UPDATE tickets
             SET email_sent = 1, email_sent_at = ?, email_attempts = email_attempts + 1
             WHERE ticket_number = ?",
        )
        .bind(fmt_instant(now))
        .bind(ticket_number)
        .execute(pool)
        .await?;
    } else {
        sqlx::query(
            "UPDATE tickets SET email_attempts = email_attempts + 1 WHERE ticket_number = ?",
        )
        .bind(ticket_number)
        .execute(pool)
        .await?;
    }
    Ok(())
}

// ── Tests (pure helpers; store queries are covered by the integration tests) ──
