//! End-to-end exercises of the reservation lock / confirmation sequence
//! against an in-memory SQLite pool.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use volare_server::handlers::payment;
use volare_server::store::{self, LockRequest};

const SLOT: &str = "09.00am - 10.00am";
const OTHER_SLOT: &str = "06.00am - 07.00am";

async fn test_pool() -> SqlitePool {
    // A single connection so every query sees the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    volare_server::db::run_migrations(&pool)
        .await
        .expect("migrations");
    pool
}

fn ride_date() -> NaiveDate {
    NaiveDate::parse_from_str("2025-12-20", "%Y-%m-%d").unwrap()
}

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-12-10T08:00:00Z")
        .unwrap()
        .into()
}

fn lock_request<'a>(email: &'a str, order_id: &'a str) -> LockRequest<'a> {
    LockRequest {
        user_email: email,
        plan_id: 1,
        plan_name: "Classic Sunrise Ride",
        ride_date: ride_date(),
        time_slot: SLOT,
        guests: 2,
        price_per_guest: 1500,
        razorpay_order_id: order_id,
    }
}

async fn pending_count(pool: &SqlitePool, email: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM tickets WHERE user_email = ? AND status = 'pending_payment'",
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn slot_status(pool: &SqlitePool, at: DateTime<Utc>) -> String {
    store::slot_availability(pool, ride_date(), at)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.time == SLOT)
        .unwrap()
        .status
        .to_string()
}

// ── Idempotent upsert (property 5) ──

#[tokio::test]
async fn relock_by_same_purchaser_refreshes_one_row() {
    let pool = test_pool().await;
    let t0 = now();

    store::acquire_lock(&pool, &lock_request("p@example.com", "order_1"), t0)
        .await
        .unwrap();
    store::acquire_lock(
        &pool,
        &lock_request("p@example.com", "order_2"),
        t0 + Duration::seconds(30),
    )
    .await
    .unwrap();

    assert_eq!(pending_count(&pool, "p@example.com").await, 1);

    let (locked_at, order_id): (String, String) = sqlx::query_as(
        "SELECT locked_at, razorpay_order_id FROM tickets WHERE user_email = ?",
    )
    .bind("p@example.com")
    .fetch_one(&pool)
    .await
    .unwrap();

    // The second call refreshed the hold and re-pointed the order reference.
    assert!(locked_at > store::fmt_instant(t0));
    assert_eq!(order_id, "order_2");
}

#[tokio::test]
async fn own_stale_lock_can_be_reentered() {
    let pool = test_pool().await;
    let t0 = now();

    store::acquire_lock(&pool, &lock_request("p@example.com", "order_1"), t0)
        .await
        .unwrap();

    // Well past the staleness window, the same purchaser comes back.
    let later = t0 + Duration::minutes(30);
    assert!(
        !store::foreign_block_exists(&pool, ride_date(), SLOT, "p@example.com", later)
            .await
            .unwrap()
    );
    store::acquire_lock(&pool, &lock_request("p@example.com", "order_3"), later)
        .await
        .unwrap();

    assert_eq!(pending_count(&pool, "p@example.com").await, 1);
}

// ── Contention (property 2) ──

#[tokio::test]
async fn fresh_foreign_lock_blocks_other_purchasers() {
    let pool = test_pool().await;
    let t0 = now();

    store::acquire_lock(&pool, &lock_request("a@example.com", "order_a"), t0)
        .await
        .unwrap();

    let soon = t0 + Duration::minutes(5);
    assert!(
        store::foreign_block_exists(&pool, ride_date(), SLOT, "b@example.com", soon)
            .await
            .unwrap()
    );
    // The owner themselves is not blocked.
    assert!(
        !store::foreign_block_exists(&pool, ride_date(), SLOT, "a@example.com", soon)
            .await
            .unwrap()
    );
    // Other slots on the same day stay open.
    assert!(
        !store::foreign_block_exists(&pool, ride_date(), OTHER_SLOT, "b@example.com", soon)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn confirmed_ticket_blocks_everyone_else() {
    let pool = test_pool().await;
    let t0 = now();

    store::acquire_lock(&pool, &lock_request("a@example.com", "order_a"), t0)
        .await
        .unwrap();
    let qr = store::qr_payload("TKT-T-00001", "a@example.com", "Classic Sunrise Ride",
        ride_date(), SLOT, 2);
    store::confirm_pending(&pool, "a@example.com", "order_a", "pay_a", "sig", "TKT-T-00001", &qr)
        .await
        .unwrap();

    // Even long after any staleness window, a confirmed ticket blocks.
    let much_later = t0 + Duration::days(1);
    assert!(
        store::foreign_block_exists(&pool, ride_date(), SLOT, "b@example.com", much_later)
            .await
            .unwrap()
    );
    // A different order on the same slot sees a foreign confirmed conflict.
    assert!(
        store::foreign_confirmed_exists(&pool, ride_date(), SLOT, "order_b")
            .await
            .unwrap()
    );
    // The winning order itself does not conflict with its own ticket.
    assert!(
        !store::foreign_confirmed_exists(&pool, ride_date(), SLOT, "order_a")
            .await
            .unwrap()
    );
}

// ── Staleness decay (property 3) ──

#[tokio::test]
async fn stale_pending_lock_stops_blocking() {
    let pool = test_pool().await;
    let t0 = now();

    store::acquire_lock(&pool, &lock_request("a@example.com", "order_a"), t0)
        .await
        .unwrap();

    let within = t0 + Duration::minutes(9);
    let beyond = t0 + Duration::minutes(11);

    assert!(
        store::foreign_block_exists(&pool, ride_date(), SLOT, "b@example.com", within)
            .await
            .unwrap()
    );
    assert!(
        !store::foreign_block_exists(&pool, ride_date(), SLOT, "b@example.com", beyond)
            .await
            .unwrap()
    );

    assert_eq!(slot_status(&pool, within).await, "unavailable");
    assert_eq!(slot_status(&pool, beyond).await, "available");
}

// ── No double-confirmation (property 1) ──

#[tokio::test]
async fn client_and_webhook_paths_confirm_exactly_once() {
    let pool = test_pool().await;

    store::acquire_lock(&pool, &lock_request("p@example.com", "order_1"), now())
        .await
        .unwrap();

    // Client path wins...
    let qr = store::qr_payload("TKT-T-00002", "p@example.com", "Classic Sunrise Ride",
        ride_date(), SLOT, 2);
    let first = store::confirm_pending(
        &pool, "p@example.com", "order_1", "pay_1", "sig", "TKT-T-00002", &qr,
    )
    .await
    .unwrap();
    assert_eq!(first, 1);

    // ...the webhook arrives second and must be a no-op.
    let second = store::reconcile_order_paid(&pool, "order_1", "pay_1")
        .await
        .unwrap();
    assert_eq!(second, 0);

    // A client retry also matches zero rows; the caller then observes the
    // already-confirmed ticket and reports success without mutating.
    let retry = store::confirm_pending(
        &pool, "p@example.com", "order_1", "pay_1", "sig", "TKT-T-DIFFERENT", &qr,
    )
    .await
    .unwrap();
    assert_eq!(retry, 0);

    let ticket = store::find_by_order(&pool, "order_1").await.unwrap().unwrap();
    assert_eq!(ticket.status, "confirmed");
    assert_eq!(ticket.ticket_number, "TKT-T-00002");
}

#[tokio::test]
async fn webhook_first_then_client_is_a_noop() {
    let pool = test_pool().await;

    store::acquire_lock(&pool, &lock_request("p@example.com", "order_1"), now())
        .await
        .unwrap();

    let promoted = store::reconcile_order_paid(&pool, "order_1", "pay_1")
        .await
        .unwrap();
    assert_eq!(promoted, 1);

    let ticket = store::find_by_order(&pool, "order_1").await.unwrap().unwrap();
    assert_eq!(ticket.status, "confirmed");
    assert_eq!(ticket.payment_status, "success");
    // The provisional number was promoted in place.
    assert!(ticket.ticket_number.starts_with("VAL-"));

    // The late client confirmation finds nothing pending to update.
    let late = store::confirm_pending(
        &pool, "p@example.com", "order_1", "pay_1", "sig", "TKT-LATE", "{}",
    )
    .await
    .unwrap();
    assert_eq!(late, 0);
}

#[tokio::test]
async fn webhook_retries_are_idempotent() {
    let pool = test_pool().await;

    store::acquire_lock(&pool, &lock_request("p@example.com", "order_1"), now())
        .await
        .unwrap();

    assert_eq!(
        store::reconcile_order_paid(&pool, "order_1", "pay_1").await.unwrap(),
        1
    );
    assert_eq!(
        store::reconcile_order_paid(&pool, "order_1", "pay_1").await.unwrap(),
        0
    );
    assert_eq!(
        store::reconcile_order_paid(&pool, "unknown_order", "pay_x").await.unwrap(),
        0
    );
}

// ── Fallback create ──

#[tokio::test]
async fn confirmation_without_a_hold_creates_the_ticket() {
    let pool = test_pool().await;

    // No lock was ever taken (or it was lost); the conflict re-check passes.
    assert!(
        !store::foreign_confirmed_exists(&pool, ride_date(), SLOT, "order_9")
            .await
            .unwrap()
    );

    let qr = store::qr_payload("TKT-F-00001", "p@example.com", "Classic Sunrise Ride",
        ride_date(), SLOT, 2);
    store::insert_confirmed(
        &pool,
        &lock_request("p@example.com", "order_9"),
        "pay_9",
        "sig",
        "TKT-F-00001",
        &qr,
        now(),
    )
    .await
    .unwrap();

    let ticket = store::find_by_order(&pool, "order_9").await.unwrap().unwrap();
    assert_eq!(ticket.status, "confirmed");
    assert_eq!(ticket.amount_paid, 3000);
    assert_eq!(slot_status(&pool, now()).await, "unavailable");
}

// ── End-to-end scenario (property 6) ──

#[tokio::test]
async fn full_booking_scenario() {
    let pool = test_pool().await;
    let t0 = now();

    // Every slot starts out available on 2025-12-20.
    let initial = store::slot_availability(&pool, ride_date(), t0).await.unwrap();
    assert_eq!(initial.len(), 5);
    assert!(initial.iter().all(|s| s.status == "available"));

    // Purchaser P locks 09.00am with plan 1 (₹1500 × 2).
    store::acquire_lock(&pool, &lock_request("p@example.com", "O1"), t0)
        .await
        .unwrap();

    let ticket = store::find_by_order(&pool, "O1").await.unwrap().unwrap();
    assert_eq!(ticket.status, "pending_payment");
    assert_eq!(ticket.total_price, 3000);
    assert!(ticket.ticket_number.starts_with("PEND-"));

    // The checkout signature verifies, then the hold is promoted.
    let secret = "rzp_test_secret";
    let signature = payment::payment_signature(secret, "O1", "pay_O1");
    assert!(payment::verify_payment_signature(secret, "O1", "pay_O1", &signature));

    assert!(
        !store::foreign_confirmed_exists(&pool, ride_date(), SLOT, "O1")
            .await
            .unwrap()
    );

    let final_number = store::generate_ticket_number("TKT");
    let qr = store::qr_payload(
        &final_number,
        "p@example.com",
        "Classic Sunrise Ride",
        ride_date(),
        SLOT,
        2,
    );
    let promoted = store::confirm_pending(
        &pool, "p@example.com", "O1", "pay_O1", &signature, &final_number, &qr,
    )
    .await
    .unwrap();
    assert_eq!(promoted, 1);

    let ticket = store::find_by_order(&pool, "O1").await.unwrap().unwrap();
    assert_eq!(ticket.status, "confirmed");
    assert_eq!(ticket.payment_status, "success");
    assert_eq!(ticket.amount_paid, 3000);
    assert!(ticket.ticket_number.starts_with("TKT-"));
    assert_eq!(ticket.qr_payload, qr);

    // The slot is now reported unavailable; the rest of the day is open.
    let after = store::slot_availability(&pool, ride_date(), t0).await.unwrap();
    for slot in after {
        if slot.time == SLOT {
            assert_eq!(slot.status, "unavailable");
        } else {
            assert_eq!(slot.status, "available");
        }
    }

    // And a rival purchaser is turned away from the taken slot.
    assert!(
        store::foreign_block_exists(&pool, ride_date(), SLOT, "q@example.com", t0)
            .await
            .unwrap()
    );
}

// ── Delivery tracking ──

#[tokio::test]
async fn email_delivery_tracking_counts_attempts() {
    let pool = test_pool().await;

    store::acquire_lock(&pool, &lock_request("p@example.com", "order_1"), now())
        .await
        .unwrap();
    let ticket = store::find_by_order(&pool, "order_1").await.unwrap().unwrap();

    store::mark_email_result(&pool, &ticket.ticket_number, false, now())
        .await
        .unwrap();
    store::mark_email_result(&pool, &ticket.ticket_number, true, now())
        .await
        .unwrap();

    let ticket = store::find_by_order(&pool, "order_1").await.unwrap().unwrap();
    assert!(ticket.email_sent);
    assert_eq!(ticket.email_attempts, 2);
    assert!(ticket.email_sent_at.is_some());
    assert!(!ticket.whatsapp_sent);
}

// ── Ticket retrieval ──

#[tokio::test]
async fn tickets_listed_newest_first_per_user() {
    let pool = test_pool().await;
    let t0 = now();

    store::acquire_lock(&pool, &lock_request("p@example.com", "order_1"), t0)
        .await
        .unwrap();

    let mut other = lock_request("p@example.com", "order_2");
    other.time_slot = OTHER_SLOT;
    store::acquire_lock(&pool, &other, t0 + Duration::seconds(5))
        .await
        .unwrap();

    let mut foreign = lock_request("q@example.com", "order_3");
    foreign.ride_date = ride_date().succ_opt().unwrap();
    store::acquire_lock(&pool, &foreign, t0).await.unwrap();

    let mine = store::tickets_for_user(&pool, "p@example.com").await.unwrap();
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|t| t.user_email == "p@example.com"));

    let all = store::all_tickets(&pool).await.unwrap();
    assert_eq!(all.len(), 3);
}
