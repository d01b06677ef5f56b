use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use super::payment;
use crate::{
    auth, catalog,
    error::ApiError,
    mailer,
    models::*,
    store::{self, LockRequest},
    AppState,
};

/// GET /api/plans — the static ride catalog.
pub async fn list_plans() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "plans": &catalog::RIDE_PLANS }))
}

/// GET /api/bookings — two modes, matching the public surface:
/// with `?date=` it reports per-slot availability (no auth, read-only);
/// without it, it lists the authenticated caller's tickets.
pub async fn bookings_index(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Response, ApiError> {
    if let Some(raw) = query.date.as_deref() {
        let date = store::parse_ride_date(raw)
            .ok_or_else(|| ApiError::Validation("Invalid date format".into()))?;

        let slots = store::slot_availability(&state.db, date, Utc::now()).await?;
        return Ok(Json(AvailabilityResponse { slots }).into_response());
    }

    let user = auth::require_user(&state, &headers).await?;
    let tickets = store::tickets_for_user(&state.db, &user.email).await?;
    Ok(Json(serde_json::json!({ "tickets": tickets })).into_response())
}

fn validate_booking_shape(
    plan_id: i64,
    guests: i64,
    time_slot: &str,
    raw_date: &str,
) -> Result<(&'static catalog::RidePlan, chrono::NaiveDate), ApiError> {
    let plan = catalog::plan_by_id(plan_id)
        .ok_or_else(|| ApiError::Validation("Invalid Plan ID".into()))?;

    if guests < 1 || guests > plan.max_guests {
        return Err(ApiError::Validation("Invalid guest count".into()));
    }
    if !catalog::is_catalog_slot(time_slot) {
        return Err(ApiError::Validation("Unknown time slot".into()));
    }

    let date = store::parse_ride_date(raw_date)
        .ok_or_else(|| ApiError::Validation("Invalid date format".into()))?;

    Ok((plan, date))
}

/// POST /api/razorpay/create-order — the reservation lock.
///
/// Order of operations matters: the contention check runs before the gateway
/// call, and the provisional row is only written once the gateway order
/// exists, so a gateway failure leaves no state behind.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, ApiError> {
    let user = auth::require_user(&state, &headers).await?;
    let (plan, date) =
        validate_booking_shape(body.plan_id, body.guests, &body.time_slot, &body.date)?;

    let now = Utc::now();
    if store::foreign_block_exists(&state.db, date, &body.time_slot, &user.email, now).await? {
        return Err(ApiError::Conflict(
            "The selected time slot is already booked.".into(),
        ));
    }

    let total_price = plan.price * body.guests;
    let receipt = store::generate_receipt_id();

    let order_id = payment::create_razorpay_order(
        &state.razorpay_key_id,
        &state.razorpay_key_secret,
        total_price * 100,
        &receipt,
    )
    .await
    .map_err(|e| {
        tracing::error!("order creation failed for {}: {}", user.email, e);
        ApiError::Upstream("Could not initiate payment".into())
    })?;

    let pending_number = store::acquire_lock(
        &state.db,
        &LockRequest {
            user_email: &user.email,
            plan_id: plan.id,
            plan_name: plan.name,
            ride_date: date,
            time_slot: &body.time_slot,
            guests: body.guests,
            price_per_guest: plan.price,
            razorpay_order_id: &order_id,
        },
        now,
    )
    .await?;

    tracing::info!(
        "slot locked for {}: {} {} ({})",
        user.email,
        body.date,
        body.time_slot,
        pending_number
    );

    Ok(Json(CreateOrderResponse {
        order_id,
        amount: total_price * 100,
        currency: "INR",
        price_per_guest: plan.price,
    }))
}

/// POST /api/bookings — client-side payment confirmation.
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ConfirmBookingRequest>,
) -> Result<Json<ConfirmBookingResponse>, ApiError> {
    let user = auth::require_user(&state, &headers).await?;
    let (plan, date) =
        validate_booking_shape(body.plan_id, body.guests, &body.time_slot, &body.date)?;

    // The client echoes the quoted unit price; the catalog stays authoritative.
    if let Some(price) = body.price_per_guest {
        if price != plan.price {
            return Err(ApiError::Validation("Price mismatch".into()));
        }
    }

    if !payment::verify_payment_signature(
        &state.razorpay_key_secret,
        &body.razorpay_order_id,
        &body.razorpay_payment_id,
        &body.razorpay_signature,
    ) {
        return Err(ApiError::SignatureMismatch("Invalid Payment Signature".into()));
    }

    // Double-check right before promotion; a foreign winner means this
    // payment needs manual reconciliation, not a ticket.
    if store::foreign_confirmed_exists(&state.db, date, &body.time_slot, &body.razorpay_order_id)
        .await?
    {
        return Err(ApiError::Conflict(
            "The selected time slot is already booked.".into(),
        ));
    }

    let final_number = store::generate_ticket_number("TKT");
    let qr = store::qr_payload(
        &final_number,
        &user.email,
        plan.name,
        date,
        &body.time_slot,
        body.guests,
    );

    let promoted = store::confirm_pending(
        &state.db,
        &user.email,
        &body.razorpay_order_id,
        &body.razorpay_payment_id,
        &body.razorpay_signature,
        &final_number,
        &qr,
    )
    .await?;

    if promoted == 0 {
        match store::find_by_order(&state.db, &body.razorpay_order_id).await? {
            // A retry, or the webhook got there first: success, no mutation.
            // The email spawn is gated on the sent flag, so a ticket the
            // webhook confirmed still gets its mail exactly once.
            Some(ticket) if ticket.status == "confirmed" => {
                let summary = TicketSummary::from(&ticket);
                mailer::spawn_ticket_email(state.clone(), ticket);
                return Ok(Json(ConfirmBookingResponse {
                    success: true,
                    ticket: summary,
                }));
            }
            // Hold expired or was never created; create the ticket directly
            // in confirmed state from the verified parameters.
            _ => {
                store::insert_confirmed(
                    &state.db,
                    &LockRequest {
                        user_email: &user.email,
                        plan_id: plan.id,
                        plan_name: plan.name,
                        ride_date: date,
                        time_slot: &body.time_slot,
                        guests: body.guests,
                        price_per_guest: plan.price,
                        razorpay_order_id: &body.razorpay_order_id,
                    },
                    &body.razorpay_payment_id,
                    &body.razorpay_signature,
                    &final_number,
                    &qr,
                    Utc::now(),
                )
                .await?;
            }
        }
    }

    let ticket = store::find_by_order(&state.db, &body.razorpay_order_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("ticket missing after confirmation")))?;

    tracing::info!(
        "booking confirmed: {} for {} ({} {})",
        ticket.ticket_number,
        user.email,
        body.date,
        body.time_slot
    );

    mailer::spawn_ticket_email(state.clone(), ticket.clone());

    Ok(Json(ConfirmBookingResponse {
        success: true,
        ticket: TicketSummary::from(&ticket),
    }))
}

/// GET /api/bookings/ticket/{ticket_number} — single ticket lookup.
pub async fn ticket_by_number(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ticket_number): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = auth::require_user(&state, &headers).await?;

    let ticket = store::find_by_number(&state.db, &ticket_number)
        .await?
        .ok_or_else(|| ApiError::NotFound("Ticket not found".into()))?;

    if ticket.user_email != user.email {
        return Err(ApiError::Forbidden("Access denied".into()));
    }

    Ok(Json(serde_json::json!({ "success": true, "ticket": ticket })))
}

/// POST /api/send-ticket — idempotent re-send of the ticket email.
pub async fn send_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SendTicketRequest>,
) -> Result<Json<SimpleOk>, ApiError> {
    let user = auth::require_user(&state, &headers).await?;

    let ticket = store::find_by_number(&state.db, &body.ticket_number)
        .await?
        .ok_or_else(|| ApiError::NotFound("Ticket not found".into()))?;

    if ticket.user_email != user.email && !auth::is_admin_role(&user.role) {
        return Err(ApiError::Forbidden("Access denied".into()));
    }

    if ticket.email_sent {
        return Ok(Json(SimpleOk::new("Ticket already sent")));
    }

    match state.mailer.send_ticket(&ticket).await {
        Ok(()) => {
            store::mark_email_result(&state.db, &ticket.ticket_number, true, Utc::now()).await?;
            Ok(Json(SimpleOk::new("Ticket sent successfully")))
        }
        Err(e) => {
            tracing::error!("send-ticket failed for {}: {}", ticket.ticket_number, e);
            store::mark_email_result(&state.db, &ticket.ticket_number, false, Utc::now()).await?;
            Err(ApiError::Upstream("Failed to send ticket".into()))
        }
    }
}
