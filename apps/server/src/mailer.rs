//! Thin client for the transactional mail gateway (HTTP JSON API).
//!
//! Delivery is best-effort: a failed send is logged and recorded in the
//! ticket's delivery-tracking fields, never bubbled into booking state.

use std::sync::Arc;

use chrono::Utc;

use crate::{models::Ticket, store, AppState};

#[derive(Clone)]
pub struct Mailer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl Mailer {
    pub fn new(api_url: String, api_key: String, from: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
            from,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_url.is_empty() && !self.api_key.is_empty()
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        if !self.is_configured() {
            anyhow::bail!("mail gateway not configured");
        }

        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "html": html,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!("mail gateway error: {} - {}", status, body);
            anyhow::bail!("mail gateway error: {}", status);
        }

        Ok(())
    }

    /// One-time login code, 5-minute validity.
    pub async fn send_otp(&self, to: &str, code: i64) -> anyhow::Result<()> {
        let html = format!(
            "<p>Your OTP is <strong>{}</strong>. It will expire in 5 minutes.</p>",
            code
        );
        self.send(to, "Your OTP for Login / Signup", &html).await
    }

    pub async fn send_admin_otp(&self, to: &str, code: i64) -> anyhow::Result<()> {
        let html = format!(
            "<p>Your OTP is <strong>{}</strong>. It expires in 5 minutes.</p>",
            code
        );
        self.send(to, "Your Admin OTP", &html).await
    }

    /// The confirmation email shown at the counter alongside the QR code.
    pub async fn send_ticket(&self, ticket: &Ticket) -> anyhow::Result<()> {
        let subject = format!("Booking Confirmed: {}", ticket.ticket_number);
        let ride_day = ticket
            .ride_date
            .get(..10)
            .unwrap_or(ticket.ride_date.as_str());
        let html = format!(
            "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: auto;\">\
               <h2 style=\"color: #055A3A; text-align: center;\">Booking Confirmed!</h2>\
               <p>Hi there,</p>\
               <p>Your ride at <strong>Wonder Volare Munnar</strong> is confirmed. \
                  Please show this ticket at the counter.</p>\
               <div style=\"background-color: #f9f9f9; padding: 15px; border-radius: 10px;\">\
                 <p><strong>Ticket Number:</strong> {}</p>\
                 <p><strong>Plan:</strong> {}</p>\
                 <p><strong>Date:</strong> {}</p>\
                 <p><strong>Time Slot:</strong> {}</p>\
                 <p><strong>Guests:</strong> {}</p>\
                 <p><strong>Amount Paid:</strong> ₹{}</p>\
               </div>\
             </div>",
            ticket.ticket_number,
            ticket.plan_name,
            ride_day,
            ticket.time_slot,
            ticket.guests,
            ticket.amount_paid,
        );
        self.send(&ticket.user_email, &subject, &html).await
    }
}

/// Fire-and-forget ticket email with delivery tracking. Skips silently if a
/// previous send already succeeded.
pub fn spawn_ticket_email(state: Arc<AppState>, ticket: Ticket) {
    if ticket.email_sent {
        return;
    }

    tokio::spawn(async move {
        let sent = match state.mailer.send_ticket(&ticket).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    "ticket email failed for {}: {}",
                    ticket.ticket_number,
                    e
                );
                false
            }
        };

        if let Err(e) =
            store::mark_email_result(&state.db, &ticket.ticket_number, sent, Utc::now()).await
        {
            tracing::error!(
                "failed to record delivery attempt for {}: {}",
                ticket.ticket_number,
                e
            );
        }
    });
}
