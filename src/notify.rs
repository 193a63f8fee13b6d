//! Notification dispatch boundary.
//!
//! The engine emits "customer should be notified" intents; actual SMS/push
//! delivery belongs to an external service. When `NOTIFY_WEBHOOK_URL` is set
//! the intents are POSTed there on a spawned task; delivery failure is logged
//! and never affects the ticket mutation that produced the intent.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::ticket::TicketStatus;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentKind {
    TicketCalled,
    StatusChanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationIntent {
    pub kind: IntentKind,
    pub customer_id: String,
    pub business_id: String,
    pub ticket_number: String,
    pub status: TicketStatus,
    pub message: &'static str,
    pub at: u64,
}

/// Customer-facing message for a status, shown by whatever channel delivers
/// the notification.
pub fn status_message(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Waiting => "You are in the queue. Please wait for your turn.",
        TicketStatus::Called => "You have been called! Please proceed to the service area.",
        TicketStatus::InService => "You are currently being served.",
        TicketStatus::Completed => "Service completed. Thank you for visiting!",
        TicketStatus::Cancelled => "Your ticket has been cancelled.",
        TicketStatus::NoShow => "Marked as no-show. Please rejoin the queue if needed.",
    }
}

pub struct Notifier {
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("NOTIFY_WEBHOOK_URL").ok())
    }

    /// Fire-and-forget dispatch. Returns immediately; the POST happens on a
    /// spawned task.
    pub fn dispatch(&self, intent: NotificationIntent) {
        let Some(url) = self.endpoint.clone() else {
            debug!(
                customer = %intent.customer_id,
                ticket = %intent.ticket_number,
                status = intent.status.as_str(),
                "notification intent (no dispatch endpoint configured)"
            );
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&intent).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    warn!(
                        status = %response.status(),
                        ticket = %intent.ticket_number,
                        "notification endpoint rejected intent"
                    );
                }
                Err(error) => {
                    warn!(%error, ticket = %intent.ticket_number, "notification dispatch failed");
                }
            }
        });
    }
}
