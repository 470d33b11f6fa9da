use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entities::OrderSource;

/// Capacity of the bounded event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender/receiver pair with the default capacity
    pub fn channel() -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the processor is gone.
    /// Used after a commit, when the write itself must not be reported as failed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event dropped");
        }
    }
}

/// Things that happened which other parts of the system react to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    InquiryReceived {
        inquiry_id: Uuid,
        name: String,
        email: String,
        company: Option<String>,
    },
    OrderIngested {
        order_id: Uuid,
        source: OrderSource,
    },
    OrderChanged(Uuid),
    QuoteConverted {
        quote_id: Uuid,
        order_id: Uuid,
    },
    CustomerChanged(Uuid),
    CustomersMerged {
        kept_id: Uuid,
        merged_id: Uuid,
    },
    ImportCompleted {
        kind: String,
        source: String,
        inserted: usize,
        updated: usize,
        skipped: usize,
    },
}

impl Event {
    /// Whether the event changes data that dashboards aggregate
    pub fn affects_dashboards(&self) -> bool {
        !matches!(self, Event::InquiryReceived { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::InquiryReceived { .. } => "inquiry_received",
            Event::OrderIngested { .. } => "order_ingested",
            Event::OrderChanged(_) => "order_changed",
            Event::QuoteConverted { .. } => "quote_converted",
            Event::CustomerChanged(_) => "customer_changed",
            Event::CustomersMerged { .. } => "customers_merged",
            Event::ImportCompleted { .. } => "import_completed",
        }
    }
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Consumes the channel and hands every event to every handler until all senders are dropped
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!(handlers = handlers.len(), "Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!(event = event.name(), "Received event");
        metrics::counter!("crm.events.processed", 1, "event" => event.name());

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(event = event.name(), error = %e, "Event handler failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}
