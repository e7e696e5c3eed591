//! services/portal/src/notify.rs
//!
//! The notification bus: decouples whoever raises a user-facing message from
//! whatever renders it (toast, terminal, test harness).

use crate::validation::sanitize_text;
use clinic_portal_core::domain::{NotificationEvent, NotificationLevel};
use clinic_portal_core::ports::Clock;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A live subscription. Dropping it has the same effect as unsubscribing; the
/// bus prunes the closed channel on its next publish.
pub struct Subscription {
    id: Uuid,
    receiver: mpsc::UnboundedReceiver<NotificationEvent>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next notification. `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        self.receiver.recv().await
    }

    /// Returns a notification that was already delivered, without waiting.
    pub fn try_recv(&mut self) -> Option<NotificationEvent> {
        self.receiver.try_recv().ok()
    }

    /// Everything delivered so far.
    pub fn drain(&mut self) -> Vec<NotificationEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Fan-out of notifications to every subscriber present at publish time.
#[derive(Clone)]
pub struct NotificationBus {
    subscribers: Arc<Mutex<Vec<(Uuid, mpsc::UnboundedSender<NotificationEvent>)>>>,
    clock: Arc<dyn Clock>,
}

impl NotificationBus {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            clock,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, sender));
        Subscription { id, receiver }
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Sanitizes the message, logs it and hands it to every current subscriber.
    /// Never waits on a subscriber.
    pub fn publish(&self, message: &str, level: NotificationLevel) -> NotificationEvent {
        let event = NotificationEvent::new(sanitize_text(message), level, self.clock.now());

        match level {
            NotificationLevel::Error => error!(message = %event.message, "notification"),
            NotificationLevel::Warning => warn!(message = %event.message, "notification"),
            NotificationLevel::Info | NotificationLevel::Success => {
                info!(message = %event.message, level = ?level, "notification")
            }
        }

        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|(_, sender)| sender.send(event.clone()).is_ok());
        event
    }

    pub fn info(&self, message: &str) -> NotificationEvent {
        self.publish(message, NotificationLevel::Info)
    }

    pub fn success(&self, message: &str) -> NotificationEvent {
        self.publish(message, NotificationLevel::Success)
    }

    pub fn warning(&self, message: &str) -> NotificationEvent {
        self.publish(message, NotificationLevel::Warning)
    }

    pub fn error(&self, message: &str) -> NotificationEvent {
        self.publish(message, NotificationLevel::Error)
    }
}
