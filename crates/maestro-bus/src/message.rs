use chrono::{DateTime, Utc};
use maestro_core::Priority;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Kind of message travelling over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Asks the recipient to do something.
    Request,
    /// Answer to a request.
    Response,
    /// One-way information.
    Notification,
    /// Delivered to every mailbox but the sender's.
    Broadcast,
    /// Announces shared data.
    DataShare,
    /// Announces a task handoff.
    TaskHandoff,
    /// Progress or lifecycle event.
    StatusUpdate,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Notification => "notification",
            MessageType::Broadcast => "broadcast",
            MessageType::DataShare => "data_share",
            MessageType::TaskHandoff => "task_handoff",
            MessageType::StatusUpdate => "status_update",
        };
        write!(f, "{s}")
    }
}

/// A message exchanged between agents. `recipient == None` means broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Message id.
    pub id: Uuid,
    /// Kind of message.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Sending agent or component.
    pub sender: String,
    /// Target agent; `None` broadcasts.
    pub recipient: Option<String>,
    /// Opaque body.
    pub payload: serde_json::Value,
    /// Urgency hint for the recipient.
    #[serde(default)]
    pub priority: Priority,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
    /// Messages past this are no longer returned.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Links replies and events to the request or task they concern.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl AgentMessage {
    /// Build a message of any type.
    pub fn new(
        message_type: MessageType,
        sender: impl Into<String>,
        recipient: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            sender: sender.into(),
            recipient,
            payload,
            priority: Priority::default(),
            created_at: Utc::now(),
            expires_at: None,
            correlation_id: None,
        }
    }

    /// A point-to-point message.
    pub fn direct(
        message_type: MessageType,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(message_type, sender, Some(recipient.into()), payload)
    }

    /// A message delivered to every mailbox except the sender's.
    pub fn broadcast(sender: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(MessageType::Broadcast, sender, None, payload)
    }

    /// A broadcast status event.
    pub fn status_update(sender: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(MessageType::StatusUpdate, sender, None, payload)
    }

    /// Build the response to this message, correlated by this message's id.
    pub fn reply(&self, sender: impl Into<String>, payload: serde_json::Value) -> Self {
        let mut msg = Self::new(
            MessageType::Response,
            sender,
            Some(self.sender.clone()),
            payload,
        );
        msg.correlation_id = Some(
            self.correlation_id
                .clone()
                .unwrap_or_else(|| self.id.to_string()),
        );
        msg
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Expire the message `ttl` after its creation.
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl));
        self
    }

    /// True when the message has no recipient.
    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    /// Whether `expires_at` has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}
