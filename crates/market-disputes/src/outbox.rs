//! # Notification Outbox
//!
//! Outbound notifications are placed on an [`Outbox`] instead of being sent
//! inline. The dispute service enqueues after a state change has committed
//! and only logs enqueue failures, so delivery problems never block or undo
//! a transition.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use market_core::{DisputeId, NotificationId, UserId};

/// Failure to accept a notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutboxError {
    /// The queue is at capacity.
    #[error("outbox full ({capacity} messages)")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },

    /// The sink could not be reached.
    #[error("outbox unavailable: {0}")]
    Unavailable(String),
}

/// Delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Informational.
    Low,
    /// Default.
    Normal,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Urgent,
}

impl Priority {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// An activity-feed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification identifier.
    pub id: NotificationId,
    /// Who should see it.
    pub recipient: UserId,
    /// Headline.
    pub title: String,
    /// Body text.
    pub description: String,
    /// Delivery priority.
    pub priority: Priority,
    /// Deep link into the app.
    pub link: String,
    /// When it was created.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Build a notification linking to a dispute.
    pub fn for_dispute(
        recipient: UserId,
        dispute_id: DisputeId,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            recipient,
            title: title.into(),
            description: description.into(),
            priority,
            link: format!("/disputes/{dispute_id}"),
            created_at: now,
        }
    }
}

/// Sink for outbound notifications.
pub trait Outbox: Send + Sync {
    /// Queue a notification for delivery.
    fn enqueue(&self, notification: Notification) -> Result<(), OutboxError>;
}

/// Bounded in-process outbox. Cloning shares the queue.
#[derive(Debug, Clone)]
pub struct MemoryOutbox {
    queue: Arc<Mutex<VecDeque<Notification>>>,
    capacity: usize,
}

impl MemoryOutbox {
    /// Default queue capacity.
    pub const DEFAULT_CAPACITY: usize = 10_000;

    /// An empty outbox holding at most `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Queued messages without removing them, oldest first.
    pub fn pending(&self) -> Vec<Notification> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Remove and return every queued message for `recipient`, oldest first.
    pub fn drain_for(&self, recipient: &UserId) -> Vec<Notification> {
        let mut queue = self.queue.lock();
        let (mine, rest): (VecDeque<_>, VecDeque<_>) =
            queue.drain(..).partition(|n| n.recipient == *recipient);
        *queue = rest;
        mine.into_iter().collect()
    }
}

impl Default for MemoryOutbox {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl Outbox for MemoryOutbox {
    fn enqueue(&self, notification: Notification) -> Result<(), OutboxError> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(OutboxError::Full {
                capacity: self.capacity,
            });
        }
        queue.push_back(notification);
        Ok(())
    }
}
