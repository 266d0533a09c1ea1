//! Message bus: the shared feed every agent reads from and posts to.
//!
//! [`MessageBus`] is the publish/subscribe contract: fire-and-forget
//! publishing that reports how many subscribers were reached, and
//! subscriptions that yield raw payloads until a timeout or the topic
//! closes. [`LocalBus`] implements it in-process on top of
//! [`tokio::sync::broadcast`]; [`Feed`] layers the `{author, content}`
//! message shape over one topic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::util::{sanitize_bytes, sanitize_text};

// ── Message ──────────────────────────────────────────────────────────

/// One post on the feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub author: String,
    pub content: String,
}

impl Message {
    pub fn new(author: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            author: author.into(),
            content: content.into(),
        }
    }

    /// Serialize for the wire, sanitizing both fields first.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let clean = Message {
            author: sanitize_text(&self.author),
            content: sanitize_text(&self.content),
        };
        serde_json::to_vec(&clean).context("serialize message")
    }

    /// Decode a payload taken off the bus. Invalid UTF-8 and control
    /// characters are dropped before parsing and from the parsed fields.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let text = sanitize_bytes(payload);
        let message: Message =
            serde_json::from_str(&text).with_context(|| format!("parse message {text:?}"))?;
        Ok(Message {
            author: sanitize_text(&message.author),
            content: sanitize_text(&message.content),
        })
    }
}

// ── Bus contract ─────────────────────────────────────────────────────

/// Publish/subscribe transport shared by all agents.
///
/// Delivery is at-most-once with no acknowledgment: a payload published
/// while nobody listens is simply dropped.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `topic`, returning how many subscribers it reached.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<usize>;

    /// Start receiving everything published on `topic` from now on.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;
}

/// A live subscription to one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next payload. Returns `None` when `timeout` elapses
    /// first or once the bus is gone.
    async fn next(&mut self, timeout: Option<Duration>) -> Option<Vec<u8>>;
}

// ── In-process bus ───────────────────────────────────────────────────

/// In-process bus: one broadcast channel per topic.
pub struct LocalBus {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<Arc<[u8]>>>>,
}

impl LocalBus {
    /// `capacity` is how many payloads a slow subscriber may fall behind
    /// before it starts losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        LocalBus {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Sender for `topic`, created on first use.
    fn sender(&self, topic: &str) -> Result<broadcast::Sender<Arc<[u8]>>> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| anyhow!("bus topic table poisoned"))?;
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.clone())
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<usize> {
        let sender = self.sender(topic)?;
        // `send` only fails when nobody is subscribed; that is a delivery count of zero.
        Ok(sender.send(Arc::from(payload)).unwrap_or(0))
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let receiver = self.sender(topic)?.subscribe();
        Ok(Box::new(LocalSubscription {
            topic: topic.to_string(),
            receiver,
        }))
    }
}

struct LocalSubscription {
    topic: String,
    receiver: broadcast::Receiver<Arc<[u8]>>,
}

#[async_trait]
impl Subscription for LocalSubscription {
    async fn next(&mut self, timeout: Option<Duration>) -> Option<Vec<u8>> {
        loop {
            let received = match timeout {
                Some(limit) => match tokio::time::timeout(limit, self.receiver.recv()).await {
                    Ok(received) => received,
                    Err(_) => return None,
                },
                None => self.receiver.recv().await,
            };
            match received {
                Ok(payload) => return Some(payload.to_vec()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "subscriber lagged, dropped messages");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(topic = %self.topic, "topic closed");
                    return None;
                }
            }
        }
    }
}

// ── Feed ─────────────────────────────────────────────────────────────

/// The tweet feed: [`Message`]s on one topic of a shared bus.
#[derive(Clone)]
pub struct Feed {
    bus: Arc<dyn MessageBus>,
    topic: String,
}

impl Feed {
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        Feed {
            bus,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Post `content` as `author`; returns the number of subscribers reached.
    pub async fn post(&self, author: &str, content: &str) -> Result<usize> {
        let payload = Message::new(author, content).to_payload()?;
        let delivered = self
            .bus
            .publish(&self.topic, payload)
            .await
            .with_context(|| format!("publish to `{}`", self.topic))?;
        debug!(topic = %self.topic, author, delivered, "published message");
        Ok(delivered)
    }

    pub async fn subscribe(&self) -> Result<Box<dyn Subscription>> {
        self.bus
            .subscribe(&self.topic)
            .await
            .with_context(|| format!("subscribe to `{}`", self.topic))
    }
}
