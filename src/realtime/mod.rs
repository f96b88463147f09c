//! In-process change fan-out, one broadcast channel per topic.

mod ws;

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use axum::{routing::get, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::AppState;

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    Messages,
    Reviews,
    Groups,
    GroupParticipants,
}

impl TopicKind {
    fn as_str(self) -> &'static str {
        match self {
            TopicKind::Messages => "messages",
            TopicKind::Reviews => "reviews",
            TopicKind::Groups => "groups",
            TopicKind::GroupParticipants => "group_participants",
        }
    }
}

/// `kind:id`, e.g. `messages:<group id>` or `reviews:<book id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub kind: TopicKind,
    pub id: String,
}

impl Topic {
    pub fn new(kind: TopicKind, id: impl Into<String>) -> Topic {
        Topic { kind, id: id.into() }
    }

    pub fn messages(group_id: &str) -> Topic {
        Topic::new(TopicKind::Messages, group_id)
    }

    pub fn reviews(book_id: &str) -> Topic {
        Topic::new(TopicKind::Reviews, book_id)
    }

    pub fn groups(group_id: &str) -> Topic {
        Topic::new(TopicKind::Groups, group_id)
    }

    pub fn group_participants(group_id: &str) -> Topic {
        Topic::new(TopicKind::GroupParticipants, group_id)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: String,
    pub event: EventKind,
    pub payload: serde_json::Value,
}

/// Topic registry owned by the application state.
///
/// Channels are created on first subscribe and reused by later subscribers.
/// Publishing never fails the caller.
#[derive(Clone)]
pub struct Realtime {
    channels: Arc<Mutex<HashMap<Topic, broadcast::Sender<Event>>>>,
    capacity: usize,
}

impl Default for Realtime {
    fn default() -> Self {
        Realtime::new(DEFAULT_CAPACITY)
    }
}

impl Realtime {
    pub fn new(capacity: usize) -> Realtime {
        Realtime { channels: Arc::default(), capacity: capacity.max(1) }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Topic, broadcast::Sender<Event>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Also drops every channel whose subscribers have all gone away.
    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<Event> {
        let mut channels = self.channels();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn publish(&self, topic: Topic, event: EventKind, payload: &impl Serialize) {
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%topic, error = %err, "unserializable realtime payload");
                return;
            }
        };

        let mut channels = self.channels();
        let Some(tx) = channels.get(&topic) else {
            debug!(%topic, "no realtime subscribers");
            return;
        };

        let message = Event { topic: topic.to_string(), event, payload };
        if tx.send(message).is_err() {
            // every receiver is gone
            channels.remove(&topic);
            debug!(%topic, "dropped idle realtime channel");
        }
    }

    pub fn topic_count(&self) -> usize {
        self.channels().len()
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/{kind}/{id}", get(ws::subscribe))
}
