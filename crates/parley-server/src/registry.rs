//! Running sessions, keyed by room name.
//!
//! Each entry is the sending half of a session's event channel. The lock is
//! a `std::sync::RwLock`: every acquisition is a brief map operation that
//! never spans an `.await`.

use parley_session::SessionEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("no session is running for room {0}")]
    NotRunning(String),

    #[error("session for room {0} has ended")]
    Closed(String),
}

struct Entry {
    generation: u64,
    sender: mpsc::Sender<SessionEvent>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Entry>>>,
    next_generation: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an event channel for `room`.
    ///
    /// Returns `None` when a session is already running there. The
    /// generation identifies this registration for [`Self::remove`].
    pub fn register(
        &self,
        room: &str,
        buffer: usize,
    ) -> Option<(u64, mpsc::Receiver<SessionEvent>)> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(room) {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        sessions.insert(room.to_string(), Entry { generation, sender });
        Some((generation, receiver))
    }

    /// Drops the registration for `room` if it is still `generation`.
    pub fn remove(&self, room: &str, generation: u64) -> bool {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match sessions.get(room) {
            Some(entry) if entry.generation == generation => {
                sessions.remove(room);
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self, room: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(room)
    }

    /// Room names with a running session, sorted.
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        rooms.sort();
        rooms
    }

    /// Queues `event` for the session in `room`, waiting for buffer space.
    pub async fn deliver(&self, room: &str, event: SessionEvent) -> Result<(), DeliveryError> {
        let sender = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .map(|entry| entry.sender.clone())
            .ok_or_else(|| DeliveryError::NotRunning(room.to_string()))?;

        sender
            .send(event)
            .await
            .map_err(|_| DeliveryError::Closed(room.to_string()))
    }
}
