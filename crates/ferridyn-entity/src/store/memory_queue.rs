//! In-memory queue with leased delivery, visibility delays and TTL expiry.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::types::now_millis;

use super::{DeleteOutcome, QueueMessage, QueueStore};

struct QueueState {
    messages: VecDeque<QueueMessage>,
    next_id: u64,
    next_lease: u64,
    /// Added to the wall clock; lets callers fast-forward time.
    skew_millis: u64,
}

impl QueueState {
    fn now(&self) -> u64 {
        now_millis() + self.skew_millis
    }

    fn purge_expired(&mut self, now: u64) {
        self.messages
            .retain(|m| m.expires_at.is_none_or(|expires| expires > now));
    }

    fn new_lease(&mut self) -> String {
        self.next_lease += 1;
        format!("lease-{}", self.next_lease)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// A FIFO queue held in process memory.
pub struct MemoryQueueStore {
    name: String,
    state: Mutex<QueueState>,
}

impl MemoryQueueStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                next_id: 0,
                next_lease: 0,
                skew_millis: 0,
            }),
        }
    }

    /// Number of unexpired messages, visible or not.
    pub fn len(&self) -> usize {
        let mut state = self.state.lock();
        let now = state.now();
        state.purge_expired(now);
        state.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move this queue's clock forward.
    pub fn advance(&self, by: Duration) {
        self.state.lock().skew_millis += millis(by);
    }
}

impl QueueStore for MemoryQueueStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn enqueue(
        &self,
        payload: &str,
        ttl: Option<Duration>,
        initial_delay: Option<Duration>,
    ) -> Result<QueueMessage> {
        let mut state = self.state.lock();
        let now = state.now();
        state.next_id += 1;
        let message = QueueMessage {
            id: format!("msg-{}", state.next_id),
            payload: payload.to_string(),
            lease: None,
            dequeue_count: 0,
            inserted_at: now,
            expires_at: ttl.map(|ttl| now + millis(ttl)),
            visible_at: now + initial_delay.map_or(0, millis),
        };
        state.messages.push_back(message.clone());
        Ok(message)
    }

    fn peek(&self) -> Result<Option<QueueMessage>> {
        let mut state = self.state.lock();
        let now = state.now();
        state.purge_expired(now);
        Ok(state
            .messages
            .iter()
            .find(|m| m.visible_at <= now)
            .map(|m| QueueMessage {
                lease: None,
                ..m.clone()
            }))
    }

    fn dequeue(&self, visibility: Duration) -> Result<Option<QueueMessage>> {
        let mut state = self.state.lock();
        let now = state.now();
        state.purge_expired(now);
        let Some(idx) = state.messages.iter().position(|m| m.visible_at <= now) else {
            return Ok(None);
        };
        let lease = state.new_lease();
        let message = &mut state.messages[idx];
        message.lease = Some(lease);
        message.visible_at = now + millis(visibility);
        message.dequeue_count += 1;
        Ok(Some(message.clone()))
    }

    fn update_lease(
        &self,
        id: &str,
        lease: &str,
        payload: Option<&str>,
        visibility: Duration,
    ) -> Result<String> {
        let mut state = self.state.lock();
        let now = state.now();
        state.purge_expired(now);
        let idx = state
            .position(id)
            .ok_or_else(|| StoreError::MessageNotFound(id.to_string()))?;
        if state.messages[idx].lease.as_deref() != Some(lease) {
            return Err(StoreError::LeaseMismatch(id.to_string()).into());
        }
        let new_lease = state.new_lease();
        let message = &mut state.messages[idx];
        if let Some(payload) = payload {
            message.payload = payload.to_string();
        }
        message.lease = Some(new_lease.clone());
        message.visible_at = now + millis(visibility);
        Ok(new_lease)
    }

    fn delete(&self, id: &str, lease: &str) -> Result<DeleteOutcome> {
        let mut state = self.state.lock();
        let Some(idx) = state.position(id) else {
            return Ok(DeleteOutcome::AlreadyGone);
        };
        if state.messages[idx].lease.as_deref() != Some(lease) {
            return Err(StoreError::LeaseMismatch(id.to_string()).into());
        }
        state.messages.remove(idx);
        Ok(DeleteOutcome::Deleted)
    }
}
