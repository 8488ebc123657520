//! Typed queue handle: records travel as `name=value` line payloads.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::encoding::lines::{decode_lines, encode_lines};
use crate::error::{Result, StoreError};
use crate::schema::{Entity, Schema};
use crate::store::{DeleteOutcome, QueueMessage, QueueStore};
use crate::types::MessageHandle;

/// How long a received message stays hidden from other receivers.
pub const DEFAULT_VISIBILITY: Duration = Duration::from_secs(30);

/// How long an unreceived message is kept.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Handle to the queue carrying records of type `T`.
///
/// Like the table point operations, `push`, `peek`, `pop`, `renew` and
/// `remove` report success as a `bool` and leave failure messages in the
/// record's `last_error`. The message a record was pushed as or received
/// from is tracked in `meta.message`.
pub struct EntityQueue<T> {
    store: Arc<dyn QueueStore>,
    schema: Arc<Schema<T>>,
    visibility: Duration,
    ttl: Option<Duration>,
    initial_delay: Option<Duration>,
}

impl<T> Clone for EntityQueue<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            schema: self.schema.clone(),
            visibility: self.visibility,
            ttl: self.ttl,
            initial_delay: self.initial_delay,
        }
    }
}

impl<T: Entity> EntityQueue<T> {
    pub fn new(store: Arc<dyn QueueStore>, schema: Arc<Schema<T>>) -> Self {
        Self {
            store,
            schema,
            visibility: DEFAULT_VISIBILITY,
            ttl: Some(DEFAULT_MESSAGE_TTL),
            initial_delay: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Duration) -> Self {
        self.visibility = visibility;
        self
    }

    /// Message lifetime; `None` keeps messages until they are removed.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_initial_delay(mut self, delay: Option<Duration>) -> Self {
        self.initial_delay = delay.filter(|d| !d.is_zero());
        self
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// Enqueue `record`. On success `meta.message` names the new message.
    pub fn push(&self, record: &mut T) -> bool {
        let payload = encode_lines(&self.schema, record);
        let result = self
            .store
            .enqueue(&payload, self.ttl, self.initial_delay)
            .map(|message| {
                debug!(queue = %self.store.name(), id = %message.id, "pushed message");
                record.meta_mut().message = Some(MessageHandle {
                    id: message.id,
                    lease: None,
                });
            });
        self.settle(record, "push", result)
    }

    /// Load the next visible message into `record` without leasing it.
    /// Returns `false` when the queue is empty or the read failed.
    pub fn peek(&self, record: &mut T) -> bool {
        let result = self.store.peek();
        self.receive_into(record, "peek", result)
    }

    /// Lease the next visible message into `record`. Returns `false` when
    /// the queue is empty or the read failed.
    pub fn pop(&self, record: &mut T) -> bool {
        let result = self.store.dequeue(self.visibility);
        self.receive_into(record, "pop", result)
    }

    /// The next visible message without leasing it.
    pub fn try_peek(&self) -> Result<Option<T>> {
        Ok(self.store.peek()?.map(|message| self.materialize(&message)))
    }

    /// Lease the next visible message.
    pub fn try_pop(&self) -> Result<Option<T>> {
        Ok(self
            .store
            .dequeue(self.visibility)?
            .map(|message| self.materialize(&message)))
    }

    /// Extend the lease held by `record` by `delay`. With `refresh_payload`
    /// the stored message is rewritten from the record's current fields.
    pub fn renew(&self, record: &mut T, delay: Duration, refresh_payload: bool) -> bool {
        let result = self.try_renew(record, delay, refresh_payload);
        self.settle(record, "renew", result)
    }

    /// Delete the message leased by `record`. A message that is already gone
    /// counts as removed. On success the record no longer refers to it.
    pub fn remove(&self, record: &mut T) -> bool {
        let result = self.try_remove(record);
        self.settle(record, "remove", result)
    }

    fn try_renew(&self, record: &mut T, delay: Duration, refresh_payload: bool) -> Result<()> {
        let (id, lease) = leased(record)?;
        let payload = refresh_payload.then(|| encode_lines(&self.schema, record));
        let new_lease = self
            .store
            .update_lease(&id, &lease, payload.as_deref(), delay)?;
        record.meta_mut().message = Some(MessageHandle {
            id,
            lease: Some(new_lease),
        });
        Ok(())
    }

    fn try_remove(&self, record: &mut T) -> Result<()> {
        let (id, lease) = leased(record)?;
        match self.store.delete(&id, &lease)? {
            DeleteOutcome::Deleted => {
                debug!(queue = %self.store.name(), id = %id, "removed message");
            }
            DeleteOutcome::AlreadyGone => {
                debug!(queue = %self.store.name(), id = %id, "message already gone");
            }
        }
        record.meta_mut().message = None;
        Ok(())
    }

    fn receive_into(
        &self,
        record: &mut T,
        action: &'static str,
        received: Result<Option<QueueMessage>>,
    ) -> bool {
        let result = received.map(|message| match message {
            Some(message) => {
                *record = self.materialize(&message);
                true
            }
            None => false,
        });
        match result {
            Ok(found) => {
                record.meta_mut().last_error = None;
                found
            }
            Err(e) => {
                self.settle(record, action, Err(e));
                false
            }
        }
    }

    fn materialize(&self, message: &QueueMessage) -> T {
        let mut record = T::default();
        decode_lines(&self.schema, &mut record, &message.payload);
        record.meta_mut().message = Some(MessageHandle {
            id: message.id.clone(),
            lease: message.lease.clone(),
        });
        record
    }

    fn settle(&self, record: &mut T, action: &'static str, result: Result<()>) -> bool {
        let meta = record.meta_mut();
        match result {
            Ok(()) => {
                meta.last_error = None;
                true
            }
            Err(e) => {
                warn!(queue = %self.store.name(), action, error = %e, "queue operation failed");
                meta.last_error = Some(e.to_string());
                false
            }
        }
    }
}

/// Message id and lease held by `record`.
fn leased<T: Entity>(record: &T) -> Result<(String, String)> {
    match &record.meta().message {
        Some(MessageHandle {
            id,
            lease: Some(lease),
        }) => Ok((id.clone(), lease.clone())),
        Some(MessageHandle { id, lease: None }) => {
            Err(StoreError::LeaseMismatch(id.clone()).into())
        }
        None => Err(StoreError::MessageNotFound("record holds no message".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryQueueStore;
    use crate::test_support::{Contact, contact};

    fn queue() -> (Arc<MemoryQueueStore>, EntityQueue<Contact>) {
        let store = Arc::new(MemoryQueueStore::new("contacts"));
        let queue = EntityQueue::new(store.clone(), Arc::new(Schema::derive()));
        (store, queue)
    }

    #[test]
    fn test_push_pop_remove_round_trip() {
        let (store, queue) = queue();
        let mut out = contact("A", "1", "alice");
        out.age = Some(3);
        assert!(queue.push(&mut out));
        let pushed = out.meta.message.clone().unwrap();
        assert_eq!(pushed.lease, None);

        let mut received = Contact::default();
        assert!(queue.pop(&mut received));
        assert_eq!(received.meta.partition_key, "A");
        assert_eq!(received.meta.row_key, "1");
        assert_eq!(received.name, "alice");
        assert_eq!(received.age, Some(3));
        let handle = received.meta.message.clone().unwrap();
        assert_eq!(handle.id, pushed.id);
        assert!(handle.lease.is_some());

        assert!(queue.remove(&mut received));
        assert_eq!(received.meta.message, None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_peek_does_not_lease() {
        let (_, queue) = queue();
        assert!(queue.push(&mut contact("A", "1", "x")));

        let mut peeked = Contact::default();
        assert!(queue.peek(&mut peeked));
        assert_eq!(peeked.name, "x");
        assert_eq!(peeked.meta.message.as_ref().unwrap().lease, None);
        assert!(!queue.remove(&mut peeked));
        assert!(peeked.meta.last_error.is_some());

        assert!(queue.try_pop().unwrap().is_some());
        assert!(queue.try_peek().unwrap().is_none());
    }

    #[test]
    fn test_empty_queue() {
        let (_, queue) = queue();
        let mut c = contact("keep", "me", "x");
        assert!(!queue.pop(&mut c));
        assert_eq!(c.meta.last_error, None);
        assert_eq!(c.name, "x");
        assert!(queue.try_pop().unwrap().is_none());
    }

    #[test]
    fn test_remove_already_gone_succeeds() {
        let (store, queue) = queue();
        assert!(queue.push(&mut contact("A", "1", "x")));
        let mut received = queue.try_pop().unwrap().unwrap();
        let mut twin = received.clone();

        assert!(queue.remove(&mut received));
        assert!(queue.remove(&mut twin));
        assert!(store.is_empty());
    }

    #[test]
    fn test_renew_refreshes_payload_and_lease() {
        let (store, queue) = queue();
        let queue = queue.with_visibility(Duration::from_secs(10));
        assert!(queue.push(&mut contact("A", "1", "draft")));

        let mut received = queue.try_pop().unwrap().unwrap();
        let first_lease = received.meta.message.clone().unwrap().lease;
        received.name = "final".into();
        assert!(queue.renew(&mut received, Duration::from_secs(1), true));
        assert_ne!(received.meta.message.clone().unwrap().lease, first_lease);

        store.advance(Duration::from_secs(2));
        let again = queue.try_pop().unwrap().unwrap();
        assert_eq!(again.name, "final");

        // The earlier lease no longer matches.
        assert!(!queue.remove(&mut received));
        assert!(received.meta.last_error.unwrap().contains("lease"));
    }

    #[test]
    fn test_bad_value_does_not_block_delivery() {
        let (store, queue) = queue();
        store
            .enqueue("PartitionKey=A\nRowKey=1\nAge=old\nName=x\n", None, None)
            .unwrap();

        let mut received = Contact::default();
        assert!(queue.pop(&mut received));
        assert_eq!(received.meta.last_error, None);
        assert_eq!(received.name, "x");
        assert_eq!(received.age, None);
        assert!(queue.remove(&mut received));
        assert!(store.is_empty());
    }

    #[test]
    fn test_renew_without_message_fails() {
        let (_, queue) = queue();
        let mut c = contact("A", "1", "x");
        assert!(!queue.renew(&mut c, Duration::from_secs(1), false));
        assert!(c.meta.last_error.is_some());
    }

    #[test]
    fn test_initial_delay_hides_message() {
        let (store, queue) = queue();
        let queue = queue.with_initial_delay(Some(Duration::from_secs(5)));
        assert!(queue.push(&mut contact("A", "1", "x")));
        assert!(queue.try_peek().unwrap().is_none());
        store.advance(Duration::from_secs(6));
        assert!(queue.try_peek().unwrap().is_some());
    }

    #[test]
    fn test_ttl_expires_message() {
        let (store, queue) = queue();
        let queue = queue.with_ttl(Some(Duration::from_secs(60)));
        assert!(queue.push(&mut contact("A", "1", "x")));
        store.advance(Duration::from_secs(61));
        assert!(queue.try_peek().unwrap().is_none());
        assert!(store.is_empty());
    }
}
