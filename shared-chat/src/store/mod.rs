//! Capability interface over the shared key-value/pub-sub backend.
//!
//! Every operation names its key, set, or channel explicitly; nothing in
//! the crate reaches the backend through hidden global state. Two
//! implementations exist:
//!
//! - [`memory::MemoryStore`] keeps everything in process. The store server
//!   is built on it, and tests use it directly.
//! - [`remote::RemoteStore`] talks to a `chat-store` server over TCP.

use std::{future::Future, io, time::Duration};

use thiserror::Error;

pub mod memory;
pub mod remote;

pub use memory::MemoryStore;
pub use remote::RemoteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store connection closed")]
    Closed,

    #[error("unexpected store response: {0}")]
    Protocol(String),

    #[error("store error: {0}")]
    Server(String),
}

/// One event observed on a subscription.
#[derive(Debug)]
pub enum SubscriptionEvent {
    Message(String),
    Ack { channel: String },
    Error(StoreError),
}

/// The command half of the store.
///
/// Command methods take `&mut self`: a connection carries one request at a
/// time and belongs to a single owner. [`Store::subscribe`] takes `&self`
/// because it never reuses the command connection.
pub trait Store: Send + Sync + 'static {
    type Subscription: Subscription;

    /// Atomically sets `key` only if it has no live value.
    fn set_if_absent(
        &mut self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Atomically overwrites `key` and resets its expiry only if it still has a live value.
    fn set_if_present(
        &mut self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn delete(&mut self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns `true` when the member was not already in the set.
    fn set_add(
        &mut self,
        set: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns `true` when the member was present.
    fn set_remove(
        &mut self,
        set: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn set_members(
        &mut self,
        set: &str,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Publishes `payload` and returns how many subscribers it reached.
    fn publish(
        &mut self,
        channel: &str,
        payload: &str,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Attaches a new subscriber to `channel` on its own connection.
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<Self::Subscription, StoreError>> + Send;
}

/// The receive half produced by [`Store::subscribe`].
///
/// The first event is always an [`SubscriptionEvent::Ack`]. After an
/// [`SubscriptionEvent::Error`] the subscription is finished.
pub trait Subscription: Send + 'static {
    fn next_event(&mut self) -> impl Future<Output = SubscriptionEvent> + Send;
}
