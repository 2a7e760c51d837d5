//! In-process store backing both the TCP server and the test suite.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, warn};

use super::{Store, StoreError, Subscription, SubscriptionEvent};

/// Messages buffered per channel before a slow subscriber starts lagging.
const CHANNEL_CAPACITY: usize = 128;

/// Cloneable handle to a shared in-memory store.
///
/// Keys expire lazily: an entry past its deadline is dropped the next time
/// anything touches it. Deadlines use Tokio's clock, so a paused test
/// runtime controls expiry.
///
/// Sets are kept in a `BTreeSet`, so members always come back sorted.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    keys: HashMap<String, Entry>,
    sets: HashMap<String, BTreeSet<String>>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl State {
    fn live_entry(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self
            .keys
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now());
        if expired {
            debug!(key, "key expired");
            self.keys.remove(key);
        }
        self.keys.get_mut(key)
    }

    fn sender(&mut self, channel: &str) -> &broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current live value of `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock()
            .live_entry(key)
            .map(|entry| entry.value.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // No code path panics while holding the lock; recover rather than propagate poison.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    type Subscription = MemorySubscription;

    async fn set_if_absent(
        &mut self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        if state.live_entry(key).is_some() {
            return Ok(false);
        }
        state.keys.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn set_if_present(
        &mut self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.live_entry(key) {
            Some(entry) => {
                entry.value = value.to_string();
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.lock().keys.remove(key);
        Ok(())
    }

    async fn set_add(&mut self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut state = self.lock();
        Ok(state
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&mut self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(members) = state.sets.get_mut(set) else {
            return Ok(false);
        };
        let removed = members.remove(member);
        if members.is_empty() {
            state.sets.remove(set);
        }
        Ok(removed)
    }

    async fn set_members(&mut self, set: &str) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        Ok(state
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&mut self, channel: &str, payload: &str) -> Result<usize, StoreError> {
        let state = self.lock();
        let Some(sender) = state.channels.get(channel) else {
            return Ok(0);
        };
        // A send error only means nobody is listening right now.
        Ok(sender.send(payload.to_string()).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<MemorySubscription, StoreError> {
        let receiver = self.lock().sender(channel).subscribe();
        Ok(MemorySubscription {
            channel: channel.to_string(),
            receiver,
            acknowledged: false,
        })
    }
}

pub struct MemorySubscription {
    channel: String,
    receiver: broadcast::Receiver<String>,
    acknowledged: bool,
}

impl Subscription for MemorySubscription {
    async fn next_event(&mut self) -> SubscriptionEvent {
        if !self.acknowledged {
            self.acknowledged = true;
            return SubscriptionEvent::Ack {
                channel: self.channel.clone(),
            };
        }

        loop {
            match self.receiver.recv().await {
                Ok(payload) => return SubscriptionEvent::Message(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "subscriber lagged; messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return SubscriptionEvent::Error(StoreError::Closed);
                }
            }
        }
    }
}
