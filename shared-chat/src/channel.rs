//! Glue between the store's pub/sub and the session's incoming queue.

use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tracing::debug;

use crate::{
    session::Action,
    store::{Store, StoreError, Subscription, SubscriptionEvent},
};

pub const MESSAGES_CHANNEL: &str = "messages";

#[derive(Debug, Clone)]
pub struct BroadcastChannel {
    name: String,
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new(MESSAGES_CHANNEL)
    }
}

impl BroadcastChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Fire-and-forget publish; the receiver count is informational only.
    pub async fn publish<S: Store>(&self, store: &mut S, text: &str) -> Result<usize, StoreError> {
        let receivers = store.publish(&self.name, text).await?;
        debug!(channel = %self.name, receivers, "published");
        Ok(receivers)
    }

    /// Subscribes on a dedicated connection and forwards every message to
    /// `actions` as [`Action::IncomingMessage`] from a background task.
    ///
    /// The task ends on the first subscription error, or once the
    /// receiving side of `actions` is gone.
    pub async fn spawn_listener<S: Store>(
        &self,
        store: &S,
        actions: mpsc::Sender<Action>,
    ) -> Result<Listener, StoreError> {
        let subscription = store.subscribe(&self.name).await?;
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(forward_messages(
            subscription,
            self.name.clone(),
            actions,
            ready_tx,
        ));
        Ok(Listener {
            task,
            ready: ready_rx,
        })
    }
}

/// Handle to a running subscription task.
pub struct Listener {
    task: JoinHandle<()>,
    ready: oneshot::Receiver<()>,
}

impl Listener {
    /// Waits until the store has acknowledged the subscription.
    ///
    /// Returns `false` when the acknowledgement did not arrive in time or the
    /// task stopped first.
    pub async fn wait_ready(&mut self, limit: Duration) -> bool {
        matches!(timeout(limit, &mut self.ready).await, Ok(Ok(())))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn forward_messages<T: Subscription>(
    mut subscription: T,
    channel: String,
    actions: mpsc::Sender<Action>,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    loop {
        match subscription.next_event().await {
            SubscriptionEvent::Ack { channel } => {
                debug!(%channel, "subscription acknowledged");
                if let Some(ready) = ready.take() {
                    let _ = ready.send(());
                }
            }
            SubscriptionEvent::Message(text) => {
                if actions.send(Action::IncomingMessage(text)).await.is_err() {
                    debug!(%channel, "session gone; listener stopping");
                    break;
                }
            }
            SubscriptionEvent::Error(err) => {
                debug!(%channel, error = %err, "subscription failed; listener stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const READY: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn subscribers_see_messages_verbatim() {
        let mut store = MemoryStore::new();
        let channel = BroadcastChannel::default();

        let (tx_one, mut rx_one) = mpsc::channel(8);
        let (tx_two, mut rx_two) = mpsc::channel(8);
        let mut one = channel.spawn_listener(&store, tx_one).await.unwrap();
        let mut two = channel.spawn_listener(&store, tx_two).await.unwrap();
        assert!(one.wait_ready(READY).await);
        assert!(two.wait_ready(READY).await);

        let receivers = channel.publish(&mut store, "alice: hi  there ").await.unwrap();
        assert_eq!(receivers, 2);

        let expected = Action::IncomingMessage("alice: hi  there ".into());
        assert_eq!(rx_one.recv().await, Some(expected.clone()));
        assert_eq!(rx_two.recv().await, Some(expected));
    }

    #[tokio::test]
    async fn late_listener_misses_earlier_publish() {
        let mut store = MemoryStore::new();
        let channel = BroadcastChannel::default();

        let (early_tx, mut early_rx) = mpsc::channel(8);
        let mut early = channel.spawn_listener(&store, early_tx).await.unwrap();
        assert!(early.wait_ready(READY).await);

        channel.publish(&mut store, "before").await.unwrap();

        let (late_tx, mut late_rx) = mpsc::channel(8);
        let mut late = channel.spawn_listener(&store, late_tx).await.unwrap();
        assert!(late.wait_ready(READY).await);

        channel.publish(&mut store, "after").await.unwrap();

        assert_eq!(early_rx.recv().await, Some(Action::IncomingMessage("before".into())));
        assert_eq!(early_rx.recv().await, Some(Action::IncomingMessage("after".into())));
        assert_eq!(late_rx.recv().await, Some(Action::IncomingMessage("after".into())));
    }

    #[tokio::test]
    async fn listener_stops_on_subscription_error() {
        struct Broken {
            acked: bool,
        }

        impl Subscription for Broken {
            async fn next_event(&mut self) -> SubscriptionEvent {
                if self.acked {
                    SubscriptionEvent::Error(StoreError::Closed)
                } else {
                    self.acked = true;
                    SubscriptionEvent::Ack {
                        channel: MESSAGES_CHANNEL.into(),
                    }
                }
            }
        }

        let (tx, mut rx) = mpsc::channel(8);
        let (ready_tx, ready_rx) = oneshot::channel();
        forward_messages(Broken { acked: false }, MESSAGES_CHANNEL.into(), tx, ready_tx).await;

        assert_eq!(ready_rx.await, Ok(()));
        assert_eq!(rx.recv().await, None);
    }
}
