//! TCP front end exposing a [`MemoryStore`] over the JSON line protocol.

use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    message::{Request, Response, read_message, write_message},
    store::{MemoryStore, Store, StoreError, Subscription, SubscriptionEvent},
};

pub struct StoreServer {
    listener: TcpListener,
    store: MemoryStore,
}

impl StoreServer {
    pub fn new(listener: TcpListener) -> Self {
        Self::with_store(listener, MemoryStore::new())
    }

    /// Serves an existing store, letting callers inspect state alongside network clients.
    pub fn with_store(listener: TcpListener, store: MemoryStore) -> Self {
        Self { listener, store }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let StoreServer { listener, store } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("store shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &store);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, store: &MemoryStore) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, store),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, store: &MemoryStore) {
    let store = store.clone();
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, store).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, mut store: MemoryStore) -> Result<()> {
    let peer = stream.peer_addr().ok();
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = writer;

    debug!(?peer, "connection opened");
    while let Some(request) = read_message::<_, Request>(&mut reader).await? {
        let response = match request {
            Request::Subscribe { channel } => {
                run_subscriber(&store, &channel, &mut reader, &mut writer).await?;
                break;
            }
            command => execute(&mut store, command).await,
        };
        write_message(&mut writer, &response).await?;
    }
    debug!(?peer, "connection closed");

    Ok(())
}

/// Runs one command against the store.
///
/// `Subscribe` changes the connection mode and is handled by the caller.
pub async fn execute<S: Store>(store: &mut S, request: Request) -> Response {
    let result = match request {
        Request::SetIfAbsent { key, value, ttl_ms } => store
            .set_if_absent(&key, &value, Duration::from_millis(ttl_ms))
            .await
            .map(|value| Response::Flag { value }),
        Request::SetIfPresent { key, value, ttl_ms } => store
            .set_if_present(&key, &value, Duration::from_millis(ttl_ms))
            .await
            .map(|value| Response::Flag { value }),
        Request::Delete { key } => store.delete(&key).await.map(|()| Response::Ok),
        Request::SetAdd { set, member } => store
            .set_add(&set, &member)
            .await
            .map(|value| Response::Flag { value }),
        Request::SetRemove { set, member } => store
            .set_remove(&set, &member)
            .await
            .map(|value| Response::Flag { value }),
        Request::SetMembers { set } => store
            .set_members(&set)
            .await
            .map(|members| Response::Members { members }),
        Request::Publish { channel, payload } => store
            .publish(&channel, &payload)
            .await
            .map(|receivers| Response::Delivered { receivers }),
        Request::Subscribe { .. } => Err(StoreError::Protocol(
            "subscribe must be handled by the connection".to_string(),
        )),
    };

    result.unwrap_or_else(|err| Response::Error {
        message: err.to_string(),
    })
}

async fn run_subscriber<R, W>(
    store: &MemoryStore,
    channel: &str,
    reader: &mut R,
    writer: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut subscription = store.subscribe(channel).await?;
    debug!(channel, "connection subscribed");

    loop {
        select! {
            client_message = read_message::<_, Request>(reader) => {
                if !handle_subscriber_request(client_message, writer).await? {
                    break;
                }
            }
            event = subscription.next_event() => {
                if !forward_event(event, channel, writer).await? {
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn handle_subscriber_request<W>(
    message: std::io::Result<Option<Request>>,
    writer: &mut W,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    match message? {
        Some(request) => {
            debug!(?request, "rejecting command on subscribed connection");
            write_message(
                writer,
                &Response::Error {
                    message: "connection is in subscriber mode".to_string(),
                },
            )
            .await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn forward_event<W>(event: SubscriptionEvent, channel: &str, writer: &mut W) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let response = match event {
        SubscriptionEvent::Ack { channel } => Response::Subscribed { channel },
        SubscriptionEvent::Message(payload) => Response::Message {
            channel: channel.to_string(),
            payload,
        },
        SubscriptionEvent::Error(err) => {
            write_message(
                writer,
                &Response::Error {
                    message: err.to_string(),
                },
            )
            .await?;
            return Ok(false);
        }
    };

    if let Err(err) = write_message(writer, &response).await {
        debug!(?err, "failed to deliver message to subscriber");
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_maps_store_results_to_responses() {
        let mut store = MemoryStore::new();

        let acquired = execute(
            &mut store,
            Request::SetIfAbsent {
                key: "online.alice".into(),
                value: "alice".into(),
                ttl_ms: 1_000,
            },
        )
        .await;
        assert_eq!(acquired, Response::Flag { value: true });

        let members = execute(
            &mut store,
            Request::SetMembers {
                set: "users".into(),
            },
        )
        .await;
        assert_eq!(members, Response::Members { members: vec![] });

        let deleted = execute(
            &mut store,
            Request::Delete {
                key: "online.alice".into(),
            },
        )
        .await;
        assert_eq!(deleted, Response::Ok);
    }

    #[tokio::test]
    async fn execute_rejects_inline_subscribe() {
        let mut store = MemoryStore::new();
        let response = execute(
            &mut store,
            Request::Subscribe {
                channel: "messages".into(),
            },
        )
        .await;
        assert!(matches!(response, Response::Error { .. }));
    }
}
