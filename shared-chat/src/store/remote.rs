use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::BufReader,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::debug;

use super::{Store, StoreError, Subscription, SubscriptionEvent};
use crate::message::{Request, Response, read_message, write_message};

/// Store client speaking the JSON line protocol to a `chat-store` server.
///
/// The command connection is strictly request/response. Subscriptions dial
/// a second connection, since a subscribed connection only streams messages.
pub struct RemoteStore {
    addr: SocketAddr,
    connection: Connection,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: SocketAddr) -> Result<Self, StoreError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn send(&mut self, request: &Request) -> Result<(), StoreError> {
        write_message(&mut self.writer, request).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Response, StoreError> {
        match read_message::<_, Response>(&mut self.reader).await? {
            Some(Response::Error { message }) => Err(StoreError::Server(message)),
            Some(response) => Ok(response),
            None => Err(StoreError::Closed),
        }
    }

    async fn call(&mut self, request: Request) -> Result<Response, StoreError> {
        self.send(&request).await?;
        self.receive().await
    }
}

impl RemoteStore {
    pub async fn connect(addr: SocketAddr) -> Result<Self, StoreError> {
        let connection = Connection::open(addr).await?;
        debug!(%addr, "connected to store");
        Ok(Self { addr, connection })
    }

    async fn call_flag(&mut self, request: Request) -> Result<bool, StoreError> {
        match self.connection.call(request).await? {
            Response::Flag { value } => Ok(value),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> StoreError {
    StoreError::Protocol(format!("{response:?}"))
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

impl Store for RemoteStore {
    type Subscription = RemoteSubscription;

    async fn set_if_absent(
        &mut self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.call_flag(Request::SetIfAbsent {
            key: key.to_string(),
            value: value.to_string(),
            ttl_ms: ttl_millis(ttl),
        })
        .await
    }

    async fn set_if_present(
        &mut self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.call_flag(Request::SetIfPresent {
            key: key.to_string(),
            value: value.to_string(),
            ttl_ms: ttl_millis(ttl),
        })
        .await
    }

    async fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        match self
            .connection
            .call(Request::Delete {
                key: key.to_string(),
            })
            .await?
        {
            Response::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn set_add(&mut self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.call_flag(Request::SetAdd {
            set: set.to_string(),
            member: member.to_string(),
        })
        .await
    }

    async fn set_remove(&mut self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.call_flag(Request::SetRemove {
            set: set.to_string(),
            member: member.to_string(),
        })
        .await
    }

    async fn set_members(&mut self, set: &str) -> Result<Vec<String>, StoreError> {
        match self
            .connection
            .call(Request::SetMembers {
                set: set.to_string(),
            })
            .await?
        {
            Response::Members { members } => Ok(members),
            other => Err(unexpected(&other)),
        }
    }

    async fn publish(&mut self, channel: &str, payload: &str) -> Result<usize, StoreError> {
        match self
            .connection
            .call(Request::Publish {
                channel: channel.to_string(),
                payload: payload.to_string(),
            })
            .await?
        {
            Response::Delivered { receivers } => Ok(receivers),
            other => Err(unexpected(&other)),
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<RemoteSubscription, StoreError> {
        let mut connection = Connection::open(self.addr).await?;
        connection
            .send(&Request::Subscribe {
                channel: channel.to_string(),
            })
            .await?;
        Ok(RemoteSubscription { connection })
    }
}

pub struct RemoteSubscription {
    connection: Connection,
}

impl Subscription for RemoteSubscription {
    async fn next_event(&mut self) -> SubscriptionEvent {
        match self.connection.receive().await {
            Ok(Response::Message { payload, .. }) => SubscriptionEvent::Message(payload),
            Ok(Response::Subscribed { channel }) => SubscriptionEvent::Ack { channel },
            Ok(other) => SubscriptionEvent::Error(unexpected(&other)),
            Err(err) => SubscriptionEvent::Error(err),
        }
    }
}
