use std::{net::SocketAddr, time::Duration};

use clap::Parser;

use crate::session::{SessionConfig, SessionError};

pub const DEFAULT_STORE_ADDR: &str = "127.0.0.1:6380";

/// Chat with everyone connected to the same store.
///
/// Type a line to send it, `/who` to list online users, `/exit` to leave.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ChatArgs {
    /// Name to chat under. Only one session per name may be online.
    pub username: String,

    /// Address of the chat store server.
    #[arg(long, env = "CHAT_STORE_ADDR", default_value = DEFAULT_STORE_ADDR)]
    pub store: SocketAddr,

    /// Seconds before an unrenewed presence lease expires.
    #[arg(long, value_name = "SECS", default_value_t = 120)]
    pub lease_ttl: u64,

    /// Seconds between presence lease renewals. Must be below the TTL.
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub renew_interval: u64,
}

impl ChatArgs {
    pub fn session_config(&self) -> Result<SessionConfig, SessionError> {
        SessionConfig::new(&self.username)?.with_timing(
            Duration::from_secs(self.lease_ttl),
            Duration::from_secs(self.renew_interval),
        )
    }
}

/// Shared key-value and pub/sub store for chat sessions.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct StoreArgs {
    /// Socket address the store should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = DEFAULT_STORE_ADDR)]
    pub listen: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_is_the_only_required_argument() {
        let args = ChatArgs::try_parse_from(["shared-chat", "alice"]).unwrap();
        assert_eq!(args.username, "alice");
        assert_eq!(args.lease_ttl, 120);
        assert_eq!(args.renew_interval, 60);

        let config = args.session_config().unwrap();
        assert_eq!(config.username(), "alice");
    }

    #[test]
    fn wrong_argument_count_is_a_usage_error() {
        assert!(ChatArgs::try_parse_from(["shared-chat"]).is_err());
        assert!(ChatArgs::try_parse_from(["shared-chat", "alice", "bob"]).is_err());
    }

    #[test]
    fn renew_interval_must_stay_below_ttl() {
        let args = ChatArgs::try_parse_from([
            "shared-chat",
            "alice",
            "--lease-ttl",
            "30",
            "--renew-interval",
            "30",
        ])
        .unwrap();
        assert!(matches!(
            args.session_config(),
            Err(SessionError::Config(_))
        ));
    }
}
