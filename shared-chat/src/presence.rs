//! Username uniqueness via an expiring lock key.
//!
//! A session owns `online.<username>` for as long as it keeps renewing it.
//! If the process dies the key simply expires, after which the name can be
//! claimed again. Nothing else is needed for crash recovery.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::store::{Store, StoreError};

const KEY_PREFIX: &str = "online.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    /// Another live session (or a crashed one whose lease has not expired yet) holds the name.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// The lease expired before it could be renewed.
    Missing,
}

#[derive(Debug, Clone)]
pub struct PresenceLease {
    username: String,
    key: String,
    ttl: Duration,
}

impl PresenceLease {
    pub fn new(username: &str, ttl: Duration) -> Self {
        Self {
            username: username.to_string(),
            key: lease_key(username),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn acquire<S: Store>(&self, store: &mut S) -> Result<AcquireOutcome, StoreError> {
        if store
            .set_if_absent(&self.key, &self.username, self.ttl)
            .await?
        {
            info!(key = %self.key, ttl = ?self.ttl, "presence lease acquired");
            Ok(AcquireOutcome::Acquired)
        } else {
            debug!(key = %self.key, "presence lease held elsewhere");
            Ok(AcquireOutcome::Conflict)
        }
    }

    pub async fn renew<S: Store>(&self, store: &mut S) -> Result<RenewOutcome, StoreError> {
        if store
            .set_if_present(&self.key, &self.username, self.ttl)
            .await?
        {
            debug!(key = %self.key, "presence lease renewed");
            Ok(RenewOutcome::Renewed)
        } else {
            debug!(key = %self.key, "presence lease expired before renewal");
            Ok(RenewOutcome::Missing)
        }
    }

    /// Deletes the lease. Failures are logged and otherwise ignored; the
    /// TTL reclaims the key anyway.
    pub async fn release<S: Store>(&self, store: &mut S) {
        match store.delete(&self.key).await {
            Ok(()) => info!(key = %self.key, "presence lease released"),
            Err(err) => warn!(key = %self.key, error = %err, "failed to release presence lease"),
        }
    }
}

pub fn lease_key(username: &str) -> String {
    format!("{KEY_PREFIX}{username}")
}
