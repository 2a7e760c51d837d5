//! Advisory set of usernames believed to be online.
//!
//! The presence lease is what enforces uniqueness. This set is only what
//! `/who` reads, and a crashed session's name stays in it until someone
//! with that name joins and leaves again.

use tracing::{debug, info};

use crate::store::{Store, StoreError};

pub const USERS_SET: &str = "users";

#[derive(Debug, Clone)]
pub struct Registry {
    set: String,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(USERS_SET)
    }
}

impl Registry {
    pub fn new(set: &str) -> Self {
        Self {
            set: set.to_string(),
        }
    }

    /// Adds `username`. Call only while holding that user's presence lease.
    pub async fn join<S: Store>(&self, store: &mut S, username: &str) -> Result<(), StoreError> {
        if store.set_add(&self.set, username).await? {
            info!(set = %self.set, username, "joined registry");
        } else {
            debug!(set = %self.set, username, "reclaimed stale registry entry");
        }
        Ok(())
    }

    pub async fn leave<S: Store>(&self, store: &mut S, username: &str) -> Result<(), StoreError> {
        let removed = store.set_remove(&self.set, username).await?;
        debug!(set = %self.set, username, removed, "left registry");
        Ok(())
    }

    pub async fn list<S: Store>(&self, store: &mut S) -> Result<Vec<String>, StoreError> {
        store.set_members(&self.set).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn list_reflects_joins_and_leaves() {
        let mut store = MemoryStore::new();
        let registry = Registry::default();

        registry.join(&mut store, "bob").await.unwrap();
        registry.join(&mut store, "alice").await.unwrap();
        assert_eq!(registry.list(&mut store).await.unwrap(), vec!["alice", "bob"]);

        registry.leave(&mut store, "bob").await.unwrap();
        assert_eq!(registry.list(&mut store).await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn joining_over_a_stale_entry_succeeds() {
        let mut store = MemoryStore::new();
        let registry = Registry::default();

        registry.join(&mut store, "alice").await.unwrap();
        registry.join(&mut store, "alice").await.unwrap();
        assert_eq!(registry.list(&mut store).await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn leaving_twice_is_harmless() {
        let mut store = MemoryStore::new();
        let registry = Registry::default();

        registry.join(&mut store, "alice").await.unwrap();
        registry.leave(&mut store, "alice").await.unwrap();
        registry.leave(&mut store, "alice").await.unwrap();
        assert!(registry.list(&mut store).await.unwrap().is_empty());
    }
}
