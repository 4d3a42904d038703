//! Mailbox directory shared by every session

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ropwire_core::ReplicaGuid;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::session::Session;
use crate::store::Store;

/// Server inner state
pub(crate) struct ServerInner {
    /// Server configuration
    pub(crate) config: ServerConfig,
    /// Mailboxes by lowercased ESSDN
    pub(crate) mailboxes: DashMap<String, Arc<Mutex<Store>>>,
    /// GUID source
    pub(crate) rng: Mutex<StdRng>,
}

/// In-memory ROP server
///
/// Cloning is cheap; every clone serves the same mailboxes. Each client
/// connection gets its own [`Session`] holding its handles and logons.
#[derive(Clone)]
pub struct Server {
    pub(crate) inner: Arc<ServerInner>,
}

impl Server {
    /// Create a server after validating `config`
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.replica_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        tracing::info!(
            "Server ready: response budget {:#X}, {} handle slots",
            config.max_response_size,
            config.max_handle_slots
        );
        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                mailboxes: DashMap::new(),
                rng: Mutex::new(rng),
            }),
        })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Number of provisioned mailboxes
    #[must_use]
    pub fn mailbox_count(&self) -> usize {
        self.inner.mailboxes.len()
    }

    /// Mailbox for `essdn`, provisioned on first use
    ///
    /// # Errors
    ///
    /// Fails only if a new store cannot be built.
    pub fn mailbox(&self, essdn: &str) -> Result<Arc<Mutex<Store>>> {
        let key = essdn.to_ascii_lowercase();
        if let Some(store) = self.inner.mailboxes.get(&key) {
            return Ok(Arc::clone(store.value()));
        }
        let (replica, mailbox) = {
            let mut rng = self.inner.rng.lock().unwrap_or_else(PoisonError::into_inner);
            (ReplicaGuid(rng.r#gen()), ReplicaGuid(rng.r#gen()))
        };
        let store = Store::new(replica, mailbox)?;
        let entry = self
            .inner
            .mailboxes
            .entry(key)
            .or_insert_with(|| {
                tracing::info!("Provisioned mailbox {} with replica {}", essdn, replica);
                Arc::new(Mutex::new(store))
            });
        Ok(Arc::clone(entry.value()))
    }

    /// New client session
    #[must_use]
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }
}

/// Lock a store, recovering from a panicked holder
pub(crate) fn lock(store: &Mutex<Store>) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    #[test]
    fn test_mailbox_lookup_ignores_case() {
        let server = Server::new(ServerConfig::default()).unwrap();
        let a = server.mailbox("/o=Org/cn=Alice").unwrap();
        let b = server.mailbox("/O=ORG/CN=alice").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(server.mailbox_count(), 1);
    }

    #[test]
    fn test_seeded_guids_are_reproducible() {
        let config = ServerConfig {
            replica_seed: Some(7),
            ..ServerConfig::default()
        };
        let first = Server::new(config.clone()).unwrap().mailbox("a").unwrap();
        let second = Server::new(config).unwrap().mailbox("a").unwrap();
        assert_eq!(lock(&first).replica_guid(), lock(&second).replica_guid());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ServerConfig {
            max_open_objects: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(Server::new(config), Err(ServerError::InvalidConfig(_))));
    }
}
