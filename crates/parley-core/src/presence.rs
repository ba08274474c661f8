//! Online-identity tracking.
//!
//! The registry maps each identity to the set of its live connections.
//! Presence is set-valued (multi-device), collapsed to "online or not"
//! only at the snapshot boundary.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::debug;

use crate::connection::ConnectionId;

/// A stable user identity. Opaque; produced only by an
/// [`crate::auth::IdentityVerifier`].
pub type Identity = String;

/// Outcome of a presence mutation.
///
/// The engine turns `Online`/`Offline` into presence broadcasts; `None`
/// means the identity's online state did not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    /// The identity's first connection registered; it is now online.
    Online(Identity),
    /// The identity's last connection unregistered; it is now offline.
    Offline(Identity),
    /// No online/offline transition.
    None,
}

/// Registry of identities with at least one live connection.
///
/// All mutations go through a single lock, so a [`snapshot`] is always a
/// consistent point-in-time view: an identity is never observed half
/// registered while a concurrent register/unregister proceeds.
///
/// [`snapshot`]: PresenceRegistry::snapshot
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    online: RwLock<HashMap<Identity, HashSet<ConnectionId>>>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to an identity's set.
    ///
    /// Idempotent: registering an already-present pair reports
    /// [`PresenceChange::None`].
    pub fn register(&self, identity: &str, connection_id: &ConnectionId) -> PresenceChange {
        let mut online = self.online.write().unwrap();
        let is_new_identity = !online.contains_key(identity);
        online
            .entry(identity.to_string())
            .or_default()
            .insert(connection_id.clone());

        if is_new_identity {
            debug!(identity = %identity, "Identity came online");
            PresenceChange::Online(identity.to_string())
        } else {
            PresenceChange::None
        }
    }

    /// Remove a connection from an identity's set.
    ///
    /// When the set empties, the key is dropped and the identity goes
    /// offline. Unregistering an unknown pair is a no-op, not an error;
    /// disconnects may race registration failures.
    pub fn unregister(&self, identity: &str, connection_id: &ConnectionId) -> PresenceChange {
        let mut online = self.online.write().unwrap();
        let Some(connections) = online.get_mut(identity) else {
            return PresenceChange::None;
        };

        if !connections.remove(connection_id) {
            return PresenceChange::None;
        }

        if connections.is_empty() {
            online.remove(identity);
            debug!(identity = %identity, "Identity went offline");
            PresenceChange::Offline(identity.to_string())
        } else {
            PresenceChange::None
        }
    }

    /// All currently-online identities, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Identity> {
        let online = self.online.read().unwrap();
        let mut identities: Vec<Identity> = online.keys().cloned().collect();
        identities.sort_unstable();
        identities
    }

    /// Whether an identity has at least one live connection.
    #[must_use]
    pub fn is_online(&self, identity: &str) -> bool {
        self.online.read().unwrap().contains_key(identity)
    }

    /// Number of online identities.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.online.read().unwrap().len()
    }

    /// Number of live connections for an identity.
    #[must_use]
    pub fn connection_count(&self, identity: &str) -> usize {
        self.online
            .read()
            .unwrap()
            .get(identity)
            .map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_register_unregister_transitions() {
        let registry = PresenceRegistry::new();

        assert_eq!(
            registry.register("alice", &conn("c1")),
            PresenceChange::Online("alice".into())
        );
        // Second device: no transition
        assert_eq!(registry.register("alice", &conn("c2")), PresenceChange::None);
        assert_eq!(registry.connection_count("alice"), 2);

        assert_eq!(registry.unregister("alice", &conn("c1")), PresenceChange::None);
        assert!(registry.is_online("alice"));

        assert_eq!(
            registry.unregister("alice", &conn("c2")),
            PresenceChange::Offline("alice".into())
        );
        assert!(!registry.is_online("alice"));
        assert_eq!(registry.online_count(), 0);
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = PresenceRegistry::new();

        registry.register("alice", &conn("c1"));
        assert_eq!(registry.register("alice", &conn("c1")), PresenceChange::None);
        assert_eq!(registry.connection_count("alice"), 1);

        // One unregister suffices despite the double register
        assert_eq!(
            registry.unregister("alice", &conn("c1")),
            PresenceChange::Offline("alice".into())
        );
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let registry = PresenceRegistry::new();

        assert_eq!(registry.unregister("ghost", &conn("c1")), PresenceChange::None);

        registry.register("alice", &conn("c1"));
        assert_eq!(registry.unregister("alice", &conn("c2")), PresenceChange::None);
        assert!(registry.is_online("alice"));
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let registry = PresenceRegistry::new();
        registry.register("carol", &conn("c3"));
        registry.register("alice", &conn("c1"));
        registry.register("bob", &conn("c2"));

        assert_eq!(registry.snapshot(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_presence_counting_property() {
        // snapshot() contains I iff completed registers minus unregisters
        // for I is > 0, over distinct connections.
        let registry = PresenceRegistry::new();

        for i in 0..5 {
            registry.register("alice", &conn(&format!("c{i}")));
        }
        for i in 0..4 {
            registry.unregister("alice", &conn(&format!("c{i}")));
        }
        assert!(registry.snapshot().contains(&"alice".to_string()));

        registry.unregister("alice", &conn("c4"));
        assert!(!registry.snapshot().contains(&"alice".to_string()));
    }

    #[test]
    fn test_concurrent_registers_lose_nothing() {
        use std::sync::Arc;

        let registry = Arc::new(PresenceRegistry::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for j in 0..100 {
                    registry.register("alice", &ConnectionId::new(format!("c{i}-{j}")));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.connection_count("alice"), 800);
        assert_eq!(registry.snapshot(), vec!["alice"]);
    }
}
