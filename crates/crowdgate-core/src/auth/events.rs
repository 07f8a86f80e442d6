use std::sync::{Arc, Mutex};

use tracing::debug;

use super::Identity;

/// Identity transitions other parts of an application react to.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityEvent {
    /// A new credential pair was stored by a login.
    LoggedIn(Option<Identity>),
    /// The access token was replaced by a refresh exchange.
    Refreshed(Option<Identity>),
    /// Credentials were cleared on request.
    LoggedOut,
    /// Credentials were cleared because no automatic recovery was possible.
    SessionExpired,
}

/// Handle returned by [`IdentityEvents::on_identity_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&IdentityEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Synchronous event bus for identity changes.
///
/// Listeners run on the emitting task, in registration order. Cloning the
/// bus shares the listener list.
#[derive(Clone, Default)]
pub struct IdentityEvents {
    registry: Arc<Mutex<Registry>>,
}

impl IdentityEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_identity_changed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&IdentityEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the listener was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let before = registry.listeners.len();
        registry.listeners.retain(|(listener_id, _)| *listener_id != id);
        registry.listeners.len() != before
    }

    pub fn emit(&self, event: IdentityEvent) {
        // Snapshot so listeners may register or remove listeners themselves
        let listeners: Vec<Listener> = {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        debug!(?event, listeners = listeners.len(), "Emitting identity event");
        for listener in listeners {
            listener(&event);
        }
    }
}
