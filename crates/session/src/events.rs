//! Session lifecycle notifications
//!
//! Screens register a listener and react to the session ending, typically by
//! returning to the login screen. Listeners run synchronously on the task that
//! ended the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Message attached to a forced logout after a failed refresh
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please login again.";

/// Process-wide session event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session was ended by an explicit logout
    Logout,
    /// The session was ended because the credentials could not be refreshed
    AuthError { message: String },
}

/// Handle returned by [`SessionEvents::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Registry of session event listeners
#[derive(Default)]
pub struct SessionEvents {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl std::fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEvents")
            .field("listeners", &self.len())
            .finish()
    }
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Deliver an event to every registered listener
    pub fn emit(&self, event: &SessionEvent) {
        // Snapshot so listeners may (un)subscribe while being notified
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        tracing::debug!(?event, listeners = snapshot.len(), "Emitting session event");
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<SessionEvent>>>, impl Fn(&SessionEvent) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: &SessionEvent| {
            sink.lock().unwrap().push(event.clone());
        })
    }

    #[test]
    fn delivers_to_all_listeners() {
        let events = SessionEvents::new();
        let (first, listener) = recorder();
        events.subscribe(listener);
        let (second, listener) = recorder();
        events.subscribe(listener);

        events.emit(&SessionEvent::Logout);

        assert_eq!(*first.lock().unwrap(), vec![SessionEvent::Logout]);
        assert_eq!(*second.lock().unwrap(), vec![SessionEvent::Logout]);
    }

    #[test]
    fn unsubscribed_listener_is_silent() {
        let events = SessionEvents::new();
        let (seen, listener) = recorder();
        let id = events.subscribe(listener);

        assert!(events.unsubscribe(id));
        assert!(!events.unsubscribe(id));
        events.emit(&SessionEvent::AuthError {
            message: SESSION_EXPIRED_MESSAGE.into(),
        });

        assert!(seen.lock().unwrap().is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn listener_can_unsubscribe_itself() {
        let events = Arc::new(SessionEvents::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let id = {
            let registry = Arc::clone(&events);
            let slot = Arc::clone(&slot);
            events.subscribe(move |_| {
                if let Some(id) = slot.lock().unwrap().take() {
                    registry.unsubscribe(id);
                }
            })
        };
        *slot.lock().unwrap() = Some(id);

        events.emit(&SessionEvent::Logout);
        assert!(events.is_empty());
    }
}
