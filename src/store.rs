//! In-memory session store with per-session serialized mutation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::clock::Clock;
use crate::model::{Session, SessionId, UserId};

/// Owns every checkout session.
///
/// The map lock is only held to find or insert a session's slot; each slot
/// carries its own mutex, so transforms on different sessions run in parallel
/// while transforms on the same session are applied one at a time.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Open a fresh active session with an empty cart.
    pub fn create(&self, user_id: UserId, store_id: String) -> Session {
        let session = Session::new(user_id, store_id, self.clock.now());
        self.sessions
            .write()
            .insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));
        session
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        let slot = self.slot(id)?;
        let session = slot.lock().clone();
        Some(session)
    }

    /// All sessions, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let slots: Vec<_> = self.sessions.read().values().cloned().collect();
        let mut sessions: Vec<Session> = slots.iter().map(|slot| slot.lock().clone()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `transform` to a private copy of the session and commit the result.
    ///
    /// Returns `None` when the session does not exist.
    pub fn update<F>(&self, id: &SessionId, transform: F) -> Option<Session>
    where
        F: FnOnce(Session) -> Session,
    {
        self.update_with(id, |session| (transform(session), ()))
            .map(|(session, ())| session)
    }

    /// Like [`update`](Self::update), but the transform also yields a side value
    /// computed while the session is held.
    ///
    /// The update time is only stamped when the transform changed something.
    pub fn update_with<F, T>(&self, id: &SessionId, transform: F) -> Option<(Session, T)>
    where
        F: FnOnce(Session) -> (Session, T),
    {
        let slot = self.slot(id)?;
        let mut current = slot.lock();

        let (mut next, out) = transform(current.clone());
        debug_assert_eq!(next.id, current.id, "transform must not change the session id");

        if next != *current {
            next.updated_at = self.clock.now();
            *current = next.clone();
        } else {
            debug!(session = %id, "update left session unchanged");
        }

        Some((next, out))
    }

    fn slot(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Rate;
    use crate::clock::ManualClock;
    use crate::model::CartItem;
    use crate::Amount;
    use chrono::{DateTime, Duration};

    fn store() -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        ));
        (SessionStore::new(clock.clone()), clock)
    }

    fn milk(qty: u32) -> CartItem {
        CartItem {
            barcode: "12345".into(),
            name: "Milk 1L".into(),
            price: Amount::from_units(60),
            tax_rate: Rate::from_scaled(500),
            qty,
        }
    }

    #[test]
    fn create_then_get() {
        let (store, _) = store();
        let session = store.create("demo-user".into(), "store-1".into());

        let fetched = store.get(&session.id).unwrap();
        assert_eq!(fetched, session);
        assert!(fetched.is_active());
        assert!(fetched.items.is_empty());
        assert!(!fetched.payment.is_paid());
    }

    #[test]
    fn get_unknown_is_none() {
        let (store, _) = store();
        assert!(store.get(&SessionId::from("nope")).is_none());
        assert!(store.update(&SessionId::from("nope"), |s| s).is_none());
    }

    #[test]
    fn update_commits_and_stamps_time() {
        let (store, clock) = store();
        let session = store.create("u".into(), "store-1".into());
        clock.advance(Duration::seconds(5));

        let updated = store
            .update(&session.id, |mut s| {
                s.add_item(milk(1)).unwrap();
                s
            })
            .unwrap();

        assert_eq!(updated.items.len(), 1);
        assert_eq!(updated.updated_at, session.created_at + Duration::seconds(5));
        assert_eq!(store.get(&session.id).unwrap(), updated);
    }

    #[test]
    fn unchanged_update_keeps_timestamp() {
        let (store, clock) = store();
        let session = store.create("u".into(), "store-1".into());
        clock.advance(Duration::seconds(5));

        let same = store.update(&session.id, |s| s).unwrap();
        assert_eq!(same.updated_at, session.updated_at);
    }

    #[test]
    fn list_returns_oldest_first() {
        let (store, clock) = store();
        let first = store.create("u".into(), "store-1".into());
        clock.advance(Duration::seconds(1));
        let second = store.create("u".into(), "store-1".into());

        let ids: Vec<_> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() {
        let (store, _) = store();
        let session = store.create("u".into(), "store-1".into());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        store.update(&session.id, |mut s| {
                            s.add_item(milk(1)).unwrap();
                            s
                        });
                    }
                });
            }
        });

        let session = store.get(&session.id).unwrap();
        assert_eq!(session.items.len(), 1);
        assert_eq!(session.items[0].qty, 400);
    }
}
