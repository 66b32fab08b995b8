//! In-process session persistence.
//!
//! Remembers which session the local user is in and announces transitions
//! on the bus: `set_state` publishes a SessionJoined notify, `close`
//! publishes SessionLeft.

use super::{ClassSession, SessionStore};
use crate::errors::ServiceError;
use crate::events::{EventBus, EventKind, GlobalEvent};
use crate::locked;
use common::types::{SessionAcronym, UserId};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct Joined {
    acronym: SessionAcronym,
    user: UserId,
}

pub struct LocalSessionStore {
    bus: EventBus,
    current: Mutex<Option<Joined>>,
}

impl LocalSessionStore {
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            current: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for LocalSessionStore {
    async fn set_state(&self, session: &ClassSession, user: &UserId) -> Result<(), ServiceError> {
        *locked(&self.current) = Some(Joined {
            acronym: session.acronym.clone(),
            user: user.clone(),
        });
        debug!(target: "classroom.session", session = %session.acronym, user_id = %user, "Session joined");
        self.bus.publish(&GlobalEvent::notify(
            EventKind::SessionJoined,
            user.as_str(),
            &session.acronym,
            "",
        ));
        Ok(())
    }

    async fn close(&self) -> Result<(), ServiceError> {
        let Some(joined) = locked(&self.current).take() else {
            return Ok(());
        };
        debug!(target: "classroom.session", session = %joined.acronym, user_id = %joined.user, "Session closed");
        self.bus.publish(&GlobalEvent::notify(
            EventKind::SessionLeft,
            joined.user.as_str(),
            &joined.acronym,
            "",
        ));
        Ok(())
    }

    fn session_acronym(&self) -> Option<SessionAcronym> {
        locked(&self.current).as_ref().map(|j| j.acronym.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::providers::SessionKind;
    use std::sync::Arc;

    fn session() -> ClassSession {
        ClassSession {
            acronym: SessionAcronym::new("YOGA1"),
            name: "Chair Yoga".to_string(),
            class_id: None,
            kind: SessionKind::Class,
            instructor_id: UserId::new("teacher"),
            participants: vec![],
            optimization_mode: None,
        }
    }

    #[tokio::test]
    async fn test_set_state_then_close_announces_on_bus() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(move |evt| {
            sink.lock().unwrap().push((evt.event, evt.subject.clone()));
            Ok(())
        });

        let store = LocalSessionStore::new(bus);
        store.set_state(&session(), &UserId::new("u1")).await.unwrap();
        assert_eq!(store.session_acronym(), Some(SessionAcronym::new("YOGA1")));

        store.close().await.unwrap();
        assert_eq!(store.session_acronym(), None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (EventKind::SessionJoined, "u1".to_string()),
                (EventKind::SessionLeft, "u1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_without_session_is_silent() {
        let bus = EventBus::new();
        let store = LocalSessionStore::new(bus.clone());
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        bus.subscribe(move |_| {
            *c.lock().unwrap() += 1;
            Ok(())
        });
        store.close().await.unwrap();
        assert_eq!(*count.lock().unwrap(), 0);
    }
}
