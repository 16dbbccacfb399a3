//! Current-user session
//!
//! Explicit, cloneable handle to the signed-in user. It starts
//! unauthenticated and is cleared by [`Session::logout`]. Attached to the
//! push hub, pushes about the signed-in user keep it current.

use crate::envelope::{decode_entity_push, EntityPush, Envelope};
use crate::transport::PushSink;
use backoffice_model::User;
use backoffice_store::StorePush;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared current-user context
#[derive(Debug, Clone)]
pub struct Session {
    current: Arc<watch::Sender<Option<User>>>,
}

impl Session {
    /// Unauthenticated session
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current: Arc::new(current),
        }
    }

    /// Sign a user in
    pub fn login(&self, user: User) {
        tracing::info!(id = %user.id, "session started");
        self.current.send_replace(Some(user));
    }

    /// Sign out; returns the user that was signed in
    pub fn logout(&self) -> Option<User> {
        let previous = self.current.send_replace(None);
        if let Some(user) = &previous {
            tracing::info!(id = %user.id, "session ended");
        }
        previous
    }

    /// Signed-in user
    #[must_use]
    pub fn current(&self) -> Option<User> {
        self.current.borrow().clone()
    }

    /// Whether someone is signed in
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Whether the signed-in user may use the back office
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.current.borrow().as_ref().is_some_and(|u| u.admin)
    }

    /// Observe login, logout and profile changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.current.subscribe()
    }

    /// Keep the session in step with user pushes
    ///
    /// An upsert or snapshot carrying the signed-in user refreshes it;
    /// deleting that user ends the session. Returns whether the session
    /// changed.
    pub fn handle_push(&self, push: &EntityPush<User>) -> bool {
        match push {
            EntityPush::Store(StorePush::Upserted(user)) => self.refresh(user),
            EntityPush::Store(StorePush::Snapshot(users)) => {
                let Some(id) = self.current.borrow().as_ref().map(|u| u.id) else {
                    return false;
                };
                users.iter().rev().find(|u| u.id == id).is_some_and(|u| self.refresh(u))
            }
            EntityPush::Store(StorePush::Deleted(id)) => {
                let removed = self
                    .current
                    .send_if_modified(|current| {
                        if current.as_ref().is_some_and(|u| u.id == *id) {
                            *current = None;
                            true
                        } else {
                            false
                        }
                    });
                if removed {
                    tracing::warn!(%id, "signed-in user deleted, session ended");
                }
                removed
            }
            _ => false,
        }
    }
}

impl Session {
    fn refresh(&self, user: &User) -> bool {
        self.current.send_if_modified(|current| match current {
            Some(signed_in) if signed_in.id == user.id && *signed_in != *user => {
                *signed_in = user.clone();
                true
            }
            _ => false,
        })
    }
}

impl PushSink for Session {
    fn accept(&self, envelope: &Envelope) {
        match decode_entity_push::<User>(envelope) {
            Ok(Some(push)) => {
                if self.handle_push(&push) {
                    tracing::debug!(event = %envelope.event, "session refreshed from push");
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "session skipped malformed push"),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_model::RecordId;
    use serde_json::json;

    fn user(id: u64, name: &str) -> User {
        serde_json::from_value(json!({
            "id": id,
            "email": "ana@example.com",
            "password": "secret",
            "name": name,
            "cpf": "12345678900",
            "phone": "41987654321",
            "pronoun": "Sra.",
            "admin": true
        }))
        .unwrap()
    }

    #[test]
    fn starts_unauthenticated() {
        let session = Session::new();
        assert!(!session.is_authenticated());
        assert_eq!(session.logout(), None);
    }

    #[test]
    fn clones_share_state() {
        let session = Session::new();
        let other = session.clone();

        session.login(user(1, "Ana"));
        assert!(other.is_authenticated());
        assert!(other.is_admin());

        assert_eq!(other.logout().map(|u| u.id), Some(RecordId(1)));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn pushes_refresh_or_end_session() {
        let session = Session::new();
        session.login(user(1, "Ana"));
        let mut rx = session.subscribe();
        rx.borrow_and_update();

        let other = EntityPush::Store(StorePush::Upserted(user(2, "Bia")));
        assert!(!session.handle_push(&other));

        let renamed = EntityPush::Store(StorePush::Upserted(user(1, "Ana Souza")));
        assert!(session.handle_push(&renamed));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().map(|u| u.name.clone()), Some("Ana Souza".into()));

        assert!(session.handle_push(&EntityPush::Store(StorePush::Deleted(RecordId(1)))));
        assert!(!session.is_authenticated());
    }

    #[test]
    fn snapshot_refreshes_signed_in_user() {
        let session = Session::new();
        session.login(user(2, "Bia"));

        let snapshot = EntityPush::Store(StorePush::Snapshot(vec![user(1, "Ana"), user(2, "Bia Lima")]));
        assert!(session.handle_push(&snapshot));
        assert_eq!(session.current().map(|u| u.name), Some("Bia Lima".into()));
        assert!(!session.handle_push(&snapshot));
    }

    #[test]
    fn hub_keeps_attached_session_current() {
        use crate::transport::PushHub;

        let hub = PushHub::new(4);
        let session = Session::new();
        session.login(user(1, "Ana"));
        hub.attach(session.clone());

        hub.publish(Envelope::push("user:upserted", serde_json::to_value(user(1, "Ana Souza")).unwrap()));
        assert_eq!(session.current().map(|u| u.name), Some("Ana Souza".into()));

        hub.publish(Envelope::push("user:deleted", json!({ "id": 1 })));
        assert!(!session.is_authenticated());
    }
}
