//! Ownership resolution
//!
//! Decides whether a message was authored by the local user. Resolution fails
//! closed: an unrecognized sender is never treated as our own, since rendering
//! someone else's message as self-authored is the worse mistake.
//!
//! Classification of a stored message is write-once. Once `authorship_determined`
//! is set, later recomputations are only compared and logged.

use tracing::{debug, warn};

use crate::types::error::SyncError;
use crate::types::wire::{normalize_sender, SenderField, SenderRef};
use crate::types::{CurrentUser, Message};

/// Resolve a normalized sender against the current user.
pub fn resolve(sender: &SenderRef, current_user: &CurrentUser) -> bool {
    match sender {
        SenderRef::User(id) => !current_user.id.is_empty() && *id == current_user.id,
        SenderRef::Unrecognized(shape) => {
            let ambiguous = SyncError::OwnershipAmbiguous(shape.clone());
            warn!("{}, treating sender as not own", ambiguous);
            false
        }
    }
}

/// Resolve a raw sender field against the current user.
pub fn resolve_field(sender: &SenderField, current_user: &CurrentUser) -> bool {
    resolve(&normalize_sender(sender), current_user)
}

/// Classify a message, honouring an earlier decision.
///
/// Returns the effective `is_own` value, which is the stored one whenever the
/// message was already classified.
pub fn classify(message: &mut Message, sender: &SenderRef, current_user: &CurrentUser) -> bool {
    let computed = resolve(sender, current_user);

    if message.authorship_determined {
        if computed != message.is_own {
            warn!(
                client_id = %message.client_id,
                stored = message.is_own,
                computed,
                "ownership recomputation disagrees with stored value, keeping stored"
            );
        }
        return message.is_own;
    }

    debug!(client_id = %message.client_id, is_own = computed, "ownership determined");
    message.is_own = computed;
    message.authorship_determined = true;
    computed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;
    use chrono::Utc;
    use serde_json::json;

    fn me() -> CurrentUser {
        CurrentUser::new("me")
    }

    fn unclassified(sender: &str) -> Message {
        let mut msg = Message::optimistic(
            "temp_1".into(),
            "c1",
            sender,
            "other",
            "hi",
            MessageKind::Text,
            Utc::now(),
        );
        msg.authorship_determined = false;
        msg.is_own = false;
        msg
    }

    #[test]
    fn test_resolve_accepts_all_shapes() {
        let user = me();
        assert!(resolve_field(&SenderField::from("me"), &user));
        assert!(resolve_field(&SenderField::from(&user), &user));

        let legacy: SenderField = serde_json::from_value(json!({"user_id": "me"})).unwrap();
        assert!(resolve_field(&legacy, &user));

        assert!(!resolve_field(&SenderField::from("bob"), &user));
    }

    #[test]
    fn test_resolve_fails_closed() {
        let user = me();
        let odd: SenderField = serde_json::from_value(json!({"nickname": "me"})).unwrap();
        assert!(!resolve_field(&odd, &user));
        assert!(!resolve_field(&SenderField::Other(json!(null)), &user));

        // An empty local id must never make every empty sender "own"
        let anonymous = CurrentUser::new("");
        assert!(!resolve(&SenderRef::User(String::new()), &anonymous));
    }

    #[test]
    fn test_classify_is_write_once() {
        let user = me();
        let mut msg = unclassified("me");

        assert!(classify(&mut msg, &SenderRef::User("me".into()), &user));
        assert!(msg.authorship_determined);

        // A later disagreeing computation does not flip it
        assert!(classify(&mut msg, &SenderRef::User("bob".into()), &user));
        assert!(msg.is_own);
    }

    #[test]
    fn test_resolve_is_stable() {
        let user = me();
        let mut msg = unclassified("bob");
        let sender = SenderRef::User("bob".into());
        let first = classify(&mut msg, &sender, &user);
        let second = classify(&mut msg, &sender, &user);
        assert_eq!(first, second);
        assert!(!first);
    }
}
