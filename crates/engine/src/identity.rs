//! Sender identity resolution.
//!
//! Every piece of per-conversation state is keyed by the [`ConversationKey`]
//! derived here, so the derivation must be a pure function of the source.

use gemline_core::channel::EventSource;
use gemline_core::message::ConversationKey;

/// Derive the conversation key for an event source.
///
/// A user chat keys on the user id, a group on the group id and a room on
/// the room id, even when a member's user id is also present. Any other or
/// incomplete source maps to the shared `global` conversation.
pub fn resolve_key(source: &EventSource) -> ConversationKey {
    fn present(v: &Option<String>) -> Option<&str> {
        v.as_deref().filter(|s| !s.is_empty())
    }

    let key = match source.kind.as_str() {
        "user" => present(&source.user_id).map(ConversationKey::user),
        "group" => present(&source.group_id).map(ConversationKey::group),
        "room" => present(&source.room_id).map(ConversationKey::room),
        _ => None,
    };

    key.unwrap_or_else(ConversationKey::global)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_source_kind() {
        assert_eq!(resolve_key(&EventSource::user("U1")).as_str(), "user:U1");
        assert_eq!(resolve_key(&EventSource::group("C1")).as_str(), "group:C1");
        assert_eq!(resolve_key(&EventSource::room("R1")).as_str(), "room:R1");
    }

    #[test]
    fn group_member_keys_on_group() {
        let source = EventSource {
            user_id: Some("U1".into()),
            ..EventSource::group("C1")
        };
        assert_eq!(resolve_key(&source).as_str(), "group:C1");
    }

    #[test]
    fn missing_id_falls_back_to_global() {
        let source = EventSource {
            kind: "user".into(),
            ..EventSource::default()
        };
        assert!(resolve_key(&source).is_global());

        let empty_id = EventSource {
            kind: "group".into(),
            group_id: Some(String::new()),
            ..EventSource::default()
        };
        assert!(resolve_key(&empty_id).is_global());
    }

    #[test]
    fn unknown_kind_falls_back_to_global() {
        let source = EventSource {
            kind: "channel".into(),
            user_id: Some("U1".into()),
            ..EventSource::default()
        };
        assert!(resolve_key(&source).is_global());
        assert!(resolve_key(&EventSource::default()).is_global());
    }

    #[test]
    fn derivation_is_stable() {
        let source = EventSource::user("Uabc");
        let first = resolve_key(&source);
        for _ in 0..10 {
            assert_eq!(resolve_key(&source.clone()), first);
        }
    }
}
