use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::ID_SCHEME_SEPARATOR;

/// Every syncable object type known to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Conversation,
    Channel,
    Message,
    Announcement,
    Identity,
    Membership,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Conversation,
        EntityKind::Channel,
        EntityKind::Message,
        EntityKind::Announcement,
        EntityKind::Identity,
        EntityKind::Membership,
    ];

    /// Path segment used in ids, urls and event names.
    pub fn plural(self) -> &'static str {
        match self {
            EntityKind::Conversation => "conversations",
            EntityKind::Channel => "channels",
            EntityKind::Message => "messages",
            EntityKind::Announcement => "announcements",
            EntityKind::Identity => "identities",
            EntityKind::Membership => "members",
        }
    }

    /// Singular name, as used in predicates (`conversation.id = ...`).
    pub fn singular(self) -> &'static str {
        match self {
            EntityKind::Conversation => "conversation",
            EntityKind::Channel => "channel",
            EntityKind::Message => "message",
            EntityKind::Announcement => "announcement",
            EntityKind::Identity => "identity",
            EntityKind::Membership => "membership",
        }
    }

    pub fn from_singular(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.singular() == name)
    }

    /// Conversations and channels own messages and are sorted by date.
    pub fn is_container(self) -> bool {
        matches!(self, EntityKind::Conversation | EntityKind::Channel)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// Sort fields understood by queries and the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    LastMessage,
    Position,
}

impl SortField {
    /// Value of the `sort_by` url parameter.
    pub fn as_param(self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::LastMessage => "last_message",
            SortField::Position => "position",
        }
    }
}

/// Globally unique, type-namespaced object id.
///
/// Regular ids look like `layer:///messages/<uuid>`; membership ids nest under
/// their channel: `layer:///channels/<uuid>/members/<user-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id for a locally created object.
    pub fn generate(scheme: &str, kind: EntityKind) -> Self {
        Self(format!(
            "{scheme}{ID_SCHEME_SEPARATOR}/{}/{}",
            kind.plural(),
            Uuid::new_v4()
        ))
    }

    pub fn membership(channel: &EntityId, user_id: &str) -> Self {
        Self(format!("{}/members/{user_id}", channel.0))
    }

    /// Expand a bare uuid into a full id of the given kind, leaving
    /// already-qualified ids untouched.
    pub fn qualify(scheme: &str, kind: EntityKind, id_or_uuid: &str) -> Self {
        if id_or_uuid.contains(ID_SCHEME_SEPARATOR) {
            Self::new(id_or_uuid)
        } else {
            Self(format!(
                "{scheme}{ID_SCHEME_SEPARATOR}/{}/{id_or_uuid}",
                kind.plural()
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before `://`.
    pub fn scheme(&self) -> Option<&str> {
        self.0.find(ID_SCHEME_SEPARATOR).map(|i| &self.0[..i])
    }

    /// Resource path, e.g. `/messages/<uuid>`; doubles as the REST url path.
    pub fn path(&self) -> Option<&str> {
        self.0
            .find(ID_SCHEME_SEPARATOR)
            .map(|i| &self.0[i + ID_SCHEME_SEPARATOR.len()..])
            .filter(|p| p.starts_with('/'))
    }

    /// Final path segment (the uuid for most kinds, the user id for members).
    pub fn uuid(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uses_kind_namespace() {
        let id = EntityId::generate("layer", EntityKind::Message);
        assert!(id.as_str().starts_with("layer:///messages/"));
        assert_eq!(id.scheme(), Some("layer"));
        assert_eq!(id.uuid().len(), 36);
    }

    #[test]
    fn test_path_and_uuid() {
        let id = EntityId::new("layer:///conversations/abc");
        assert_eq!(id.path(), Some("/conversations/abc"));
        assert_eq!(id.uuid(), "abc");
    }

    #[test]
    fn test_membership_id_nests_under_channel() {
        let channel = EntityId::new("layer:///channels/c1");
        let member = EntityId::membership(&channel, "frodo");
        assert_eq!(member.as_str(), "layer:///channels/c1/members/frodo");
        assert_eq!(member.path(), Some("/channels/c1/members/frodo"));
    }

    #[test]
    fn test_qualify_is_noop_for_full_ids() {
        let full = EntityId::qualify("layer", EntityKind::Conversation, "layer:///conversations/c1");
        let bare = EntityId::qualify("layer", EntityKind::Conversation, "c1");
        assert_eq!(full, bare);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(EntityKind::from_singular("channel"), Some(EntityKind::Channel));
        assert_eq!(EntityKind::Membership.plural(), "members");
        assert!(EntityKind::Conversation.is_container());
        assert!(!EntityKind::Message.is_container());
    }
}
