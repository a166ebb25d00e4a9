// ABOUTME: Read-only note and user shapes as emitted by the `what` CLI.
// ABOUTME: Also defines the Visibility scopes accepted by post/reply commands.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire value for direct (recipient-restricted) notes
pub const SPECIFIED_VISIBILITY: &str = "specified";

/// Audience scope of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Home,
    Followers,
    /// Only the listed recipients can see the note
    Specified,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Home => "home",
            Visibility::Followers => "followers",
            Visibility::Specified => SPECIFIED_VISIBILITY,
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "home" => Ok(Visibility::Home),
            "followers" => Ok(Visibility::Followers),
            SPECIFIED_VISIBILITY => Ok(Visibility::Specified),
            other => anyhow::bail!(
                "unknown visibility '{}' (expected public, home, followers or specified)",
                other
            ),
        }
    }
}

/// Compact author info attached to notes and notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteUser {
    /// Service-side user id, when the CLI includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub username: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Origin instance; None for local users
    #[serde(default)]
    pub host: Option<String>,
}

impl NoteUser {
    /// `@user` for local users, `@user@host` for federated ones
    pub fn handle(&self) -> String {
        match self.remote_host() {
            Some(host) => format!("@{}@{}", self.username, host),
            None => format!("@{}", self.username),
        }
    }

    pub fn remote_host(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }

    /// Stable identifier for routing: the user id when present, otherwise the handle
    pub fn peer_id(&self) -> String {
        match self.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self.handle(),
        }
    }

    /// Display name, falling back to the username
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

/// A single post on the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "cw")]
    pub content_warning: Option<String>,
    #[serde(default = "default_visibility")]
    pub visibility: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(rename = "user")]
    pub author: NoteUser,
    /// The re-shared note, for renotes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renote: Option<Box<Note>>,
    #[serde(default, rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub parent_reply_id: Option<String>,
    #[serde(default, rename = "fileCount", skip_serializing_if = "Option::is_none")]
    pub attachment_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_count: Option<u64>,
    /// Declared recipients of a `specified` note
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub visible_user_ids: Vec<String>,
}

fn default_visibility() -> String {
    Visibility::Public.as_str().to_string()
}

impl Note {
    /// Trimmed text, or None for bare renotes and empty notes
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn has_text(&self) -> bool {
        self.body().is_some()
    }

    /// Direct/private notes carry the `specified` visibility marker
    pub fn is_direct(&self) -> bool {
        self.visibility == SPECIFIED_VISIBILITY
    }

    pub fn is_renote(&self) -> bool {
        self.renote.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_note_deserializes_cli_shape() {
        let note: Note = serde_json::from_value(json!({
            "id": "9abc",
            "text": "hello",
            "cw": null,
            "visibility": "specified",
            "createdAt": "2024-01-01T00:00:00.000Z",
            "user": {"username": "alice", "name": "Alice", "host": null},
            "replyTo": "9zzz",
            "fileCount": 2,
            "reactionCount": 5,
            "visibleUserIds": ["u2"]
        }))
        .unwrap();
        assert_eq!(note.id, "9abc");
        assert!(note.is_direct());
        assert_eq!(note.parent_reply_id.as_deref(), Some("9zzz"));
        assert_eq!(note.attachment_count, Some(2));
        assert_eq!(note.reaction_count, Some(5));
        assert_eq!(note.visible_user_ids, vec!["u2"]);
    }

    #[test]
    fn test_note_defaults_to_public() {
        let note: Note = serde_json::from_value(json!({
            "id": "1",
            "user": {"username": "bob"}
        }))
        .unwrap();
        assert_eq!(note.visibility, "public");
        assert!(!note.is_direct());
        assert!(!note.has_text());
    }

    #[test]
    fn test_whitespace_text_counts_as_empty() {
        let note: Note = serde_json::from_value(json!({
            "id": "1",
            "text": "   \n",
            "user": {"username": "bob"}
        }))
        .unwrap();
        assert!(note.body().is_none());
    }

    #[test]
    fn test_user_handle_local_and_remote() {
        let local = NoteUser {
            username: "alice".to_string(),
            ..Default::default()
        };
        assert_eq!(local.handle(), "@alice");

        let remote = NoteUser {
            username: "bob".to_string(),
            host: Some("example.social".to_string()),
            ..Default::default()
        };
        assert_eq!(remote.handle(), "@bob@example.social");
    }

    #[test]
    fn test_peer_id_prefers_user_id() {
        let user = NoteUser {
            id: Some("u1".to_string()),
            username: "alice".to_string(),
            ..Default::default()
        };
        assert_eq!(user.peer_id(), "u1");

        let anonymous = NoteUser {
            username: "alice".to_string(),
            ..Default::default()
        };
        assert_eq!(anonymous.peer_id(), "@alice");
    }

    #[test]
    fn test_display_name_falls_back_to_username() {
        let user = NoteUser {
            username: "alice".to_string(),
            name: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(user.display_name(), "alice");
    }

    #[test]
    fn test_visibility_parse() {
        assert_eq!("specified".parse::<Visibility>().unwrap(), Visibility::Specified);
        assert_eq!("home".parse::<Visibility>().unwrap(), Visibility::Home);
        assert!("secret".parse::<Visibility>().is_err());
    }
}
