use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageTable;

/// Tables the change feed can deliver row events for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Posts,
    DirectMessages,
    PostComments,
    DmComments,
    Users,
    Channels,
    Conversations,
    Reactions,
    Translations,
    Attachments,
    AttachmentLinks,
    Presence,
    ReadMarkers,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Posts => "posts",
            Table::DirectMessages => "direct_messages",
            Table::PostComments => "post_comments",
            Table::DmComments => "dm_comments",
            Table::Users => "users",
            Table::Channels => "channels",
            Table::Conversations => "conversations",
            Table::Reactions => "reactions",
            Table::Translations => "translations",
            Table::Attachments => "attachments",
            Table::AttachmentLinks => "attachment_links",
            Table::Presence => "presence",
            Table::ReadMarkers => "read_markers",
        }
    }

    /// Column a scope-level subscription filters on, if the table has one.
    /// Tables that return `None` are only subscribable table-wide.
    pub fn scope_column(self) -> Option<&'static str> {
        match self {
            Table::Posts => Some("channel_id"),
            Table::DirectMessages => Some("conversation_id"),
            Table::PostComments => Some("parent_post_id"),
            Table::DmComments => Some("parent_message_id"),
            Table::Reactions => Some("message_id"),
            Table::Translations => Some("source_id"),
            Table::AttachmentLinks => Some("message_id"),
            _ => None,
        }
    }
}

impl From<MessageTable> for Table {
    fn from(table: MessageTable) -> Table {
        match table {
            MessageTable::Posts => Table::Posts,
            MessageTable::DirectMessages => Table::DirectMessages,
            MessageTable::PostComments => Table::PostComments,
            MessageTable::DmComments => Table::DmComments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change. `record` is the new row and may be partial — it
/// always carries the id and the parent columns, never the joined shape the
/// UI needs. Deletes carry only `old`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    #[serde(default)]
    pub old: Option<serde_json::Value>,
}

impl ChangeEvent {
    /// Read a uuid column from the payload, preferring the new row.
    pub fn uuid_field(&self, name: &str) -> Option<Uuid> {
        let read = |value: &serde_json::Value| {
            value
                .get(name)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
        };
        self.record.as_ref().and_then(read).or_else(|| self.old.as_ref().and_then(read))
    }

    /// Id of the changed row, from whichever side the event carries.
    pub fn id(&self) -> Option<Uuid> {
        self.uuid_field("id")
    }

    /// Parent id used for client-side narrowing, if the table has a scope
    /// column and the payload includes it.
    pub fn scope_id(&self) -> Option<Uuid> {
        self.table.scope_column().and_then(|column| self.uuid_field(column))
    }
}

/// Events sent from the change feed to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedEvent {
    /// Feed accepted the session token.
    Ready { user_id: Uuid },
    /// A row changed in a subscribed table.
    Change(ChangeEvent),
}

/// Commands sent from the client to the change feed.
///
/// Subscriptions are scope-level only: a table plus at most one parent id.
/// Narrower filtering happens client-side, so the subscription never has to
/// be rebuilt when a derived id list changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedCommand {
    /// Authenticate the feed connection.
    Identify { token: String },

    Subscribe {
        table: Table,
        #[serde(default)]
        scope: Option<Uuid>,
    },

    Unsubscribe {
        table: Table,
        #[serde(default)]
        scope: Option<Uuid>,
    },
}
