use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Preferred language tag, used as the translation source language.
    pub language: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A direct conversation between two or more users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub member_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// The four message tables of the backend schema. Each holds one kind of
/// message-like row; a row in any of them references exactly one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTable {
    Posts,
    DirectMessages,
    PostComments,
    DmComments,
}

impl MessageTable {
    pub const ALL: [MessageTable; 4] = [
        MessageTable::Posts,
        MessageTable::DirectMessages,
        MessageTable::PostComments,
        MessageTable::DmComments,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageTable::Posts => "posts",
            MessageTable::DirectMessages => "direct_messages",
            MessageTable::PostComments => "post_comments",
            MessageTable::DmComments => "dm_comments",
        }
    }

    /// Column holding the parent reference in this table.
    pub fn parent_column(self) -> &'static str {
        match self {
            MessageTable::Posts => "channel_id",
            MessageTable::DirectMessages => "conversation_id",
            MessageTable::PostComments => "parent_post_id",
            MessageTable::DmComments => "parent_message_id",
        }
    }

    pub fn scope(self, parent: Uuid) -> Scope {
        match self {
            MessageTable::Posts => Scope::Channel(parent),
            MessageTable::DirectMessages => Scope::Direct(parent),
            MessageTable::PostComments => Scope::ChannelThread(parent),
            MessageTable::DmComments => Scope::DirectThread(parent),
        }
    }
}

/// Where a message lives: a channel, a direct conversation, or a thread under
/// a post or a direct message. A message has exactly one of these, which the
/// backend schema only enforces by convention across four nullable columns;
/// here the enum makes the choice total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Channel(Uuid),
    Direct(Uuid),
    ChannelThread(Uuid),
    DirectThread(Uuid),
}

impl Scope {
    pub fn parent_id(self) -> Uuid {
        match self {
            Scope::Channel(id)
            | Scope::Direct(id)
            | Scope::ChannelThread(id)
            | Scope::DirectThread(id) => id,
        }
    }

    pub fn table(self) -> MessageTable {
        match self {
            Scope::Channel(_) => MessageTable::Posts,
            Scope::Direct(_) => MessageTable::DirectMessages,
            Scope::ChannelThread(_) => MessageTable::PostComments,
            Scope::DirectThread(_) => MessageTable::DmComments,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("message row {0} has no parent reference")]
    NoParent(Uuid),
    #[error("message row {0} has more than one parent reference")]
    MultipleParents(Uuid),
}

/// A message row as the backend stores it: one id column, one content column,
/// and four nullable parent columns of which exactly one must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub channel_id: Option<Uuid>,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub parent_post_id: Option<Uuid>,
    #[serde(default)]
    pub parent_message_id: Option<Uuid>,
    /// Null until the speech job has looked at this row.
    #[serde(default)]
    pub audio_status: Option<AudioStatus>,
    pub created_at: DateTime<Utc>,
}

/// Client-side unification of the four message tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub author_id: Uuid,
    pub scope: Scope,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = RowError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let parents = [
            row.channel_id.map(Scope::Channel),
            row.conversation_id.map(Scope::Direct),
            row.parent_post_id.map(Scope::ChannelThread),
            row.parent_message_id.map(Scope::DirectThread),
        ];

        let mut set = parents.into_iter().flatten();
        let scope = set.next().ok_or(RowError::NoParent(row.id))?;
        if set.next().is_some() {
            return Err(RowError::MultipleParents(row.id));
        }

        Ok(Message {
            id: row.id,
            author_id: row.author_id,
            scope,
            content: row.content,
            created_at: row.created_at,
        })
    }
}

/// The ten translation target languages, one column each on the
/// translations table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
    Fr,
    De,
    Pt,
    It,
    Ja,
    Ko,
    Zh,
    Hi,
}

pub const TARGET_LANGUAGES: [Language; 10] = [
    Language::En,
    Language::Es,
    Language::Fr,
    Language::De,
    Language::Pt,
    Language::It,
    Language::Ja,
    Language::Ko,
    Language::Zh,
    Language::Hi,
];

impl Language {
    pub fn as_tag(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
            Language::Pt => "pt",
            Language::It => "it",
            Language::Ja => "ja",
            Language::Ko => "ko",
            Language::Zh => "zh",
            Language::Hi => "hi",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Language> {
        TARGET_LANGUAGES.into_iter().find(|l| l.as_tag() == tag)
    }
}

/// At most one translation row exists per source message; it is written
/// asynchronously after the message, so absence means "not yet translated".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub source_table: MessageTable,
    pub source_id: Uuid,
    #[serde(default)]
    pub en: Option<String>,
    #[serde(default)]
    pub es: Option<String>,
    #[serde(default)]
    pub fr: Option<String>,
    #[serde(default)]
    pub de: Option<String>,
    #[serde(default)]
    pub pt: Option<String>,
    #[serde(default)]
    pub it: Option<String>,
    #[serde(default)]
    pub ja: Option<String>,
    #[serde(default)]
    pub ko: Option<String>,
    #[serde(default)]
    pub zh: Option<String>,
    #[serde(default)]
    pub hi: Option<String>,
}

impl Translation {
    pub fn new(source_table: MessageTable, source_id: Uuid) -> Self {
        Translation {
            source_table,
            source_id,
            en: None,
            es: None,
            fr: None,
            de: None,
            pt: None,
            it: None,
            ja: None,
            ko: None,
            zh: None,
            hi: None,
        }
    }

    fn slot(&mut self, lang: Language) -> &mut Option<String> {
        match lang {
            Language::En => &mut self.en,
            Language::Es => &mut self.es,
            Language::Fr => &mut self.fr,
            Language::De => &mut self.de,
            Language::Pt => &mut self.pt,
            Language::It => &mut self.it,
            Language::Ja => &mut self.ja,
            Language::Ko => &mut self.ko,
            Language::Zh => &mut self.zh,
            Language::Hi => &mut self.hi,
        }
    }

    pub fn set(&mut self, lang: Language, text: String) {
        *self.slot(lang) = Some(text);
    }

    pub fn get(&self, lang: Language) -> Option<&str> {
        match lang {
            Language::En => self.en.as_deref(),
            Language::Es => self.es.as_deref(),
            Language::Fr => self.fr.as_deref(),
            Language::De => self.de.as_deref(),
            Language::Pt => self.pt.as_deref(),
            Language::It => self.it.as_deref(),
            Language::Ja => self.ja.as_deref(),
            Language::Ko => self.ko.as_deref(),
            Language::Zh => self.zh.as_deref(),
            Language::Hi => self.hi.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

/// Group raw reaction rows by emoji for display.
pub fn group_reactions(rows: Vec<Reaction>) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    for row in rows {
        match groups.iter_mut().find(|g| g.emoji == row.emoji) {
            Some(group) => {
                if !group.user_ids.contains(&row.user_id) {
                    group.user_ids.push(row.user_id);
                    group.count += 1;
                }
            }
            None => groups.push(ReactionGroup {
                emoji: row.emoji,
                count: 1,
                user_ids: vec![row.user_id],
            }),
        }
    }
    groups
}

/// Status of a text-to-speech rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioStatus {
    Processing,
    Completed,
    Failed,
}

/// Metadata row for a stored blob. The bytes live in the storage bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub bucket: String,
    pub path: String,
    /// Set for audio renditions when the speech API reports it.
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

/// Join row binding an attachment to exactly one message-like entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentLink {
    pub attachment_id: Uuid,
    pub message_table: MessageTable,
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: Uuid,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Per (user, conversation) last-read timestamp. Unread counts are derived
/// from it, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadMarker {
    pub user_id: Uuid,
    pub scope_id: Uuid,
    pub last_read_at: DateTime<Utc>,
}

/// The fully joined shape the UI needs: change notifications carry only the
/// bare row, so this is what a detail fetch resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDetail {
    pub message: Message,
    pub author: User,
    pub files: Vec<Attachment>,
    pub translation: Option<Translation>,
    pub reactions: Vec<ReactionGroup>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: Uuid) -> MessageRow {
        MessageRow {
            id,
            author_id: Uuid::new_v4(),
            content: "hi".into(),
            channel_id: None,
            conversation_id: None,
            parent_post_id: None,
            parent_message_id: None,
            audio_status: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn message_row_with_one_parent_decodes() {
        let id = Uuid::new_v4();
        let channel = Uuid::new_v4();
        let mut r = row(id);
        r.channel_id = Some(channel);

        let msg = Message::try_from(r).unwrap();
        assert_eq!(msg.scope, Scope::Channel(channel));
        assert_eq!(msg.scope.table(), MessageTable::Posts);
    }

    #[test]
    fn message_row_without_parent_is_rejected() {
        let r = row(Uuid::new_v4());
        assert!(matches!(Message::try_from(r), Err(RowError::NoParent(_))));
    }

    #[test]
    fn message_row_with_two_parents_is_rejected() {
        let mut r = row(Uuid::new_v4());
        r.channel_id = Some(Uuid::new_v4());
        r.parent_post_id = Some(Uuid::new_v4());
        assert!(matches!(
            Message::try_from(r),
            Err(RowError::MultipleParents(_))
        ));
    }

    #[test]
    fn translation_columns_round_trip_by_language() {
        let mut t = Translation::new(MessageTable::Posts, Uuid::new_v4());
        assert_eq!(t.get(Language::Ja), None);

        t.set(Language::Ja, "こんにちは".into());
        assert_eq!(t.get(Language::Ja), Some("こんにちは"));
        assert_eq!(t.get(Language::Es), None);
    }

    #[test]
    fn language_tags_cover_all_targets() {
        for lang in TARGET_LANGUAGES {
            assert_eq!(Language::from_tag(lang.as_tag()), Some(lang));
        }
        assert_eq!(Language::from_tag("tlh"), None);
    }

    #[test]
    fn reactions_group_by_emoji_and_dedupe_users() {
        let message_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        let rows = vec![
            Reaction { message_id, user_id: user, emoji: "👍".into() },
            Reaction { message_id, user_id: user, emoji: "👍".into() },
            Reaction { message_id, user_id: Uuid::new_v4(), emoji: "👍".into() },
            Reaction { message_id, user_id: user, emoji: "🎉".into() },
        ];

        let groups = group_reactions(rows);
        assert_eq!(groups.len(), 2);
        let thumbs = groups.iter().find(|g| g.emoji == "👍").unwrap();
        assert_eq!(thumbs.count, 2);
    }
}
