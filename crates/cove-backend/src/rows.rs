use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use cove_sync::SyncError;
use cove_sync::presence::PresenceWrite;
use cove_sync::subscriber::DetailFetch;
use cove_sync::unread::MarkerWrite;
use cove_types::events::Table;
use cove_types::models::{
    Attachment, AttachmentLink, AudioStatus, Channel, Message, MessageDetail, MessageRow,
    MessageTable, Presence, Reaction, ReadMarker, Translation, User, group_reactions,
};

use crate::BackendError;

/// Filter value for an equality predicate, e.g. `("id", eq(id))`.
pub fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

/// Client for the row-oriented data API. Filters go in the query string,
/// bodies are JSON rows, and reads can embed joined resources.
#[derive(Clone)]
pub struct Rows {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl Rows {
    pub fn new(base: String, token: String) -> Self {
        Self::with_client(reqwest::Client::new(), base, token)
    }

    pub fn with_client(http: reqwest::Client, base: String, token: String) -> Self {
        Rows { http, base, token }
    }

    fn url(&self, table: &str) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), table)
    }

    pub async fn select<T: DeserializeOwned>(
        &self,
        table: Table,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, BackendError> {
        let resp = self
            .http
            .get(self.url(table.as_str()))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn select_one<T: DeserializeOwned>(
        &self,
        table: Table,
        query: &[(&str, String)],
    ) -> Result<Option<T>, BackendError> {
        let mut rows = self.select(table, query).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }

    /// Insert one row and return the stored representation (the backend
    /// fills server-side defaults such as created_at).
    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        table: Table,
        row: &T,
    ) -> Result<R, BackendError> {
        let resp = self
            .http
            .post(self.url(table.as_str()))
            .bearer_auth(&self.token)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;
        let mut rows: Vec<R> = check(resp).await?.json().await?;
        if rows.is_empty() {
            return Err(BackendError::NoRows);
        }
        Ok(rows.remove(0))
    }

    pub async fn upsert<T: Serialize>(&self, table: Table, row: &T) -> Result<(), BackendError> {
        let resp = self
            .http
            .post(self.url(table.as_str()))
            .bearer_auth(&self.token)
            .header("Prefer", "resolution=merge-duplicates")
            .json(row)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn update<T: Serialize>(
        &self,
        table: Table,
        query: &[(&str, String)],
        patch: &T,
    ) -> Result<(), BackendError> {
        let resp = self
            .http
            .patch(self.url(table.as_str()))
            .bearer_auth(&self.token)
            .query(query)
            .json(patch)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn delete(&self, table: Table, query: &[(&str, String)]) -> Result<(), BackendError> {
        let resp = self
            .http
            .delete(self.url(table.as_str()))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    // -- Users and channels --

    pub async fn fetch_user(&self, id: Uuid) -> Result<Option<User>, BackendError> {
        self.select_one(Table::Users, &[("id", eq(id))]).await
    }

    pub async fn fetch_channels(&self) -> Result<Vec<Channel>, BackendError> {
        self.select(Table::Channels, &[("order", "name.asc".into())]).await
    }

    // -- Messages --

    /// Write a message into the table its scope names. The row id is
    /// client-generated; created_at comes back from the server.
    pub async fn send_message(
        &self,
        scope: cove_types::models::Scope,
        author_id: Uuid,
        content: &str,
    ) -> Result<MessageRow, BackendError> {
        let table = scope.table();
        let mut body = json!({
            "id": Uuid::new_v4(),
            "author_id": author_id,
            "content": content,
        });
        body[table.parent_column()] = json!(scope.parent_id());
        self.insert(table.into(), &body).await
    }

    pub async fn fetch_message_row(
        &self,
        table: MessageTable,
        id: Uuid,
    ) -> Result<Option<MessageRow>, BackendError> {
        self.select_one(table.into(), &[("id", eq(id))]).await
    }

    /// The detail fetch: one read joining author, attachments, translation,
    /// and reaction rows for a single message id.
    pub async fn fetch_message_detail(
        &self,
        table: MessageTable,
        id: Uuid,
    ) -> Result<Option<MessageDetail>, BackendError> {
        let query = [
            ("select", DETAIL_SELECT.to_string()),
            ("id", eq(id)),
        ];
        let row: Option<DetailRow> = self.select_one(table.into(), &query).await?;
        row.map(MessageDetail::try_from).transpose()
    }

    /// Recent messages for one scope, joined like the detail fetch, oldest
    /// first so they can be replayed into a reconciled list.
    pub async fn fetch_scope_details(
        &self,
        scope: cove_types::models::Scope,
        limit: u32,
    ) -> Result<Vec<MessageDetail>, BackendError> {
        let table = scope.table();
        let query = [
            ("select", DETAIL_SELECT.to_string()),
            (table.parent_column(), eq(scope.parent_id())),
            ("order", "created_at.asc".to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<DetailRow> = self.select(table.into(), &query).await?;
        rows.into_iter().map(MessageDetail::try_from).collect()
    }

    // -- Translations --

    pub async fn upsert_translation(&self, translation: &Translation) -> Result<(), BackendError> {
        self.upsert(Table::Translations, translation).await
    }

    // -- Presence and read markers --

    pub async fn fetch_presence(&self) -> Result<Vec<Presence>, BackendError> {
        self.select(Table::Presence, &[]).await
    }

    pub async fn upsert_presence(&self, user_id: Uuid, is_online: bool) -> Result<(), BackendError> {
        let row = Presence {
            user_id,
            is_online,
            last_seen: Utc::now(),
        };
        self.upsert(Table::Presence, &row).await
    }

    pub async fn fetch_read_markers(&self, user_id: Uuid) -> Result<Vec<ReadMarker>, BackendError> {
        self.select(Table::ReadMarkers, &[("user_id", eq(user_id))]).await
    }

    pub async fn upsert_read_marker(
        &self,
        user_id: Uuid,
        scope_id: Uuid,
        last_read_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let row = ReadMarker {
            user_id,
            scope_id,
            last_read_at,
        };
        self.upsert(Table::ReadMarkers, &row).await
    }

    // -- Speech job queries --

    /// Rows the speech batch job has not looked at yet.
    pub async fn pending_speech(
        &self,
        table: MessageTable,
        limit: u32,
    ) -> Result<Vec<MessageRow>, BackendError> {
        let query = [
            ("audio_status", "is.null".to_string()),
            ("order", "created_at.asc".to_string()),
            ("limit", limit.to_string()),
        ];
        self.select(table.into(), &query).await
    }

    pub async fn set_audio_status(
        &self,
        table: MessageTable,
        id: Uuid,
        status: AudioStatus,
    ) -> Result<(), BackendError> {
        self.update(table.into(), &[("id", eq(id))], &json!({ "audio_status": status }))
            .await
    }

    pub async fn insert_attachment(&self, attachment: &Attachment) -> Result<(), BackendError> {
        let resp = self
            .http
            .post(self.url(Table::Attachments.as_str()))
            .bearer_auth(&self.token)
            .json(attachment)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn insert_attachment_link(&self, link: &AttachmentLink) -> Result<(), BackendError> {
        let resp = self
            .http
            .post(self.url(Table::AttachmentLinks.as_str()))
            .bearer_auth(&self.token)
            .json(link)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

const DETAIL_SELECT: &str =
    "*,author:users(*),links:attachment_links(attachment:attachments(*)),translations:translations(*),reaction_rows:reactions(*)";

#[derive(Debug, serde::Deserialize)]
struct DetailRow {
    #[serde(flatten)]
    row: MessageRow,
    author: User,
    #[serde(default)]
    links: Vec<LinkRow>,
    #[serde(default)]
    translations: Vec<Translation>,
    #[serde(default)]
    reaction_rows: Vec<Reaction>,
}

#[derive(Debug, serde::Deserialize)]
struct LinkRow {
    attachment: Attachment,
}

impl TryFrom<DetailRow> for MessageDetail {
    type Error = BackendError;

    fn try_from(row: DetailRow) -> Result<Self, Self::Error> {
        let message = Message::try_from(row.row)?;
        Ok(MessageDetail {
            message,
            author: row.author,
            files: row.links.into_iter().map(|l| l.attachment).collect(),
            translation: row.translations.into_iter().next(),
            reactions: group_reactions(row.reaction_rows),
        })
    }
}

pub(crate) async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status { status, body })
}

// -- Sync-layer trait impls --

impl DetailFetch for Rows {
    async fn fetch_detail(
        &self,
        table: MessageTable,
        id: Uuid,
    ) -> Result<Option<MessageDetail>, SyncError> {
        self.fetch_message_detail(table, id)
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))
    }
}

impl PresenceWrite for Rows {
    async fn write_presence(&self, user_id: Uuid, is_online: bool) -> Result<(), SyncError> {
        self.upsert_presence(user_id, is_online)
            .await
            .map_err(|e| SyncError::Write(e.to_string()))
    }
}

impl MarkerWrite for Rows {
    async fn write_marker(
        &self,
        user_id: Uuid,
        scope_id: Uuid,
        last_read_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        self.upsert_read_marker(user_id, scope_id, last_read_at)
            .await
            .map_err(|e| SyncError::Write(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_builds_the_filter_literal() {
        let id = Uuid::new_v4();
        assert_eq!(eq(id), format!("eq.{}", id));
        assert_eq!(eq(42), "eq.42");
    }

    #[test]
    fn a_joined_detail_row_decodes_into_the_ui_shape() {
        let id = Uuid::new_v4();
        let channel = Uuid::new_v4();
        let author = Uuid::new_v4();
        let reactor = Uuid::new_v4();

        let payload = json!({
            "id": id.to_string(),
            "author_id": author.to_string(),
            "content": "hi",
            "channel_id": channel.to_string(),
            "created_at": "2026-03-01T12:00:00Z",
            "author": {
                "id": author.to_string(),
                "username": "u1",
                "language": "en",
                "created_at": "2026-01-01T00:00:00Z",
            },
            "links": [],
            "translations": [],
            "reaction_rows": [
                {
                    "message_id": id.to_string(),
                    "user_id": reactor.to_string(),
                    "emoji": "👍",
                }
            ],
        });

        let row: DetailRow = serde_json::from_value(payload).unwrap();
        let detail = MessageDetail::try_from(row).unwrap();
        assert_eq!(detail.message.id, id);
        assert_eq!(detail.author.username, "u1");
        assert!(detail.translation.is_none());
        assert_eq!(detail.reactions[0].count, 1);
    }

    #[test]
    fn a_detail_row_with_conflicting_parents_is_rejected() {
        let payload = json!({
            "id": Uuid::new_v4().to_string(),
            "author_id": Uuid::new_v4().to_string(),
            "content": "hi",
            "channel_id": Uuid::new_v4().to_string(),
            "conversation_id": Uuid::new_v4().to_string(),
            "created_at": "2026-03-01T12:00:00Z",
            "author": {
                "id": Uuid::new_v4().to_string(),
                "username": "u1",
                "language": "en",
                "created_at": "2026-01-01T00:00:00Z",
            },
        });

        let row: DetailRow = serde_json::from_value(payload).unwrap();
        assert!(matches!(
            MessageDetail::try_from(row),
            Err(BackendError::InvalidRow(_))
        ));
    }
}
