use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Language, MessageTable};

/// A resolved reference to one row in one of the four message tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub table: MessageTable,
    pub id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("no message reference supplied")]
    Missing,
    #[error("more than one message reference supplied")]
    Ambiguous,
}

/// Request body for the translation endpoint. Exactly one of the four
/// reference fields must be set.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslateRequest {
    pub sender_id: Uuid,
    #[serde(default)]
    pub post_id: Option<Uuid>,
    #[serde(default)]
    pub direct_message_id: Option<Uuid>,
    #[serde(default)]
    pub channel_comment_id: Option<Uuid>,
    #[serde(default)]
    pub dm_comment_id: Option<Uuid>,
}

impl TranslateRequest {
    pub fn message_ref(&self) -> Result<MessageRef, RefError> {
        let refs = [
            (MessageTable::Posts, self.post_id),
            (MessageTable::DirectMessages, self.direct_message_id),
            (MessageTable::PostComments, self.channel_comment_id),
            (MessageTable::DmComments, self.dm_comment_id),
        ];

        let mut set = refs
            .into_iter()
            .filter_map(|(table, id)| id.map(|id| MessageRef { table, id }));

        let first = set.next().ok_or(RefError::Missing)?;
        if set.next().is_some() {
            return Err(RefError::Ambiguous);
        }
        Ok(first)
    }
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub source_id: Uuid,
    /// Languages actually written; the sender's own language is skipped.
    pub translated: Vec<Language>,
}
