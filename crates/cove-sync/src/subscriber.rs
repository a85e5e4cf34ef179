use std::future::Future;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use cove_types::events::{ChangeEvent, ChangeKind, Table};
use cove_types::models::{MessageDetail, MessageTable, Reaction, ReactionGroup, Scope, Translation};

use crate::SyncError;
use crate::reconciler::{ListEvent, RecordList};

/// Follow-up read resolving a bare row id to the joined record the UI needs.
/// Notifications carry only changed columns, never author/files/translation.
pub trait DetailFetch: Send + Sync {
    fn fetch_detail(
        &self,
        table: MessageTable,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<MessageDetail>, SyncError>> + Send;
}

/// What applying one change-feed event did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted(Uuid),
    Updated(Uuid),
    Removed(Uuid),
    Ignored,
}

/// Event consumer for one (message table, parent id) scope.
///
/// Subscriptions are table-plus-parent only; any event that slips through
/// for another scope is narrowed away here rather than by rebuilding the
/// subscription filter.
pub struct ScopeSync<F> {
    scope: Scope,
    fetcher: F,
}

impl<F: DetailFetch> ScopeSync<F> {
    pub fn new(scope: Scope, fetcher: F) -> Self {
        ScopeSync { scope, fetcher }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Apply one change-feed event to this scope's list.
    pub async fn apply(&self, list: &mut RecordList<MessageDetail>, event: &ChangeEvent) -> Applied {
        if event.table == Table::from(self.scope.table()) {
            return self.apply_message(list, event).await;
        }
        match event.table {
            Table::Reactions => apply_reaction(list, event),
            Table::Translations => apply_translation(list, event),
            _ => Applied::Ignored,
        }
    }

    async fn apply_message(
        &self,
        list: &mut RecordList<MessageDetail>,
        event: &ChangeEvent,
    ) -> Applied {
        let Some(id) = event.id() else {
            warn!("{} event without an id, skipping", event.table.as_str());
            return Applied::Ignored;
        };

        if event.kind == ChangeKind::Delete {
            return if list.apply(ListEvent::Delete(id)) {
                Applied::Removed(id)
            } else {
                Applied::Ignored
            };
        }

        if let Some(scope_id) = event.scope_id() {
            if scope_id != self.scope.parent_id() {
                return Applied::Ignored;
            }
        }

        let detail = match self.fetcher.fetch_detail(self.scope.table(), id).await {
            Ok(Some(detail)) => detail,
            Ok(None) => {
                debug!("row {} was gone before the detail fetch", id);
                return Applied::Ignored;
            }
            Err(e) => {
                // Drop this one update; the list stays stale until the next
                // event for the same id.
                warn!("detail fetch for {} failed: {}", id, e);
                return Applied::Ignored;
            }
        };

        if detail.message.scope != self.scope {
            return Applied::Ignored;
        }

        let changed = match event.kind {
            ChangeKind::Insert => list.apply(ListEvent::Insert(detail)),
            _ => list.apply(ListEvent::Update(detail)),
        };
        if !changed {
            return Applied::Ignored;
        }
        match event.kind {
            ChangeKind::Insert => Applied::Inserted(id),
            _ => Applied::Updated(id),
        }
    }
}

pub(crate) fn decode_row<T: DeserializeOwned>(event: &ChangeEvent) -> Option<T> {
    let value = event.record.as_ref().or(event.old.as_ref())?;
    match serde_json::from_value(value.clone()) {
        Ok(row) => Some(row),
        Err(e) => {
            warn!("undecodable {} payload: {}", event.table.as_str(), e);
            None
        }
    }
}

/// Fold a reaction row event into the grouped reactions of its message.
/// Events for messages outside this list are no-ops.
pub fn apply_reaction(list: &mut RecordList<MessageDetail>, event: &ChangeEvent) -> Applied {
    let Some(reaction) = decode_row::<Reaction>(event) else {
        return Applied::Ignored;
    };
    let message_id = reaction.message_id;
    let Some(detail) = list.get_mut(message_id) else {
        return Applied::Ignored;
    };

    match event.kind {
        ChangeKind::Insert => {
            match detail.reactions.iter_mut().find(|g| g.emoji == reaction.emoji) {
                Some(group) => {
                    if group.user_ids.contains(&reaction.user_id) {
                        return Applied::Ignored;
                    }
                    group.user_ids.push(reaction.user_id);
                    group.count += 1;
                }
                None => detail.reactions.push(ReactionGroup {
                    emoji: reaction.emoji,
                    count: 1,
                    user_ids: vec![reaction.user_id],
                }),
            }
            Applied::Updated(message_id)
        }
        ChangeKind::Delete => {
            let Some(at) = detail.reactions.iter().position(|g| g.emoji == reaction.emoji)
            else {
                return Applied::Ignored;
            };
            let group = &mut detail.reactions[at];
            let Some(user_at) = group.user_ids.iter().position(|u| *u == reaction.user_id)
            else {
                return Applied::Ignored;
            };
            group.user_ids.remove(user_at);
            group.count -= 1;
            if group.user_ids.is_empty() {
                detail.reactions.remove(at);
            }
            Applied::Updated(message_id)
        }
        // Reaction rows are inserted and deleted, never updated.
        ChangeKind::Update => Applied::Ignored,
    }
}

/// Attach an asynchronously produced translation row to its message.
pub fn apply_translation(list: &mut RecordList<MessageDetail>, event: &ChangeEvent) -> Applied {
    let Some(translation) = decode_row::<Translation>(event) else {
        return Applied::Ignored;
    };
    let source_id = translation.source_id;
    let Some(detail) = list.get_mut(source_id) else {
        return Applied::Ignored;
    };

    match event.kind {
        ChangeKind::Insert | ChangeKind::Update => detail.translation = Some(translation),
        ChangeKind::Delete => detail.translation = None,
    }
    Applied::Updated(source_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cove_types::models::{Message, User};
    use serde_json::json;
    use std::collections::HashMap;

    struct StubFetch {
        details: HashMap<Uuid, MessageDetail>,
        fail: bool,
    }

    impl DetailFetch for StubFetch {
        async fn fetch_detail(
            &self,
            _table: MessageTable,
            id: Uuid,
        ) -> Result<Option<MessageDetail>, SyncError> {
            if self.fail {
                return Err(SyncError::Fetch("stubbed outage".into()));
            }
            Ok(self.details.get(&id).cloned())
        }
    }

    fn author() -> User {
        User {
            id: Uuid::new_v4(),
            username: "u1".into(),
            language: "en".into(),
            created_at: Utc::now(),
        }
    }

    fn detail(id: Uuid, scope: Scope, content: &str) -> MessageDetail {
        MessageDetail {
            message: Message {
                id,
                author_id: Uuid::new_v4(),
                scope,
                content: content.into(),
                created_at: Utc::now(),
            },
            author: author(),
            files: Vec::new(),
            translation: None,
            reactions: Vec::new(),
        }
    }

    fn insert_event(table: Table, id: Uuid) -> ChangeEvent {
        ChangeEvent {
            table,
            kind: ChangeKind::Insert,
            record: Some(json!({ "id": id.to_string() })),
            old: None,
        }
    }

    #[tokio::test]
    async fn insert_then_delete_round_trips_through_the_list() {
        let channel = Uuid::new_v4();
        let scope = Scope::Channel(channel);
        let m1 = Uuid::new_v4();

        let mut details = HashMap::new();
        details.insert(m1, detail(m1, scope, "hi"));
        let sync = ScopeSync::new(scope, StubFetch { details, fail: false });
        let mut list = RecordList::new();

        let applied = sync.apply(&mut list, &insert_event(Table::Posts, m1)).await;
        assert_eq!(applied, Applied::Inserted(m1));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(m1).unwrap().message.content, "hi");

        let delete = ChangeEvent {
            table: Table::Posts,
            kind: ChangeKind::Delete,
            record: None,
            old: Some(json!({ "id": m1.to_string() })),
        };
        let applied = sync.apply(&mut list, &delete).await;
        assert_eq!(applied, Applied::Removed(m1));
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn a_failed_detail_fetch_drops_only_that_event() {
        let scope = Scope::Channel(Uuid::new_v4());
        let sync = ScopeSync::new(scope, StubFetch { details: HashMap::new(), fail: true });
        let mut list = RecordList::new();

        let applied = sync
            .apply(&mut list, &insert_event(Table::Posts, Uuid::new_v4()))
            .await;
        assert_eq!(applied, Applied::Ignored);
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn events_for_another_scope_are_narrowed_away() {
        let ours = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        let m1 = Uuid::new_v4();

        let mut details = HashMap::new();
        details.insert(m1, detail(m1, Scope::Channel(theirs), "psst"));
        let sync = ScopeSync::new(Scope::Channel(ours), StubFetch { details, fail: false });
        let mut list = RecordList::new();

        // Payload carries the foreign channel id: rejected before the fetch.
        let mut event = insert_event(Table::Posts, m1);
        event.record = Some(json!({
            "id": m1.to_string(),
            "channel_id": theirs.to_string(),
        }));
        assert_eq!(sync.apply(&mut list, &event).await, Applied::Ignored);

        // Partial payload without the column: rejected after the fetch.
        let event = insert_event(Table::Posts, m1);
        assert_eq!(sync.apply(&mut list, &event).await, Applied::Ignored);
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn reactions_group_and_ungroup_on_their_message() {
        let scope = Scope::Channel(Uuid::new_v4());
        let m1 = Uuid::new_v4();
        let reactor = Uuid::new_v4();

        let sync = ScopeSync::new(scope, StubFetch { details: HashMap::new(), fail: false });
        let mut list = RecordList::new();
        list.apply(ListEvent::Insert(detail(m1, scope, "hi")));

        let payload = json!({
            "message_id": m1.to_string(),
            "user_id": reactor.to_string(),
            "emoji": "👍",
        });
        let add = ChangeEvent {
            table: Table::Reactions,
            kind: ChangeKind::Insert,
            record: Some(payload.clone()),
            old: None,
        };

        assert_eq!(sync.apply(&mut list, &add).await, Applied::Updated(m1));
        // Same event again: idempotent.
        assert_eq!(sync.apply(&mut list, &add).await, Applied::Ignored);
        assert_eq!(list.get(m1).unwrap().reactions[0].count, 1);

        let remove = ChangeEvent {
            table: Table::Reactions,
            kind: ChangeKind::Delete,
            record: None,
            old: Some(payload),
        };
        assert_eq!(sync.apply(&mut list, &remove).await, Applied::Updated(m1));
        assert!(list.get(m1).unwrap().reactions.is_empty());
    }

    #[tokio::test]
    async fn a_translation_row_attaches_to_its_message() {
        let scope = Scope::Channel(Uuid::new_v4());
        let m1 = Uuid::new_v4();

        let sync = ScopeSync::new(scope, StubFetch { details: HashMap::new(), fail: false });
        let mut list = RecordList::new();
        list.apply(ListEvent::Insert(detail(m1, scope, "hello")));
        assert!(list.get(m1).unwrap().translation.is_none());

        let event = ChangeEvent {
            table: Table::Translations,
            kind: ChangeKind::Insert,
            record: Some(json!({
                "source_table": "posts",
                "source_id": m1.to_string(),
                "es": "hola",
            })),
            old: None,
        };
        assert_eq!(sync.apply(&mut list, &event).await, Applied::Updated(m1));

        let translation = list.get(m1).unwrap().translation.as_ref().unwrap();
        assert_eq!(
            translation.get(cove_types::models::Language::Es),
            Some("hola")
        );
    }
}
