use std::collections::HashMap;

use uuid::Uuid;

use cove_types::events::{ChangeEvent, Table};
use cove_types::models::{MessageDetail, Scope, User};

use crate::optimistic::{PendingWrite, PendingWrites};
use crate::presence::PresenceTracker;
use crate::reconciler::RecordList;
use crate::subscriber::{Applied, DetailFetch, ScopeSync};
use crate::unread::UnreadCounts;

/// Session-scoped sync state: one reconciled list per scope, the pending
/// optimistic writes, and the presence/unread aggregates.
///
/// Created at session start and injected where needed; `clear` empties it at
/// sign-out. There is deliberately no global instance.
pub struct SyncStore {
    self_user: User,
    lists: HashMap<Scope, RecordList<MessageDetail>>,
    pending: PendingWrites,
    pub presence: PresenceTracker,
    pub unread: UnreadCounts,
}

impl SyncStore {
    pub fn new(self_user: User) -> Self {
        let unread = UnreadCounts::new(self_user.id);
        SyncStore {
            self_user,
            lists: HashMap::new(),
            pending: PendingWrites::new(),
            presence: PresenceTracker::new(),
            unread,
        }
    }

    pub fn user(&self) -> &User {
        &self.self_user
    }

    pub fn list(&self, scope: Scope) -> Option<&RecordList<MessageDetail>> {
        self.lists.get(&scope)
    }

    pub fn list_mut(&mut self, scope: Scope) -> &mut RecordList<MessageDetail> {
        self.lists.entry(scope).or_default()
    }

    /// Optimistically insert a message authored by the session user.
    pub fn stage_message(&mut self, scope: Scope, content: String) -> Uuid {
        let author = self.self_user.clone();
        let list = self.lists.entry(scope).or_default();
        self.pending.stage(list, &author, scope, content)
    }

    pub fn confirm_message(
        &mut self,
        scope: Scope,
        correlation_id: Uuid,
        confirmed: MessageDetail,
    ) -> Option<PendingWrite> {
        let list = self.lists.entry(scope).or_default();
        self.pending.confirm(list, correlation_id, confirmed)
    }

    pub fn fail_message(&mut self, scope: Scope, correlation_id: Uuid) -> bool {
        let list = self.lists.entry(scope).or_default();
        self.pending.fail(list, correlation_id)
    }

    /// Route one change-feed event: presence events feed the tracker, the
    /// rest go through the scope synchronizer, and fresh inserts bump the
    /// unread counter for their conversation.
    pub async fn apply_event<F: DetailFetch>(
        &mut self,
        sync: &ScopeSync<F>,
        event: &ChangeEvent,
    ) -> Applied {
        if event.table == Table::Presence {
            self.presence.apply(event);
            return Applied::Ignored;
        }

        let scope = sync.scope();
        let list = self.lists.entry(scope).or_default();
        let applied = sync.apply(list, event).await;

        if let Applied::Inserted(id) = applied {
            if let Some(detail) = list.get(id) {
                self.unread
                    .observe(scope.parent_id(), detail.message.author_id, detail.message.created_at);
            }
        }
        applied
    }

    /// Drop all session state at sign-out.
    pub fn clear(&mut self) {
        self.lists.clear();
        self.pending.clear();
        self.presence.clear();
        self.unread.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cove_types::models::Message;

    fn user(name: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: name.into(),
            language: "en".into(),
            created_at: Utc::now(),
        }
    }

    fn confirmed(scope: Scope, author: &User, content: &str) -> MessageDetail {
        MessageDetail {
            message: Message {
                id: Uuid::new_v4(),
                author_id: author.id,
                scope,
                content: content.into(),
                created_at: Utc::now(),
            },
            author: author.clone(),
            files: Vec::new(),
            translation: None,
            reactions: Vec::new(),
        }
    }

    #[test]
    fn stage_confirm_keeps_one_record() {
        let me = user("me");
        let scope = Scope::Channel(Uuid::new_v4());
        let mut store = SyncStore::new(me.clone());

        let correlation = store.stage_message(scope, "hello".into());
        assert_eq!(store.list(scope).unwrap().len(), 1);

        let server = confirmed(scope, &me, "hello");
        let server_id = server.message.id;
        store.confirm_message(scope, correlation, server);

        let list = store.list(scope).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.contains(server_id));
    }

    #[test]
    fn own_staged_messages_do_not_bump_unread() {
        let me = user("me");
        let channel = Uuid::new_v4();
        let mut store = SyncStore::new(me);

        store.stage_message(Scope::Channel(channel), "mine".into());
        assert_eq!(store.unread.count(channel), 0);
    }

    #[test]
    fn clear_resets_everything() {
        let me = user("me");
        let scope = Scope::Channel(Uuid::new_v4());
        let mut store = SyncStore::new(me);

        store.stage_message(scope, "draft".into());
        store.clear();

        assert!(store.list(scope).is_none() || store.list(scope).unwrap().is_empty());
        assert!(store.presence.online().is_empty());
    }
}
