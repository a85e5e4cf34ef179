use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use cove_types::models::{Message, MessageDetail, Scope, User};

use crate::reconciler::{ListEvent, Record, RecordList};

/// One in-flight optimistic write. The correlation id doubles as the
/// placeholder row id until the server assigns the real one.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub correlation_id: Uuid,
    pub scope: Scope,
    pub server_id: Option<Uuid>,
}

/// Explicit table of in-flight optimistic writes, keyed by correlation id.
///
/// The feed echo of a just-written row and the write's own response can
/// arrive in either order; resolution converges on one record either way,
/// because `confirm` removes the placeholder and the reconciler deduplicates
/// the server row by id.
#[derive(Debug, Default)]
pub struct PendingWrites {
    ops: HashMap<Uuid, PendingWrite>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a placeholder record at its timestamp position (the tail, since
    /// it is stamped now) and register the pending operation. Returns the
    /// correlation id to resolve the write with.
    pub fn stage(
        &mut self,
        list: &mut RecordList<MessageDetail>,
        author: &User,
        scope: Scope,
        content: String,
    ) -> Uuid {
        let correlation_id = Uuid::new_v4();
        let placeholder = MessageDetail {
            message: Message {
                id: correlation_id,
                author_id: author.id,
                scope,
                content,
                created_at: Utc::now(),
            },
            author: author.clone(),
            files: Vec::new(),
            translation: None,
            reactions: Vec::new(),
        };
        list.apply(ListEvent::Insert(placeholder));
        self.ops.insert(
            correlation_id,
            PendingWrite {
                correlation_id,
                scope,
                server_id: None,
            },
        );
        correlation_id
    }

    /// Swap the placeholder for the server-confirmed record. If the feed echo
    /// already inserted the server row, only the placeholder goes away.
    pub fn confirm(
        &mut self,
        list: &mut RecordList<MessageDetail>,
        correlation_id: Uuid,
        confirmed: MessageDetail,
    ) -> Option<PendingWrite> {
        let mut op = self.ops.remove(&correlation_id)?;
        op.server_id = Some(confirmed.id());

        list.apply(ListEvent::Delete(correlation_id));
        list.apply(ListEvent::Insert(confirmed));
        Some(op)
    }

    /// Roll back a failed write: the placeholder disappears and the list is
    /// exactly what it was before `stage`.
    pub fn fail(&mut self, list: &mut RecordList<MessageDetail>, correlation_id: Uuid) -> bool {
        if self.ops.remove(&correlation_id).is_none() {
            return false;
        }
        list.apply(ListEvent::Delete(correlation_id));
        true
    }

    pub fn is_pending(&self, correlation_id: Uuid) -> bool {
        self.ops.contains_key(&correlation_id)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}
