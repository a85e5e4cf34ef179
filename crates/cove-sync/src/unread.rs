use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use cove_types::models::Message;

use crate::SyncError;

/// Persists the per-(user, conversation) last-read timestamp. Implemented by
/// the backend row client.
pub trait MarkerWrite: Send + Sync {
    fn write_marker(
        &self,
        user_id: Uuid,
        scope_id: Uuid,
        last_read_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Per-conversation unread counters, derived incrementally from message
/// inserts: a message counts when someone else authored it after the local
/// last-read mark. Counts are never stored server-side.
#[derive(Debug)]
pub struct UnreadCounts {
    self_id: Uuid,
    last_read: HashMap<Uuid, DateTime<Utc>>,
    counts: HashMap<Uuid, u32>,
}

impl UnreadCounts {
    pub fn new(self_id: Uuid) -> Self {
        UnreadCounts {
            self_id,
            last_read: HashMap::new(),
            counts: HashMap::new(),
        }
    }

    /// Seed a marker from a read-marker row fetched at session start.
    pub fn load_marker(&mut self, scope_id: Uuid, last_read_at: DateTime<Utc>) {
        self.last_read.insert(scope_id, last_read_at);
    }

    /// Count one newly arrived message.
    pub fn observe(&mut self, scope_id: Uuid, author_id: Uuid, created_at: DateTime<Utc>) {
        if author_id == self.self_id {
            return;
        }
        let unread = match self.last_read.get(&scope_id) {
            Some(mark) => created_at > *mark,
            // No marker: the conversation was never read.
            None => true,
        };
        if unread {
            *self.counts.entry(scope_id).or_default() += 1;
        }
    }

    pub fn count(&self, scope_id: Uuid) -> u32 {
        self.counts.get(&scope_id).copied().unwrap_or(0)
    }

    /// Zero the counter, then persist the new marker. Local state moves
    /// first so the badge clears even if the write later fails.
    pub async fn mark_read<W: MarkerWrite>(
        &mut self,
        writer: &W,
        scope_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        self.last_read.insert(scope_id, at);
        self.counts.remove(&scope_id);
        writer.write_marker(self.self_id, scope_id, at).await
    }

    /// Recompute one scope from a full message list, e.g. after a backfill.
    pub fn recount<'a, I>(&mut self, scope_id: Uuid, messages: I)
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let mark = self.last_read.get(&scope_id).copied();
        let count = messages
            .into_iter()
            .filter(|m| m.author_id != self.self_id)
            .filter(|m| mark.is_none_or(|mark| m.created_at > mark))
            .count() as u32;
        self.counts.insert(scope_id, count);
    }

    pub fn clear(&mut self) {
        self.last_read.clear();
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn messages_after_the_mark_from_others_count() {
        let me = Uuid::new_v4();
        let them = Uuid::new_v4();
        let convo = Uuid::new_v4();
        let mark = at(100);

        let mut unread = UnreadCounts::new(me);
        unread.load_marker(convo, mark);

        unread.observe(convo, them, at(99));
        unread.observe(convo, them, at(101));
        unread.observe(convo, them, at(102));

        assert_eq!(unread.count(convo), 2);
    }

    #[test]
    fn own_messages_never_count() {
        let me = Uuid::new_v4();
        let convo = Uuid::new_v4();

        let mut unread = UnreadCounts::new(me);
        unread.load_marker(convo, at(0));
        unread.observe(convo, me, at(10));

        assert_eq!(unread.count(convo), 0);
    }

    #[test]
    fn without_a_marker_everything_from_others_counts() {
        let mut unread = UnreadCounts::new(Uuid::new_v4());
        let convo = Uuid::new_v4();
        unread.observe(convo, Uuid::new_v4(), at(1));
        assert_eq!(unread.count(convo), 1);
    }

    struct NullWriter;

    impl MarkerWrite for NullWriter {
        async fn write_marker(
            &self,
            _user_id: Uuid,
            _scope_id: Uuid,
            _last_read_at: DateTime<Utc>,
        ) -> Result<(), SyncError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn mark_read_zeroes_the_counter_and_moves_the_mark() {
        let me = Uuid::new_v4();
        let them = Uuid::new_v4();
        let convo = Uuid::new_v4();

        let mut unread = UnreadCounts::new(me);
        unread.observe(convo, them, at(5));
        assert_eq!(unread.count(convo), 1);

        unread.mark_read(&NullWriter, convo, at(10)).await.unwrap();
        assert_eq!(unread.count(convo), 0);

        // Older than the new mark: stays read.
        unread.observe(convo, them, at(7));
        assert_eq!(unread.count(convo), 0);

        unread.observe(convo, them, at(11));
        assert_eq!(unread.count(convo), 1);
    }
}
