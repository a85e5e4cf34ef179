use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

use cove_types::events::{ChangeEvent, ChangeKind, Table};
use cove_types::models::Presence;

use crate::SyncError;
use crate::subscriber::decode_row;

/// Own-user presence row refresh cadence. The platform decides how long a
/// silent client stays "online"; this client only keeps writing.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Writes a presence row for a user. Implemented by the backend row client.
pub trait PresenceWrite: Send + Sync {
    fn write_presence(
        &self,
        user_id: Uuid,
        is_online: bool,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Online-user set derived from presence change events.
///
/// Per-user transitions: OFFLINE -> ONLINE on insert/update with
/// is_online=true, ONLINE -> OFFLINE on delete or update with
/// is_online=false. Other users' staleness is never checked locally; the
/// feed is trusted.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: HashSet<Uuid>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one presence event. Returns whether the online set changed.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        if event.table != Table::Presence {
            return false;
        }
        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let Some(row) = decode_row::<Presence>(event) else {
                    return false;
                };
                if row.is_online {
                    self.online.insert(row.user_id)
                } else {
                    self.online.remove(&row.user_id)
                }
            }
            ChangeKind::Delete => {
                // Delete payloads may carry only the key column.
                let Some(user_id) = event.uuid_field("user_id") else {
                    return false;
                };
                self.online.remove(&user_id)
            }
        }
    }

    /// Seed from presence rows fetched at session start.
    pub fn load(&mut self, rows: &[Presence]) {
        for row in rows {
            if row.is_online {
                self.online.insert(row.user_id);
            }
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.contains(&user_id)
    }

    pub fn online(&self) -> &HashSet<Uuid> {
        &self.online
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }
}

/// Refresh the own-user presence row every [`HEARTBEAT_INTERVAL`] until
/// `shutdown` flips, then write the offline record once on the way out.
pub async fn run_heartbeat<W: PresenceWrite>(
    writer: W,
    user_id: Uuid,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = writer.write_presence(user_id, true).await {
                    warn!("presence heartbeat failed: {}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    if let Err(e) = writer.write_presence(user_id, false).await {
        warn!("offline presence write failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn presence_event(kind: ChangeKind, user_id: Uuid, is_online: bool) -> ChangeEvent {
        let payload = json!({
            "user_id": user_id.to_string(),
            "is_online": is_online,
            "last_seen": Utc::now().to_rfc3339(),
        });
        match kind {
            ChangeKind::Delete => ChangeEvent {
                table: Table::Presence,
                kind,
                record: None,
                old: Some(json!({ "user_id": user_id.to_string() })),
            },
            _ => ChangeEvent {
                table: Table::Presence,
                kind,
                record: Some(payload),
                old: None,
            },
        }
    }

    #[test]
    fn insert_then_delete_leaves_the_user_offline() {
        let u = Uuid::new_v4();
        let mut tracker = PresenceTracker::new();

        assert!(tracker.apply(&presence_event(ChangeKind::Insert, u, true)));
        assert!(tracker.is_online(u));

        assert!(tracker.apply(&presence_event(ChangeKind::Delete, u, true)));
        assert!(!tracker.is_online(u));
        assert!(tracker.online().is_empty());
    }

    #[test]
    fn an_update_to_offline_removes_the_user() {
        let u = Uuid::new_v4();
        let mut tracker = PresenceTracker::new();

        tracker.apply(&presence_event(ChangeKind::Insert, u, true));
        assert!(tracker.apply(&presence_event(ChangeKind::Update, u, false)));
        assert!(!tracker.is_online(u));
    }

    #[test]
    fn events_for_other_tables_are_ignored() {
        let mut tracker = PresenceTracker::new();
        let mut event = presence_event(ChangeKind::Insert, Uuid::new_v4(), true);
        event.table = Table::Posts;
        assert!(!tracker.apply(&event));
    }

    #[derive(Clone)]
    struct RecordingWriter {
        writes: Arc<Mutex<Vec<bool>>>,
    }

    impl PresenceWrite for RecordingWriter {
        async fn write_presence(&self, _user_id: Uuid, is_online: bool) -> Result<(), SyncError> {
            self.writes.lock().unwrap().push(is_online);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_refreshes_every_30s_and_marks_offline_on_shutdown() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let writer = RecordingWriter { writes: writes.clone() };
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_heartbeat(writer, Uuid::new_v4(), rx));

        // Paused clock: this advances virtual time through two refreshes.
        tokio::time::sleep(Duration::from_secs(65)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let writes = writes.lock().unwrap();
        assert_eq!(writes.iter().filter(|on| **on).count(), 3);
        assert_eq!(writes.last(), Some(&false));
    }
}
