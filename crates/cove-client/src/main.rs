use anyhow::Context;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use cove_backend::Session;
use cove_sync::presence::run_heartbeat;
use cove_sync::reconciler::ListEvent;
use cove_sync::store::SyncStore;
use cove_sync::subscriber::ScopeSync;
use cove_types::events::Table;
use cove_types::models::{Message, MessageDetail, Scope};

/// Headless channel client: reconciles one channel's messages from the
/// change feed, tracks presence and unread counts, and sends lines read
/// from stdin as optimistic writes.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cove=debug".into()),
        )
        .init();

    // Config
    let data_url = std::env::var("COVE_DATA_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:54321/rest/v1".into());
    let storage_url = std::env::var("COVE_STORAGE_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:54321/storage/v1".into());
    let feed_url =
        std::env::var("COVE_FEED_URL").unwrap_or_else(|_| "ws://127.0.0.1:54321/feed/v1".into());
    let token = std::env::var("COVE_TOKEN").context("COVE_TOKEN is required")?;
    let user_id: Uuid = std::env::var("COVE_USER_ID")
        .context("COVE_USER_ID is required")?
        .parse()?;
    let channel_id: Uuid = std::env::var("COVE_CHANNEL_ID")
        .context("COVE_CHANNEL_ID is required")?
        .parse()?;

    let session = Session::new(data_url, storage_url, feed_url, token, user_id);

    let me = session
        .rows()
        .fetch_user(session.user_id())
        .await?
        .context("session user not found")?;
    info!("signed in as {} ({})", me.username, me.id);

    // Session-scoped state, torn down at exit.
    let mut store = SyncStore::new(me.clone());
    let scope = Scope::Channel(channel_id);

    // Seed markers and presence before replaying history, so the unread
    // count after the backfill is meaningful.
    for marker in session.rows().fetch_read_markers(me.id).await? {
        store.unread.load_marker(marker.scope_id, marker.last_read_at);
    }
    store.presence.load(&session.rows().fetch_presence().await?);

    let history = session.rows().fetch_scope_details(scope, 50).await?;
    for detail in history {
        store.list_mut(scope).apply(ListEvent::Insert(detail));
    }
    let messages: Vec<Message> = store
        .list(scope)
        .map(|list| list.iter().map(|d| d.message.clone()).collect())
        .unwrap_or_default();
    store.unread.recount(channel_id, messages.iter());
    info!(
        "channel {}: {} messages, {} unread, {} users online",
        channel_id,
        store.list(scope).map_or(0, |l| l.len()),
        store.unread.count(channel_id),
        store.presence.online().len(),
    );

    // Entering the channel reads it.
    store
        .unread
        .mark_read(session.rows(), channel_id, Utc::now())
        .await
        .unwrap_or_else(|e| warn!("read marker write failed: {}", e));

    // One logical subscription per concern, all over one connection.
    let feed = session.connect_feed().await?;
    let mut posts_sub = feed.subscribe(Table::Posts, Some(channel_id));
    let mut reactions_sub = feed.subscribe(Table::Reactions, None);
    let mut translations_sub = feed.subscribe(Table::Translations, None);
    let mut presence_sub = feed.subscribe(Table::Presence, None);

    // Own-presence heartbeat; flips to offline on shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat = tokio::spawn(run_heartbeat(session.rows().clone(), me.id, shutdown_rx));

    let sync = ScopeSync::new(scope, session.rows().clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = posts_sub.recv() => {
                let Some(event) = event else {
                    // A dropped feed is surfaced, not silently reconnected.
                    warn!("change feed closed, exiting");
                    break;
                };
                store.apply_event(&sync, &event).await;
                info!(
                    "channel {}: {} messages, {} unread",
                    channel_id,
                    store.list(scope).map_or(0, |l| l.len()),
                    store.unread.count(channel_id),
                );
            }
            Some(event) = reactions_sub.recv() => {
                store.apply_event(&sync, &event).await;
            }
            Some(event) = translations_sub.recv() => {
                store.apply_event(&sync, &event).await;
            }
            Some(event) = presence_sub.recv() => {
                store.apply_event(&sync, &event).await;
                info!("{} users online", store.presence.online().len());
            }
            line = lines.next_line() => {
                match line? {
                    Some(text) if !text.trim().is_empty() => {
                        send_line(&session, &mut store, scope, text.trim().to_string()).await;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Teardown: offline presence, dropped subscriptions, cleared state.
    let _ = shutdown_tx.send(true);
    let _ = heartbeat.await;
    store.clear();

    Ok(())
}

/// Optimistic send: the placeholder lands in the list before the write, the
/// confirmation swaps it for the server row, and a failure rolls it back.
async fn send_line(session: &Session, store: &mut SyncStore, scope: Scope, text: String) {
    let me = store.user().clone();
    let correlation = store.stage_message(scope, text.clone());

    match session.rows().send_message(scope, me.id, &text).await {
        Ok(row) => match Message::try_from(row) {
            Ok(message) => {
                let confirmed = MessageDetail {
                    message,
                    author: me,
                    files: Vec::new(),
                    translation: None,
                    reactions: Vec::new(),
                };
                store.confirm_message(scope, correlation, confirmed);
            }
            Err(e) => {
                store.fail_message(scope, correlation);
                warn!("server returned an invalid row: {}", e);
            }
        },
        Err(e) => {
            store.fail_message(scope, correlation);
            warn!("send failed, message discarded: {}", e);
        }
    }
}
