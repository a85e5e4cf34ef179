use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, warn};
use uuid::Uuid;

use cove_types::events::{ChangeEvent, FeedCommand, FeedEvent, Table};

use crate::BackendError;

/// Keep-alive: one Ping every 15 seconds, two missed Pongs drops the
/// connection.
const PING_INTERVAL: Duration = Duration::from_secs(15);

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SubKey = (Table, Option<Uuid>);
type SubMap = Arc<RwLock<HashMap<SubKey, Vec<(Uuid, mpsc::UnboundedSender<ChangeEvent>)>>>>;

/// One WebSocket connection to the change feed, multiplexing any number of
/// logical subscriptions.
///
/// Subscriptions are scope-level only (table plus at most one parent id);
/// finer filtering happens in the consumer. Because the server-side filter
/// never has to encode a derived id list, it is never rebuilt, and there is
/// no window in which a rebuilt filter can miss events.
pub struct ChangeFeed {
    cmd_tx: mpsc::UnboundedSender<FeedCommand>,
    subs: SubMap,
    task: tokio::task::JoinHandle<()>,
}

impl ChangeFeed {
    /// Connect and authenticate with the session token.
    pub async fn connect(feed_url: &str, token: &str) -> Result<Self, BackendError> {
        let (ws, _) = connect_async(feed_url).await?;
        let (mut sink, stream) = ws.split();

        let identify = serde_json::to_string(&FeedCommand::Identify {
            token: token.to_string(),
        })?;
        sink.send(WsMessage::Text(identify.into())).await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let subs: SubMap = Arc::new(RwLock::new(HashMap::new()));
        let task = tokio::spawn(run_feed_loop(sink, stream, cmd_rx, subs.clone()));

        Ok(ChangeFeed { cmd_tx, subs, task })
    }

    /// Open a logical subscription. Events arrive on the returned handle in
    /// feed order; dropping the handle unsubscribes.
    pub fn subscribe(&self, table: Table, scope: Option<Uuid>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        {
            let mut subs = self.subs.write().expect("subscription lock poisoned");
            subs.entry((table, scope)).or_default().push((id, tx));
        }
        let _ = self.cmd_tx.send(FeedCommand::Subscribe { table, scope });
        Subscription {
            id,
            key: (table, scope),
            rx,
            subs: self.subs.clone(),
            cmd_tx: self.cmd_tx.clone(),
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct Subscription {
    id: Uuid,
    key: SubKey,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    subs: SubMap,
    cmd_tx: mpsc::UnboundedSender<FeedCommand>,
}

impl Subscription {
    /// Next event for this subscription. `None` means the feed is gone; the
    /// caller decides whether to reconnect.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Ok(mut subs) = self.subs.write() else {
            return;
        };
        if let Some(entries) = subs.get_mut(&self.key) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                subs.remove(&self.key);
                let _ = self.cmd_tx.send(FeedCommand::Unsubscribe {
                    table: self.key.0,
                    scope: self.key.1,
                });
            }
        }
    }
}

async fn run_feed_loop(
    mut sink: SplitSink<Ws, WsMessage>,
    mut stream: SplitStream<Ws>,
    mut cmd_rx: mpsc::UnboundedReceiver<FeedCommand>,
    subs: SubMap,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;
    let mut pong_received = true;
    let mut missed_pongs: u8 = 0;

    loop {
        tokio::select! {
            msg = stream.next() => {
                let Some(Ok(msg)) = msg else {
                    warn!("change feed connection closed");
                    break;
                };
                match msg {
                    WsMessage::Text(text) => match serde_json::from_str::<FeedEvent>(&text) {
                        Ok(FeedEvent::Ready { user_id }) => {
                            info!("change feed ready for {}", user_id);
                        }
                        Ok(FeedEvent::Change(event)) => route(event, &subs),
                        Err(e) => {
                            warn!("bad feed frame: {} -- raw: {}", e, &text[..text.len().min(200)]);
                        }
                    },
                    WsMessage::Ping(payload) => {
                        if sink.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Pong(_) => pong_received = true,
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let text = match serde_json::to_string(&cmd) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("unencodable feed command: {}", e);
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if pong_received {
                    missed_pongs = 0;
                } else {
                    missed_pongs += 1;
                    if missed_pongs >= 2 {
                        warn!("feed heartbeat timeout (missed {} pongs), dropping connection", missed_pongs);
                        break;
                    }
                }
                pong_received = false;
                if sink.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Closing every sender wakes the subscriptions with `None`.
    if let Ok(mut subs) = subs.write() {
        subs.clear();
    }
}

/// Deliver one event to the matching scoped subscribers (when the payload
/// carries the scope column) and to every table-wide subscriber. Closed
/// receivers are pruned as they are found.
fn route(event: ChangeEvent, subs: &SubMap) {
    let scope = event.scope_id();
    let Ok(mut subs) = subs.write() else {
        return;
    };

    let mut keys = vec![(event.table, None)];
    if scope.is_some() {
        keys.push((event.table, scope));
    }

    for key in keys {
        if let Some(entries) = subs.get_mut(&key) {
            entries.retain(|(_, tx)| tx.send(event.clone()).is_ok());
            if entries.is_empty() {
                subs.remove(&key);
            }
        }
    }
}
