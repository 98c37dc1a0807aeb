//! TCP server for the live queue view
//!
//! Observers (queue displays, staff dashboards) connect and subscribe to a
//! topic. Every committed ticket change is forwarded to all of them with a
//! server-wide sequence number. Delivery is best-effort: an observer whose
//! outbound queue is full misses the event and reconciles with a snapshot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Message, NetEventKind, NetTicket};

/// Maximum number of connected observers
const MAX_OBSERVERS: usize = 256;

/// Heartbeat interval in milliseconds
const HEARTBEAT_INTERVAL_MS: u64 = 2000;

/// Outbound messages buffered per observer before events are dropped
const OBSERVER_QUEUE_DEPTH: usize = 256;

/// Source of the full open-ticket list.
///
/// Called from a blocking worker thread; implementations may hit the store.
pub trait SnapshotSource: Send + Sync + 'static {
    fn snapshot(&self) -> Result<Vec<NetTicket>>;
}

/// Connected observer
struct Observer {
    addr: SocketAddr,
    tx: mpsc::Sender<Message>,
}

/// Server state shared across tasks
struct ServerState {
    topic: String,
    observers: HashMap<Uuid, Observer>,
    /// Sequence of the most recent `TicketChanged`
    sequence: u64,
}

impl ServerState {
    /// Queue a message for every observer without waiting
    fn send_all(&self, msg: &Message) {
        for (id, observer) in &self.observers {
            send_or_drop(*id, observer, msg.clone());
        }
    }
}

fn send_or_drop(id: Uuid, observer: &Observer, msg: Message) {
    match observer.tx.try_send(msg) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(observer_id = %id, addr = %observer.addr, "Observer queue full, dropping message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(observer_id = %id, "Observer writer gone");
        }
    }
}

/// Queue server handle
pub struct QueueServer {
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    source: Arc<dyn SnapshotSource>,
    shutdown_tx: broadcast::Sender<()>,
}

impl QueueServer {
    /// Bind and start serving `topic`
    pub async fn start(
        addr: SocketAddr,
        topic: impl Into<String>,
        source: Arc<dyn SnapshotSource>,
    ) -> Result<Self> {
        let topic = topic.into();
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, topic = %topic, "Queue server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(ServerState {
            topic,
            observers: HashMap::new(),
            sequence: 0,
        }));

        tokio::spawn(accept_loop(
            listener,
            state.clone(),
            source.clone(),
            shutdown_tx.clone(),
        ));
        tokio::spawn(heartbeat_task(state.clone(), shutdown_tx.subscribe()));

        Ok(QueueServer {
            addr: bound_addr,
            state,
            source,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Forward one ticket change to every observer, returning its sequence
    pub async fn publish(&self, kind: NetEventKind, ticket: NetTicket) -> u64 {
        let mut state = self.state.write().await;
        state.sequence += 1;
        let sequence = state.sequence;
        state.send_all(&Message::TicketChanged {
            sequence,
            kind,
            ticket,
        });
        sequence
    }

    /// Push a fresh full snapshot to every observer
    pub async fn push_snapshot(&self) -> Result<()> {
        let sequence = self.state.read().await.sequence;
        let tickets = load_snapshot(&self.source).await?;
        self.state
            .read()
            .await
            .send_all(&Message::Snapshot { sequence, tickets });
        Ok(())
    }

    /// Number of subscribed observers
    pub async fn observer_count(&self) -> usize {
        self.state.read().await.observers.len()
    }

    /// Tell observers we are going away, then stop all tasks
    pub async fn shutdown(&self) {
        self.state.read().await.send_all(&Message::ServerShutdown);
        let _ = self.shutdown_tx.send(());
        info!("Queue server shutdown initiated");
    }
}

async fn load_snapshot(source: &Arc<dyn SnapshotSource>) -> Result<Vec<NetTicket>> {
    let source = source.clone();
    tokio::task::spawn_blocking(move || source.snapshot())
        .await
        .map_err(|e| Error::Snapshot(e.to_string()))?
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<ServerState>>,
    source: Arc<dyn SnapshotSource>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            state.clone(),
                            source.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single observer connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    source: Arc<dyn SnapshotSource>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let (msg_tx, msg_rx) = mpsc::channel(OBSERVER_QUEUE_DEPTH);
    let observer_id = match handle_subscribe(&mut reader, addr, &state, &source, msg_tx.clone()).await {
        Ok(id) => id,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Subscribe failed");
            let reason = match e {
                Error::Rejected(reason) => reason,
                other => other.to_string(),
            };
            let _ = write_frame(&mut writer, &Message::SubscribeRejected { reason }).await;
            return;
        }
    };

    info!(addr = %addr, observer_id = %observer_id, "Observer subscribed");

    let writer_handle = tokio::spawn(writer_task(writer, msg_rx));

    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(msg) => handle_message(msg, observer_id, &msg_tx, &state, &source).await,
                    Err(Error::ConnectionClosed) => {
                        debug!(observer_id = %observer_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(observer_id = %observer_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    // Let the writer drain (ServerShutdown included) before dropping it
    state.write().await.observers.remove(&observer_id);
    drop(msg_tx);
    let _ = writer_handle.await;

    info!(observer_id = %observer_id, "Observer disconnected");
}

/// Validate the subscription and register the observer.
///
/// `Subscribed` carries the sequence read before the snapshot was loaded.
/// Anything published while loading leaves the observer behind the next
/// heartbeat, which makes it ask for a fresh snapshot.
async fn handle_subscribe(
    reader: &mut ReadHalf<TcpStream>,
    addr: SocketAddr,
    state: &Arc<RwLock<ServerState>>,
    source: &Arc<dyn SnapshotSource>,
    tx: mpsc::Sender<Message>,
) -> Result<Uuid> {
    let msg = read_frame(reader).await?;

    let Message::Subscribe { observer_id, topic } = msg else {
        return Err(Error::Protocol("Expected Subscribe".into()));
    };

    let sequence = {
        let s = state.read().await;
        if topic != s.topic {
            return Err(Error::Rejected(format!("Unknown topic '{}'", topic)));
        }
        s.sequence
    };

    let tickets = load_snapshot(source).await?;

    let mut s = state.write().await;
    if s.observers.len() >= MAX_OBSERVERS {
        return Err(Error::ServerFull);
    }
    if s.observers.contains_key(&observer_id) {
        return Err(Error::Rejected("Already subscribed".into()));
    }

    let observer = Observer { addr, tx };
    send_or_drop(
        observer_id,
        &observer,
        Message::Subscribed {
            topic,
            sequence,
            tickets,
        },
    );
    s.observers.insert(observer_id, observer);

    Ok(observer_id)
}

/// Writer task - sends queued messages to the observer
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Handle an incoming message from an observer
async fn handle_message(
    msg: Message,
    observer_id: Uuid,
    tx: &mpsc::Sender<Message>,
    state: &Arc<RwLock<ServerState>>,
    source: &Arc<dyn SnapshotSource>,
) {
    match msg {
        Message::Ping => {
            let _ = tx.try_send(Message::Pong);
        }
        Message::SnapshotRequest => {
            let sequence = state.read().await.sequence;
            match load_snapshot(source).await {
                Ok(tickets) => {
                    let _ = tx.try_send(Message::Snapshot { sequence, tickets });
                }
                Err(e) => {
                    warn!(observer_id = %observer_id, error = %e, "Snapshot failed");
                }
            }
        }
        _ => {
            debug!(observer_id = %observer_id, "Ignoring unexpected message type");
        }
    }
}

/// Heartbeat task - tells every observer the server is alive every 2s
async fn heartbeat_task(state: Arc<RwLock<ServerState>>, mut shutdown_rx: broadcast::Receiver<()>) {
    let interval = std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let s = state.read().await;
                s.send_all(&Message::Heartbeat {
                    timestamp: Utc::now(),
                    sequence: s.sequence,
                });
            }
            _ = shutdown_rx.recv() => {
                debug!("Heartbeat task shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NetStatus;

    struct EmptyQueue;

    impl SnapshotSource for EmptyQueue {
        fn snapshot(&self) -> Result<Vec<NetTicket>> {
            Ok(Vec::new())
        }
    }

    fn ticket(id: i64) -> NetTicket {
        NetTicket {
            id,
            status: NetStatus::Live,
            student_name: "Ada".to_string(),
            course: "PHYS 1250".to_string(),
            location: "Table 1".to_string(),
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn test_server_start() {
        let server = QueueServer::start(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            "queue",
            Arc::new(EmptyQueue),
        )
        .await
        .unwrap();

        assert!(server.addr().port() > 0);
        assert_eq!(server.observer_count().await, 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_sequence_advances_without_observers() {
        let server = QueueServer::start(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            "queue",
            Arc::new(EmptyQueue),
        )
        .await
        .unwrap();

        assert_eq!(server.publish(NetEventKind::Created, ticket(1)).await, 1);
        assert_eq!(server.publish(NetEventKind::Claimed, ticket(1)).await, 2);
        server.shutdown().await;
    }
}
