//! TCP client for following a live queue

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Message, NetEventKind, NetTicket};

/// Server is considered dead if no heartbeat for this many milliseconds
const SERVER_DEAD_TIMEOUT_MS: u64 = 6000;

/// How often the watchdog looks at the last heartbeat
const WATCHDOG_INTERVAL_MS: u64 = 1000;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Event received from the queue server
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    /// Subscription accepted, with the open tickets at that moment
    Subscribed {
        sequence: u64,
        tickets: Vec<NetTicket>,
    },
    /// Subscription was rejected
    Rejected { reason: String },
    /// A ticket changed
    TicketChanged {
        sequence: u64,
        kind: NetEventKind,
        ticket: NetTicket,
    },
    /// Full open-ticket list; replaces whatever the observer holds
    Snapshot {
        sequence: u64,
        tickets: Vec<NetTicket>,
    },
    /// No heartbeat for 6s
    ServerDead,
    /// Server is shutting down
    ServerShutdown,
    /// Connection lost
    Disconnected,
}

/// Observer handle for a live queue
pub struct QueueObserver {
    state: Arc<RwLock<ObserverState>>,
    event_rx: mpsc::Receiver<ObserverEvent>,
    cmd_tx: mpsc::Sender<ObserverCommand>,
}

struct ObserverState {
    connection: ConnectionState,
    last_heartbeat: Instant,
    /// Highest sequence the observer has applied
    sequence: u64,
}

enum ObserverCommand {
    Send(Message),
    Disconnect,
}

impl QueueObserver {
    /// Connect to a queue server and subscribe to `topic`
    pub async fn connect(addr: SocketAddr, observer_id: Uuid, topic: impl Into<String>) -> Result<Self> {
        let topic = topic.into();
        info!(addr = %addr, topic = %topic, "Connecting to queue server");

        let stream = TcpStream::connect(addr).await?;
        let (reader, mut writer) = tokio::io::split(stream);

        write_frame(&mut writer, &Message::Subscribe { observer_id, topic }).await?;

        let state = Arc::new(RwLock::new(ObserverState {
            connection: ConnectionState::Connecting,
            last_heartbeat: Instant::now(),
            sequence: 0,
        }));

        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        tokio::spawn(connection_task(
            reader,
            writer,
            state.clone(),
            event_tx,
            cmd_rx,
        ));

        Ok(QueueObserver {
            state,
            event_rx,
            cmd_tx,
        })
    }

    /// Get the next event
    pub async fn next_event(&mut self) -> Option<ObserverEvent> {
        self.event_rx.recv().await
    }

    /// Ask for a full snapshot (the reconciliation poll)
    pub async fn request_snapshot(&self) -> Result<()> {
        self.send(Message::SnapshotRequest).await
    }

    /// Send a ping
    pub async fn ping(&self) -> Result<()> {
        self.send(Message::Ping).await
    }

    async fn send(&self, msg: Message) -> Result<()> {
        self.cmd_tx
            .send(ObserverCommand::Send(msg))
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ObserverCommand::Disconnect).await;
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.connection
    }

    /// Highest sequence seen so far
    pub async fn sequence(&self) -> u64 {
        self.state.read().await.sequence
    }
}

/// Forward frames from the socket so the main loop never cancels a half-read frame
async fn reader_task(mut reader: ReadHalf<TcpStream>, tx: mpsc::Sender<Result<Message>>) {
    loop {
        let result = read_frame(&mut reader).await;
        let done = result.is_err();
        if tx.send(result).await.is_err() || done {
            break;
        }
    }
}

/// Main connection task
async fn connection_task(
    mut reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    state: Arc<RwLock<ObserverState>>,
    event_tx: mpsc::Sender<ObserverEvent>,
    mut cmd_rx: mpsc::Receiver<ObserverCommand>,
) {
    // Wait for subscription response
    match read_frame(&mut reader).await {
        Ok(Message::Subscribed {
            topic,
            sequence,
            tickets,
        }) => {
            {
                let mut s = state.write().await;
                s.connection = ConnectionState::Connected;
                s.sequence = sequence;
                s.last_heartbeat = Instant::now();
            }
            info!(topic = %topic, open = tickets.len(), "Subscribed to queue");
            let _ = event_tx
                .send(ObserverEvent::Subscribed { sequence, tickets })
                .await;
        }
        Ok(Message::SubscribeRejected { reason }) => {
            state.write().await.connection = ConnectionState::Disconnected;
            warn!(reason = %reason, "Subscription rejected");
            let _ = event_tx.send(ObserverEvent::Rejected { reason }).await;
            return;
        }
        Ok(_) => {
            warn!("Unexpected first message");
            state.write().await.connection = ConnectionState::Disconnected;
            let _ = event_tx.send(ObserverEvent::Disconnected).await;
            return;
        }
        Err(e) => {
            error!(error = %e, "Failed to read subscription response");
            state.write().await.connection = ConnectionState::Disconnected;
            let _ = event_tx.send(ObserverEvent::Disconnected).await;
            return;
        }
    }

    let (frame_tx, mut frame_rx) = mpsc::channel(64);
    let reader_handle = tokio::spawn(reader_task(reader, frame_tx));

    let mut watchdog = tokio::time::interval(Duration::from_millis(WATCHDOG_INTERVAL_MS));
    let mut dead_emitted = false;

    loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                match frame {
                    Some(Ok(msg)) => {
                        let resync = handle_server_message(msg, &state, &event_tx).await;
                        if resync {
                            if let Err(e) = write_frame(&mut writer, &Message::SnapshotRequest).await {
                                warn!(error = %e, "Write error");
                                break;
                            }
                        }
                    }
                    Some(Err(Error::ConnectionClosed)) | None => {
                        debug!("Server closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ObserverCommand::Send(msg)) => {
                        if let Err(e) = write_frame(&mut writer, &msg).await {
                            warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Some(ObserverCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }

            _ = watchdog.tick() => {
                let elapsed = state.read().await.last_heartbeat.elapsed();
                if elapsed > Duration::from_millis(SERVER_DEAD_TIMEOUT_MS) {
                    if !dead_emitted {
                        warn!(elapsed_ms = elapsed.as_millis() as u64, "Queue server appears dead");
                        dead_emitted = true;
                        let _ = event_tx.send(ObserverEvent::ServerDead).await;
                    }
                } else {
                    dead_emitted = false;
                }
            }
        }
    }

    reader_handle.abort();
    state.write().await.connection = ConnectionState::Disconnected;
    let _ = event_tx.send(ObserverEvent::Disconnected).await;
    info!("Disconnected from queue server");
}

/// Handle a message from the server.
///
/// Returns true when the observer has fallen behind and should resync.
async fn handle_server_message(
    msg: Message,
    state: &Arc<RwLock<ObserverState>>,
    event_tx: &mpsc::Sender<ObserverEvent>,
) -> bool {
    match msg {
        Message::TicketChanged {
            sequence,
            kind,
            ticket,
        } => {
            let gap = {
                let mut s = state.write().await;
                let gap = sequence > s.sequence + 1;
                s.sequence = s.sequence.max(sequence);
                gap
            };
            if gap {
                debug!(sequence, "Missed queue events, requesting snapshot");
            }
            let _ = event_tx
                .send(ObserverEvent::TicketChanged {
                    sequence,
                    kind,
                    ticket,
                })
                .await;
            gap
        }
        Message::Snapshot { sequence, tickets } => {
            {
                let mut s = state.write().await;
                s.sequence = s.sequence.max(sequence);
            }
            let _ = event_tx
                .send(ObserverEvent::Snapshot { sequence, tickets })
                .await;
            false
        }
        Message::Heartbeat { sequence, .. } => {
            let mut s = state.write().await;
            s.last_heartbeat = Instant::now();
            if sequence > s.sequence {
                debug!(sequence, seen = s.sequence, "Heartbeat ahead of us, requesting snapshot");
                s.sequence = sequence;
                return true;
            }
            false
        }
        Message::ServerShutdown => {
            let _ = event_tx.send(ObserverEvent::ServerShutdown).await;
            false
        }
        Message::Pong => {
            state.write().await.last_heartbeat = Instant::now();
            debug!("Received pong");
            false
        }
        _ => {
            debug!("Ignoring unexpected message");
            false
        }
    }
}
