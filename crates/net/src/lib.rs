//! Wormhole Network Library
//!
//! Provides TCP-based fan-out of ticket changes to live queue displays.
//!
//! # Architecture
//!
//! - **Server**: Run by the wormhole service, accepts observer connections
//! - **Observer**: A queue display or dashboard following one topic
//! - **Protocol**: Length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! // Service starts a server
//! let server = QueueServer::start(addr, "queue", snapshot_source).await?;
//! server.publish(NetEventKind::Created, ticket).await;
//!
//! // Display connects
//! let mut observer = QueueObserver::connect(addr, observer_id, "queue").await?;
//! while let Some(event) = observer.next_event().await {
//!     match event {
//!         ObserverEvent::TicketChanged { ticket, .. } => { /* update row */ }
//!         ObserverEvent::Snapshot { tickets, .. } => { /* replace all rows */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::{ConnectionState, ObserverEvent, QueueObserver};
pub use error::{Error, Result};
pub use protocol::{Message, NetEventKind, NetStatus, NetTicket};
pub use server::{QueueServer, SnapshotSource};

/// Default port for the live queue server
pub const DEFAULT_PORT: u16 = 7341;
