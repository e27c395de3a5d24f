pub mod actor;
pub mod handler;
pub mod protocol;
pub mod transport;

use tokio::sync::mpsc;

pub use actor::Heartbeat;
pub use transport::WsTransport;

/// Sender half of a WebSocket connection's outbound queue.
/// The transport clones it to push events to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
