use crate::sfu::{ControlChannel, ControlError};
use async_trait::async_trait;
use tokio::sync::mpsc;
use webrelay_protocol::ServerMessage;

/// Control channel backed by the socket's writer task.
///
/// Messages are serialized here and queued; the writer task owns the
/// WebSocket sink, so sends from reconciliation passes and ICE callbacks
/// never interleave on the wire.
#[derive(Clone)]
pub struct WsControl {
    sender: mpsc::UnboundedSender<String>,
}

impl WsControl {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ControlChannel for WsControl {
    async fn send(&self, message: ServerMessage) -> Result<(), ControlError> {
        let json = message.encode()?;
        self.sender.send(json).map_err(|_| ControlError::Closed)
    }
}
