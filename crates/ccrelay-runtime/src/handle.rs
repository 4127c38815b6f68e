//! Cloneable front door to the coordinator task.

use ccrelay_core::EngineError;
use ccrelay_engine::{RecoveryOutcome, RecoveryRequest};
use tokio::sync::{mpsc, oneshot};

use crate::coordinator::{ControlMessage, InputOutcome, Reply};

#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<ControlMessage>,
}

impl EngineHandle {
    pub fn new(tx: mpsc::Sender<ControlMessage>) -> Self {
        Self { tx }
    }

    /// Type text into a window. A dead window is recovered first and the
    /// text replayed into its replacement.
    pub async fn send_input(
        &self,
        window_id: &str,
        text: &str,
    ) -> Result<InputOutcome, EngineError> {
        self.request(|reply| ControlMessage::SendInput {
            window_id: window_id.to_string(),
            text: text.to_string(),
            reply,
        })
        .await
    }

    pub async fn recover(&self, request: RecoveryRequest) -> Result<RecoveryOutcome, EngineError> {
        self.request(|reply| ControlMessage::Recover { request, reply })
            .await
    }

    pub async fn kill(&self, window_id: &str) -> Result<(), EngineError> {
        self.request(|reply| ControlMessage::Kill {
            window_id: window_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn unbind(&self, window_id: &str) -> Result<(), EngineError> {
        self.request(|reply| ControlMessage::Unbind {
            window_id: window_id.to_string(),
            reply,
        })
        .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ControlMessage,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| EngineError::transient("engine", "coordinator stopped"))?;
        rx.await
            .map_err(|_| EngineError::transient("engine", "coordinator dropped the request"))?
    }
}
