//! Client for the control API (used by the CLI and tests).

use crate::control::{ControlRequest, ControlResponse};
use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::sync::Mutex;
use zeromq::{Socket, SocketRecv, SocketSend};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REQ-socket client for the orchestrator's control endpoint. One in-flight
/// request at a time, as REQ/REP demands.
pub struct ControlClient {
    socket: Mutex<zeromq::ReqSocket>,
    addr: String,
}

impl ControlClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let mut socket = zeromq::ReqSocket::new();
        socket
            .connect(addr)
            .await
            .with_context(|| format!("Failed to connect control socket to {addr}"))?;
        Ok(Self {
            socket: Mutex::new(socket),
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// One request/response round trip with a timeout.
    pub async fn request(&self, request: &ControlRequest) -> Result<ControlResponse> {
        let payload = serde_json::to_vec(request).context("Failed to encode control request")?;

        let mut socket = self.socket.lock().await;
        tokio::time::timeout(REQUEST_TIMEOUT, socket.send(payload.into()))
            .await
            .with_context(|| format!("Control request to {} timed out (send)", self.addr))?
            .context("Control send failed")?;

        let reply = tokio::time::timeout(REQUEST_TIMEOUT, socket.recv())
            .await
            .with_context(|| format!("Control request to {} timed out (recv)", self.addr))?
            .context("Control recv failed")?;
        drop(socket);

        let bytes: Vec<u8> = reply
            .into_vec()
            .first()
            .map(|frame| frame.to_vec())
            .unwrap_or_default();
        let response: ControlResponse =
            serde_json::from_slice(&bytes).context("Failed to decode control response")?;

        if let ControlResponse::Error { kind, message } = &response {
            bail!("{kind}: {message}");
        }
        Ok(response)
    }
}
