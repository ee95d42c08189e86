//! WebSocket JSON-RPC client with explicit connect/close and a retrying
//! call wrapper.
//!
//! Each successful `connect` spawns a background task that owns the socket
//! and multiplexes requests over it. The task exits when the socket drops;
//! the next `connect` (issued by the height poller) dials a fresh one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
use crate::retry::{RetryConfig, RetryPolicy};

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<JsonRpcResponse, TransportError>>>>>;

/// Command sent from callers to the background WS task.
enum WsCommand {
    Send {
        req: JsonRpcRequest,
        tx: oneshot::Sender<Result<JsonRpcResponse, TransportError>>,
    },
    Close,
}

/// An open channel to one endpoint.
struct Channel {
    endpoint: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
}

/// WebSocket JSON-RPC client.
pub struct WsRpcClient {
    channel: tokio::sync::Mutex<Option<Channel>>,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl WsRpcClient {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            channel: tokio::sync::Mutex::new(None),
            retry: RetryPolicy::new(retry),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a channel to `endpoint` (`host:port`), dialing `ws://{endpoint}/ws`.
    ///
    /// No-op when already connected to the same endpoint and the channel
    /// answers a ping. A stale channel is closed before dialing.
    pub async fn connect(&self, endpoint: &str) -> Result<(), TransportError> {
        let mut channel = self.channel.lock().await;

        if let Some(open) = channel.as_ref() {
            if open.endpoint == endpoint && self.ping_on(&open.cmd_tx).await.is_ok() {
                return Ok(());
            }
        }
        if let Some(stale) = channel.take() {
            let _ = stale.cmd_tx.send(WsCommand::Close);
        }

        let url = format!("ws://{endpoint}/ws");
        tracing::info!(url = %url, "connecting via WebSocket");
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        tokio::spawn(ws_task(url, ws_stream, cmd_rx));

        *channel = Some(Channel {
            endpoint: endpoint.to_string(),
            cmd_tx,
        });
        Ok(())
    }

    /// Close the channel, if any.
    pub async fn close(&self) {
        if let Some(open) = self.channel.lock().await.take() {
            tracing::info!(endpoint = %open.endpoint, "closing daemon channel");
            let _ = open.cmd_tx.send(WsCommand::Close);
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self.channel.lock().await.as_ref() {
            Some(open) => !open.cmd_tx.is_closed(),
            None => false,
        }
    }

    /// Invoke `method` with the retry policy. Daemon errors are kept as
    /// [`TransportError::Rpc`].
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.call_mapped(method, params, TransportError::Rpc).await
    }

    /// Like [`call`](Self::call), classifying daemon errors with `map_err`
    /// before the retry decision.
    pub async fn call_mapped<F>(
        &self,
        method: &str,
        params: Value,
        map_err: F,
    ) -> Result<Value, TransportError>
    where
        F: Fn(JsonRpcError) -> TransportError + Send + Sync,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match self.send_once(method, params.clone()).await {
                Ok(resp) => resp.into_result().map_err(&map_err),
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            method,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, error = %e, method, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, method: &str, params: Value) -> Result<JsonRpcResponse, TransportError> {
        let cmd_tx = match self.channel.lock().await.as_ref() {
            Some(open) => open.cmd_tx.clone(),
            None => return Err(TransportError::NotConnected),
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        request_on(&cmd_tx, JsonRpcRequest::new(id, method, params)).await
    }

    async fn ping_on(&self, cmd_tx: &mpsc::UnboundedSender<WsCommand>) -> Result<(), TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        request_on(cmd_tx, JsonRpcRequest::new(id, "DERO.Ping", Value::Null))
            .await?
            .into_result()
            .map(|_| ())
            .map_err(TransportError::Rpc)
    }
}

impl Default for WsRpcClient {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

async fn request_on(
    cmd_tx: &mpsc::UnboundedSender<WsCommand>,
    req: JsonRpcRequest,
) -> Result<JsonRpcResponse, TransportError> {
    let (tx, rx) = oneshot::channel();
    cmd_tx
        .send(WsCommand::Send { req, tx })
        .map_err(|_| TransportError::WebSocket("WS task closed".into()))?;
    rx.await
        .map_err(|_| TransportError::WebSocket("WS response dropped".into()))?
}

/// Background task that owns one WebSocket connection.
async fn ws_task(url: String, ws_stream: WsStream, mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>) {
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(WsCommand::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Some(WsCommand::Send { req, tx }) => {
                        let id = match &req.id { RpcId::Number(n) => *n, _ => 0 };
                        let msg = match serde_json::to_string(&req) {
                            Ok(msg) => msg,
                            Err(e) => {
                                let _ = tx.send(Err(TransportError::Deserialization(e)));
                                continue;
                            }
                        };
                        pending.lock().unwrap().insert(id, tx);
                        if let Err(e) = sink.send(Message::Text(msg.into())).await {
                            tracing::warn!(error = %e, "WS send failed");
                            break;
                        }
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WS receive error");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => handle_message(text.as_str(), &pending),
                    Some(Ok(Message::Close(_))) => break,
                    _ => {}
                }
            }
        }
    }

    // Dropping the senders fails every in-flight call.
    pending.lock().unwrap().clear();
    tracing::warn!(url = %url, "WS channel closed");
}

fn handle_message(text: &str, pending: &PendingMap) {
    let resp = match serde_json::from_str::<JsonRpcResponse>(text) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse WS message as JSON-RPC response");
            return;
        }
    };
    let id = match &resp.id {
        RpcId::Number(n) => *n,
        _ => return,
    };
    if let Some(tx) = pending.lock().unwrap().remove(&id) {
        let _ = tx.send(Ok(resp));
    }
}
