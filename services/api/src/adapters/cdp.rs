//! services/api/src/adapters/cdp.rs
//!
//! A minimal Chrome DevTools Protocol client bound to a single page target.
//!
//! Commands are correlated with their responses by id; everything without an id
//! is an event and is forwarded, in arrival order, to the channel returned by
//! `CdpConnection::connect`. When the socket goes away every in-flight command
//! fails with `CdpError::SessionClosed` and the event channel closes.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use schedule_rpa_core::ports::PortError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, CdpError>>>>>;

//=========================================================================================
// Errors
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum CdpError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No browser answered on the debugging endpoint.
    #[error("Chrome not available at {0}")]
    ChromeNotAvailable(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("CDP error: {message} (code: {code})")]
    Protocol { code: i64, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("JavaScript error: {0}")]
    JavaScript(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for CdpError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CdpError::WebSocket(e.to_string())
    }
}

impl From<reqwest::Error> for CdpError {
    fn from(e: reqwest::Error) -> Self {
        CdpError::Http(e.to_string())
    }
}

/// Collapses protocol failures into the port taxonomy the core understands.
impl From<CdpError> for PortError {
    fn from(e: CdpError) -> Self {
        match e {
            CdpError::SessionClosed
            | CdpError::WebSocket(_)
            | CdpError::ConnectionFailed(_)
            | CdpError::ChromeNotAvailable(_) => PortError::ActorLost(e.to_string()),
            CdpError::Timeout(message) => PortError::Timeout(message),
            CdpError::ElementNotFound(message) => PortError::NotFound(message),
            other => PortError::Unexpected(other.to_string()),
        }
    }
}

//=========================================================================================
// Wire types
//=========================================================================================

#[derive(Debug, Serialize)]
struct CdpRequest<'a> {
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CdpMessage {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<CdpErrorBody>,
    method: Option<String>,
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CdpErrorBody {
    code: i64,
    message: String,
}

/// An unsolicited protocol notification, e.g. `Network.responseReceived`.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

/// `GET /json/version` on the debugging endpoint. Chrome uses PascalCase here.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// One entry of `GET /json/list` or the answer of `PUT /json/new`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub url: String,
    pub web_socket_debugger_url: Option<String>,
}

//=========================================================================================
// Connection
//=========================================================================================

pub struct CdpConnection {
    ws_tx: tokio::sync::Mutex<WsSink>,
    request_id: AtomicU64,
    pending: Pending,
    closed: Arc<AtomicBool>,
    call_timeout: Duration,
    recv_task: JoinHandle<()>,
}

impl CdpConnection {
    /// Connects to a page target's `webSocketDebuggerUrl`.
    pub async fn connect(
        ws_url: &str,
        call_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CdpEvent>), CdpError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| CdpError::ConnectionFailed(format!("WebSocket {}: {}", ws_url, e)))?;
        let (ws_sink, ws_source) = ws_stream.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let recv_task = {
            let pending = pending.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                receive_loop(ws_source, &pending, event_tx).await;
                closed.store(true, Ordering::SeqCst);
                // Dropping the senders fails every in-flight call with SessionClosed.
                pending.lock().clear();
            })
        };

        debug!(url = %ws_url, "CDP connection established.");
        Ok((
            Self {
                ws_tx: tokio::sync::Mutex::new(ws_sink),
                request_id: AtomicU64::new(1),
                pending,
                closed,
                call_timeout,
                recv_task,
            },
            event_rx,
        ))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends a command and waits for its response.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CdpError> {
        if self.is_closed() {
            return Err(CdpError::SessionClosed);
        }
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&CdpRequest { id, method, params })?;
        trace!("CDP send: {}", json);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let sent = {
            let mut ws = self.ws_tx.lock().await;
            ws.send(Message::Text(json.into())).await
        };
        if let Err(e) = sent {
            self.pending.lock().remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::SessionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(CdpError::Timeout(format!("{} got no response", method)))
            }
        }
    }

    /// Closes the socket. Pending and future calls fail with `SessionClosed`.
    pub async fn shutdown(&self) {
        let mut ws = self.ws_tx.lock().await;
        if let Err(e) = ws.close().await {
            debug!(error = %e, "CDP socket close failed.");
        }
        drop(ws);
        self.recv_task.abort();
        self.closed.store(true, Ordering::SeqCst);
        self.pending.lock().clear();
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn receive_loop(
    mut ws_source: WsSource,
    pending: &Pending,
    events: mpsc::UnboundedSender<CdpEvent>,
) {
    while let Some(msg) = ws_source.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                trace!("CDP recv: {}", text);
                let message = match serde_json::from_str::<CdpMessage>(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "Failed to parse CDP message.");
                        continue;
                    }
                };
                if let Some(id) = message.id {
                    let Some(tx) = pending.lock().remove(&id) else {
                        continue;
                    };
                    let result = match message.error {
                        Some(error) => Err(CdpError::Protocol {
                            code: error.code,
                            message: error.message,
                        }),
                        None => Ok(message.result.unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(result);
                } else if let Some(method) = message.method {
                    let event = CdpEvent {
                        method,
                        params: message.params.unwrap_or(Value::Null),
                    };
                    if events.send(event).is_err() {
                        trace!("CDP event dropped, no listener.");
                    }
                }
            }
            Ok(Message::Close(_)) => {
                debug!("CDP socket closed by the browser.");
                break;
            }
            Err(e) => {
                warn!(error = %e, "CDP socket error.");
                break;
            }
            _ => {}
        }
    }
}
