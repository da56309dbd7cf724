use crate::error::{Result, SwarmError};
use crate::identity::Credentials;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Going away — the disposition a session uses for its forced close
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Chat message echoed back on the stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatFrame {
    #[serde(rename = "senderId")]
    pub sender_id: String,
    pub text: String,
}

/// Best-effort graceful-shutdown hint sent before the forced close
pub fn leave_frame() -> String {
    serde_json::json!({ "event": "LEAVE" }).to_string()
}

/// Something observed on an open streaming connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A parsed chat echo
    Chat(ChatFrame),
    /// A text payload that is not a chat frame (presence updates and the
    /// like); surfaced for visibility, never fatal
    Other(String),
    /// The peer closed, or the connection dropped without a close frame
    Closed { code: Option<u16> },
}

/// One established streaming connection owned by one session
#[async_trait]
pub trait StreamConnection: Send {
    /// Next inbound event; resolves to [`StreamEvent::Closed`] exactly once
    /// at end of stream.
    async fn next_event(&mut self) -> StreamEvent;

    /// Send a text frame to the peer.
    async fn send_text(&mut self, payload: String) -> Result<()>;

    /// Close the connection with a disposition code.
    async fn close(&mut self, code: u16) -> Result<()>;
}

/// Factory for streaming connections — the transport collaborator boundary
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn StreamConnection>>;
}

/// WebSocket transport against `ws://{host}/ws`
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(ws_host: impl AsRef<str>) -> Self {
        Self {
            url: format!("ws://{}/ws", ws_host.as_ref()),
        }
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<Box<dyn StreamConnection>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SwarmError::Connection(e.to_string()))?;

        let cookie = HeaderValue::from_str(&credentials.cookie())
            .map_err(|e| SwarmError::Connection(e.to_string()))?;
        request.headers_mut().insert(header::COOKIE, cookie);

        // success is the switching-protocols handshake; anything else
        // surfaces as a connection error from the handshake itself
        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| SwarmError::Connection(e.to_string()))?;

        debug!(url = %self.url, status = %response.status(), "stream connected");
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn next_event(&mut self) -> StreamEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return match serde_json::from_str::<ChatFrame>(&text) {
                        Ok(frame) => StreamEvent::Chat(frame),
                        Err(_) => StreamEvent::Other(text.to_string()),
                    };
                }
                Some(Ok(Message::Close(frame))) => {
                    return StreamEvent::Closed {
                        code: frame.map(|f| u16::from(f.code)),
                    };
                }
                // ping/pong are answered by the library, binary is noise
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(error = %e, "stream errored");
                    return StreamEvent::Closed { code: None };
                }
                None => return StreamEvent::Closed { code: None },
            }
        }
    }

    async fn send_text(&mut self, payload: String) -> Result<()> {
        self.stream
            .send(Message::Text(payload.into()))
            .await
            .map_err(SwarmError::from)
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        self.stream.close(Some(frame)).await.map_err(SwarmError::from)
    }
}
