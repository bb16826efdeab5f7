use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::request::API_KEY_HEADER;
use super::state::TransportState;
use crate::config::ControllerConfig;
use crate::error::TransportError;
use crate::protocol::{PushMessage, Target};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of a push channel
#[async_trait::async_trait]
pub trait PushWriter: Send + Sync {
    /// Best-effort single write
    async fn send(&self, message: &PushMessage) -> Result<(), TransportError>;

    /// Close the channel, ignoring errors
    async fn close(&self);
}

/// Write half of a WebSocket push channel
pub struct WsWriter {
    sink: Mutex<SplitSink<WsStream, Message>>,
}

#[async_trait::async_trait]
impl PushWriter for WsWriter {
    async fn send(&self, message: &PushMessage) -> Result<(), TransportError> {
        let text = message.encode()?;
        self.sink.lock().await.send(Message::text(text)).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("Push channel close reported: {}", e);
        }
    }
}

/// Perform the upgrade handshake and split the connection
pub(crate) async fn dial(
    config: &ControllerConfig,
) -> Result<(WsWriter, SplitStream<WsStream>), TransportError> {
    let url = config.push_url()?;

    let mut request = url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", config.api_key))?);
    headers.insert(API_KEY_HEADER, HeaderValue::from_str(&config.api_key)?);

    let (stream, response) = match timeout(config.push_connect_timeout, connect_async(request)).await
    {
        Err(_) => return Err(TransportError::Timeout(config.push_connect_timeout)),
        Ok(Err(WsError::Http(response))) => {
            let body = response
                .body()
                .as_ref()
                .map(|body| String::from_utf8_lossy(body).into_owned())
                .unwrap_or_default();
            return Err(TransportError::Handshake { status: response.status().as_u16(), body });
        }
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(connected)) => connected,
    };

    debug!(status = response.status().as_u16(), "Push handshake complete");

    let (sink, stream) = stream.split();
    Ok((WsWriter { sink: Mutex::new(sink) }, stream))
}

/// Read push frames until `cancel` fires or the connection fails, then
/// release the connection belonging to `generation`
pub(crate) async fn receive_loop<S>(
    mut reader: S,
    state: Arc<RwLock<TransportState>>,
    updates: mpsc::Sender<Vec<Target>>,
    cancel: CancellationToken,
    generation: u64,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin + Send,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Push receive loop cancelled");
                break;
            }
            frame = reader.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Discarding non UTF-8 binary push frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "Controller closed the push channel");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!("Push channel read error: {}", e);
                break;
            }
            None => {
                info!("Push channel stream ended");
                break;
            }
        };

        handle_frame(&text, &state, &updates).await;
    }

    let writer = state.write().await.detach_generation(generation);
    if let Some(writer) = writer {
        writer.close().await;
        warn!("Push channel disconnected, falling back to polling");
    }
}

async fn handle_frame(
    text: &str,
    state: &RwLock<TransportState>,
    updates: &mpsc::Sender<Vec<Target>>,
) {
    let message = match PushMessage::decode(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Discarding malformed push message: {}", e);
            return;
        }
    };

    match message {
        PushMessage::TargetsUpdated(targets) => {
            deliver_update(updates, targets);
        }
        PushMessage::Ping => {
            let writer = state.read().await.writer();
            match writer {
                Some(writer) => {
                    if let Err(e) = writer.send(&PushMessage::Pong).await {
                        warn!("Failed to answer push ping: {}", e);
                    }
                }
                None => debug!("Push ping received after disconnect, not answering"),
            }
        }
        PushMessage::CheckResultAck(data) => debug!(?data, "Check result acknowledged"),
        PushMessage::Pong => debug!("Push pong received"),
        PushMessage::Error(message) => warn!(%message, "Controller reported an error"),
        PushMessage::CheckResult(_) | PushMessage::Unknown(_) => {
            info!(kind = message.kind(), "Ignoring unknown push message type");
        }
    }
}

/// Queue a pushed target list without ever blocking the receive loop.
/// Returns whether the update was queued.
pub(crate) fn deliver_update(updates: &mpsc::Sender<Vec<Target>>, targets: Vec<Target>) -> bool {
    let count = targets.len();
    match updates.try_send(targets) {
        Ok(()) => {
            info!(count, "Received target update via push channel");
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(count, "Update queue full, dropping target update");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(count, "Update queue closed, dropping target update");
            false
        }
    }
}
