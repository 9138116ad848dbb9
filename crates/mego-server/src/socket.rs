//! WebSocket listener.
//!
//! Each accepted connection gets a reader loop feeding frames to the engine in
//! arrival order, and a writer task draining the session's outbound queue.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{ServerError, ServerResult};
use crate::heartbeat::spawn_liveness_sweep;
use crate::transport::{ChannelTransport, Outbound, Transport};

/// WebSocket server bound to the engine's configured address.
pub struct WsServer {
    engine: Engine,
    listener: TcpListener,
}

impl WsServer {
    /// Binds to `bind_addr` from the engine configuration.
    pub async fn bind(engine: Engine) -> ServerResult<Self> {
        let listener = TcpListener::bind(engine.config().bind_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            codec = ?engine.codec(),
            "WebSocket server listening"
        );
        Ok(Self { engine, listener })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runs the accept loop until the engine is closed.
    pub async fn run(self) -> ServerResult<()> {
        self.run_until_shutdown(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes or the engine is
    /// closed, then closes the engine.
    pub async fn run_until_shutdown<S>(self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()>,
    {
        let sweep = spawn_liveness_sweep(self.engine.clone());
        let mut closed = self.engine.shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Accepted connection");
                        let engine = self.engine.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(engine, stream).await {
                                warn!(%peer, error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = closed.changed() => break,
            }
        }

        self.engine.close().await;
        if let Some(sweep) = sweep {
            let _ = sweep.await;
        }
        info!("WebSocket server stopped");
        Ok(())
    }
}

/// Caps inbound messages at the largest request any method accepts.
fn websocket_config(engine: &Engine) -> WebSocketConfig {
    let limit = engine.frame_limit();
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(limit);
    config.max_frame_size = Some(limit);
    config
}

/// Performs the WebSocket handshake and serves one connection until it closes.
pub async fn serve_connection<S>(engine: Engine, stream: S) -> ServerResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let websocket =
        tokio_tungstenite::accept_async_with_config(stream, Some(websocket_config(&engine))).await?;
    let (mut sink, mut incoming) = websocket.split();

    let (transport, mut outbound) = ChannelTransport::new(engine.config().send_queue);
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let session_id = match engine.connect(Arc::clone(&transport)).await {
        Ok(session) => session.id().clone(),
        Err(e @ ServerError::SessionLimit { .. }) => {
            warn!(error = %e, "Rejecting connection");
            let frame = CloseFrame {
                code: CloseCode::Policy,
                reason: "too many sessions".into(),
            };
            sink.send(Message::Close(Some(frame))).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let binary = engine.codec().is_binary();
    let writer = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let message = match item {
                Outbound::Frame(bytes) if binary => Message::binary(bytes),
                Outbound::Frame(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => Message::text(text),
                    Err(e) => {
                        warn!(error = %e, "Dropping non UTF-8 text frame");
                        continue;
                    }
                },
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = sink.send(message).await {
                debug!(error = %e, "Write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = incoming.next().await {
        match message {
            Ok(Message::Text(text)) => {
                engine
                    .handle_frame(transport.as_ref(), session_id.as_str(), text.as_bytes())
                    .await
            }
            Ok(Message::Binary(data)) => {
                engine
                    .handle_frame(transport.as_ref(), session_id.as_str(), &data)
                    .await
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Read failed");
                break;
            }
        }
    }

    engine.disconnect(session_id.as_str()).await;
    transport.close();
    let _ = writer.await;
    Ok(())
}
