use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{WebSocketStream, accept_async, connect_async};
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::hub::Hub;
use crate::socket::{Socket, SocketKind};
use crate::utils::{HubError, HubResult};

pub async fn bind(addr: &str) -> HubResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| HubError::Internal(format!("cannot bind {addr}: {e}")))
}

/// Accept connections from clients on `addr` until the hub stops.
pub async fn start_client_listener(addr: &str, hub: Arc<Hub>) -> HubResult<()> {
    let listener = bind(addr).await?;
    info!("client endpoint listening on ws://{}", addr);
    serve(listener, hub, SocketKind::Client).await;
    Ok(())
}

/// Accept connections from peer servers on `addr` until the hub stops.
pub async fn start_server_listener(addr: &str, hub: Arc<Hub>) -> HubResult<()> {
    let listener = bind(addr).await?;
    info!("server endpoint listening on ws://{}", addr);
    serve(listener, hub, SocketKind::Server).await;
    Ok(())
}

/// Accept loop over an already bound listener.
pub async fn serve(listener: TcpListener, hub: Arc<Hub>, kind: SocketKind) {
    let mut stop = hub.stop_signal();

    loop {
        let (stream, remote) = tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept {} connection: {}", kind, e);
                    continue;
                }
            },
        };

        let hub = hub.clone();
        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(%remote, "WebSocket handshake error: {}", e);
                    return;
                }
            };

            let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
            let socket = Socket::new(kind, tx);
            debug!(socket = %socket.id, %remote, "connection accepted");
            hub.register(socket.clone());
            handle_connection(ws_stream, socket, rx, hub).await;
        });
    }

    info!("{} listener stopped", kind);
}

/// Dial a peer server, greet it and ask for its rumor state.
pub async fn connect_to_server(url: &str, hub: Arc<Hub>) -> HubResult<()> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| HubError::Internal(format!("cannot connect to {url}: {e}")))?;

    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let socket = Socket::new(SocketKind::Server, tx);
    info!(socket = %socket.id, "connected to server {}", url);

    hub.notify_new_server(socket.clone())?;
    tokio::spawn(handle_connection(ws_stream, socket, rx, hub));
    Ok(())
}

/// Pump frames between one WebSocket and the hub.
///
/// The write task drains the socket's outbound queue; the read loop feeds text
/// frames to the hub. The hub hears about the close only after both ended.
async fn handle_connection<S>(
    ws_stream: WebSocketStream<S>,
    socket: Socket,
    mut rx: mpsc::UnboundedReceiver<WsMessage>,
    hub: Arc<Hub>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let socket_id = socket.id.clone();
    let (done_tx, mut done_rx) = oneshot::channel::<()>();

    // Subscriptions keep clones of the socket, so the outbound queue never
    // closes on its own; the read side tells the writer when to stop.
    let writer_id = socket_id.clone();
    let writer = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => msg,
                _ = &mut done_rx => None,
            };
            let Some(msg) = msg else { break };
            if let Err(e) = ws_sender.send(msg).await {
                debug!(socket = %writer_id, "failed to send frame: {}", e);
                return;
            }
        }
        while let Ok(msg) = rx.try_recv() {
            if ws_sender.send(msg).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(frame) = ws_receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(socket = %socket_id, "read error: {}", e);
                break;
            }
        };

        match frame {
            WsMessage::Text(text) => {
                if let Err(e) = hub.receive(socket.clone(), text.as_str().to_owned()).await {
                    warn!(socket = %socket_id, "dropping frame: {}", e);
                    break;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    let _ = done_tx.send(());
    if let Err(e) = writer.await {
        error!(socket = %socket_id, "write task failed: {}", e);
    }

    if hub.closed_sender().send(socket_id.clone()).is_err() {
        debug!(socket = %socket_id, "hub no longer tracks closed sockets");
    }
    info!(socket = %socket_id, "disconnected");
}
