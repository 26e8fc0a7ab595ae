//! Socket transport for remote clients.
//!
//! Every TCP connection is one session. The client sends NDJSON
//! [`ClientFrame`]s; everything published to the session's destination is
//! pushed back as [`ServerFrame`]s. Closing the connection ends the session.

pub mod frame;

pub use frame::{ClientFrame, ServerFrame};

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::channel::QueueChannel;
use crate::launcher::Launcher;
use crate::router::Router;

/// Frames queued per client; a full queue holds back the output forwarder
/// while the session's backlog accumulates in the channel.
const FRAME_QUEUE: usize = 256;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accepts client connections and binds each to a session.
pub struct RelayServer<L> {
    router: Arc<Router<L>>,
    channel: Arc<QueueChannel>,
}

impl<L: Launcher> RelayServer<L> {
    /// `channel` must be the same bus the router publishes to.
    pub const fn new(router: Arc<Router<L>>, channel: Arc<QueueChannel>) -> Self {
        Self { router, channel }
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
        Ok(TcpListener::bind(addr).await?)
    }

    /// Serve until `shutdown` turns `true` or its sender is dropped.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        info!(addr = %listener.local_addr()?, "Relay server listening");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accept = listener.accept() => {
                    match accept {
                        Ok((stream, peer)) => {
                            tokio::spawn(handle_connection(
                                Arc::clone(&self.router),
                                Arc::clone(&self.channel),
                                stream,
                                peer,
                            ));
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
            }
        }

        info!("Relay server stopped");
        Ok(())
    }
}

async fn handle_connection<L: Launcher>(
    router: Arc<Router<L>>,
    channel: Arc<QueueChannel>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let session_key = uuid::Uuid::new_v4().to_string();
    let mut output = channel.subscribe(&router.destination(&session_key));
    let (reader, mut writer) = stream.into_split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(FRAME_QUEUE);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let line = match frame.to_line() {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize frame");
                    continue;
                }
            };
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                debug!(error = %e, "Client write failed");
                break;
            }
        }
    });

    let output_tx = frame_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(message) = output.recv().await {
            if output_tx
                .send(ServerFrame::from_message(&message))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    info!(session = %session_key, %peer, "Client connected");
    let _ = frame_tx
        .send(ServerFrame::Hello {
            session: session_key.clone(),
        })
        .await;

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(reply) = handle_line(&router, &session_key, &line).await
                    && frame_tx.send(reply).await.is_err()
                {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(session = %session_key, error = %e, "Client read failed");
                break;
            }
        }
    }

    router.disconnect(&session_key).await;
    let _ = forwarder.await;
    drop(frame_tx);
    let _ = writer_task.await;
    info!(session = %session_key, %peer, "Client disconnected");
}

/// Handle one client line; returns a frame to send back, if any.
async fn handle_line<L: Launcher>(
    router: &Router<L>,
    session_key: &str,
    line: &str,
) -> Option<ServerFrame> {
    if line.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<ClientFrame>(line) {
        Ok(ClientFrame::Run { line }) => match router.route(session_key, &line).await {
            Ok(routed) => {
                debug!(session = session_key, ?routed, "Message routed");
                None
            }
            Err(e) => {
                warn!(session = session_key, error = %e, "Failed to route message");
                Some(ServerFrame::Error {
                    message: e.to_string(),
                })
            }
        },
        Ok(ClientFrame::Ping) => Some(ServerFrame::Pong),
        Err(e) => Some(ServerFrame::Error {
            message: format!("Invalid frame: {e}"),
        }),
    }
}
