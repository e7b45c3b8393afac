//! TCP transport: accept loop, outbound dials, one read loop and one writer
//! task per connection.
//!
//! The live-connection map is the single owner of every open link. Removal
//! goes through [`ConnectionManager::remove`], whose map delete makes
//! close-time cleanup exactly-once even when the reader and writer of one
//! connection fail concurrently.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ferry_core::wire::{encode_frame, FrameDecoder, FrameEncodeError};
use ferry_core::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::node::Node;

/// Identifier of one live connection.
pub type ConnId = u64;

/// Sending half of a live connection. Frames pushed here are written to the
/// socket by that connection's writer task, in order.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub addr: SocketAddr,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ConnectionHandle {
    /// Queue one frame. `false` means the connection is gone; the caller
    /// should abort whatever stream of frames it was producing.
    pub fn send_frame(&self, frame: Vec<u8>) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// Owns the set of live peer links for one node.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<ConnId, ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn get(&self, id: ConnId) -> Option<ConnectionHandle> {
        self.connections.lock().await.get(&id).cloned()
    }

    /// Serialize once, send to every live connection. A connection whose
    /// writer is gone is pruned; the broadcast continues. Returns how many
    /// connections the frame reached.
    pub async fn broadcast(&self, msg: &Message) -> Result<usize, FrameEncodeError> {
        let frame = encode_frame(msg)?;
        let mut conns = self.connections.lock().await;
        let dead: Vec<ConnId> = conns
            .iter()
            .filter(|(_, handle)| !handle.send_frame(frame.clone()))
            .map(|(&id, _)| id)
            .collect();
        for id in dead {
            if let Some(handle) = conns.remove(&id) {
                debug!(addr = %handle.addr, "pruned dead connection during broadcast");
            }
        }
        Ok(conns.len())
    }

    async fn register(&self, addr: SocketAddr, tx: mpsc::UnboundedSender<Vec<u8>>) -> ConnId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .lock()
            .await
            .insert(id, ConnectionHandle { addr, tx });
        id
    }

    /// Remove a connection from the live set. Returns `true` only for the
    /// caller that actually removed it.
    async fn remove(&self, id: ConnId) -> bool {
        self.connections.lock().await.remove(&id).is_some()
    }
}

/// Bind `addr` and accept indefinitely. Bind failure is fatal at startup and
/// surfaces to the caller; the accept loop itself runs detached.
pub async fn listen(node: &Arc<Node>, addr: &str) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let node = node.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "accepted connection");
                    if let Err(e) = spawn_connection(&node, stream).await {
                        warn!(%addr, error = %e, "failed to start connection");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "accept failed, stopping listener");
                    break;
                }
            }
        }
    });
    Ok(local)
}

/// Dial a peer and add the connection to the live set. Failure surfaces to
/// the caller and leaves the node untouched.
pub async fn connect(node: &Arc<Node>, addr: &str) -> io::Result<ConnId> {
    let stream = TcpStream::connect(addr).await?;
    let id = spawn_connection(node, stream).await?;
    info!(%addr, "connected to peer");
    Ok(id)
}

/// Register the stream and start its writer task and read loop.
async fn spawn_connection(node: &Arc<Node>, stream: TcpStream) -> io::Result<ConnId> {
    let addr = stream.peer_addr()?;
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let id = node.connections.register(addr, tx).await;

    let writer_node = node.clone();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
        if writer_node.connections.remove(id).await {
            info!(%addr, "connection closed (write failure)");
        }
    });

    let read_node = node.clone();
    tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 8192];
        'conn: loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break 'conn,
                Ok(n) => n,
            };
            decoder.extend(&buf[..n]);
            loop {
                match decoder.next_frame() {
                    Ok(Some(msg)) => read_node.handle_message(id, msg).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%addr, error = %e, "malformed frame, dropping connection");
                        break 'conn;
                    }
                }
            }
        }
        if read_node.connections.remove(id).await {
            info!(%addr, "connection closed");
        }
    });

    Ok(id)
}
