//! Peer node: identity, storage, live connections, file registry, and the
//! transfer trackers for in-flight downloads.
//!
//! The registry and tracker locks are never held at the same time. Block
//! persistence happens under the tracker lock so a recorded index always
//! has its payload on disk.

use std::collections::{BTreeSet, HashMap};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::Arc;

use ferry_core::wire::{encode_frame, FrameEncodeError};
use ferry_core::{
    chunk, integrity, BlockOutcome, FileDigest, Message, PeerId, PeerIdentity, TransferState,
    TransferStatus, BLOCK_SIZE,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::storage::StorageArea;
use crate::transport::{self, ConnId, ConnectionHandle, ConnectionManager};

/// One peer node: the aggregate the daemon runs.
pub struct Node {
    identity: PeerIdentity,
    storage: StorageArea,
    pub(crate) connections: ConnectionManager,
    /// Names of fully present, servable files.
    registry: Mutex<BTreeSet<String>>,
    /// In-flight (and terminal) transfers, keyed by file name.
    transfers: Mutex<HashMap<String, TransferState>>,
}

impl Node {
    /// Build a node over an opened storage area. The registry is seeded from
    /// the files already present.
    pub fn new(identity: PeerIdentity, storage: StorageArea) -> io::Result<Arc<Self>> {
        let seeded: BTreeSet<String> = storage.list_files()?.into_iter().collect();
        Ok(Arc::new(Self {
            identity,
            storage,
            connections: ConnectionManager::new(),
            registry: Mutex::new(seeded),
            transfers: Mutex::new(HashMap::new()),
        }))
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn storage(&self) -> &StorageArea {
        &self.storage
    }

    /// Bind and start accepting. Returns the bound address.
    pub async fn listen(self: &Arc<Self>, addr: &str) -> io::Result<SocketAddr> {
        transport::listen(self, addr).await
    }

    /// Dial a peer and add the link to the live set.
    pub async fn connect(self: &Arc<Self>, addr: &str) -> io::Result<ConnId> {
        transport::connect(self, addr).await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.count().await
    }

    /// Servable file names, sorted.
    pub async fn local_files(&self) -> Vec<String> {
        self.registry.lock().await.iter().cloned().collect()
    }

    /// File names with a transfer tracker, in-flight or terminal.
    pub async fn active_transfers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transfers.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn transfer_status(&self, file_name: &str) -> Option<TransferStatus> {
        self.transfers
            .lock()
            .await
            .get(file_name)
            .map(TransferState::status)
    }

    /// Ask every connected peer for `file_name`. Returns how many connections
    /// the request reached; zero connections is a no-op.
    pub async fn request_file(&self, file_name: &str) -> Result<usize, FrameEncodeError> {
        let msg = Message::RequestFile {
            file_name: file_name.to_string(),
            requester_id: self.identity.id.clone(),
        };
        let reached = self.connections.broadcast(&msg).await?;
        info!(%file_name, reached, "requested file");
        Ok(reached)
    }

    /// Dispatch one decoded inbound message. Called by each connection's
    /// read loop, in arrival order for that connection.
    pub(crate) async fn handle_message(self: &Arc<Self>, conn_id: ConnId, msg: Message) {
        match msg {
            Message::RequestFile {
                file_name,
                requester_id,
            } => self.on_request_file(conn_id, file_name, requester_id).await,
            Message::FileMeta {
                file_name,
                size_bytes,
                checksum,
                sender_id,
                requester_id,
            } => {
                if requester_id != self.identity.id {
                    debug!(%file_name, %requester_id, "meta addressed to another requester, dropping");
                    return;
                }
                let digest = FileDigest {
                    size_bytes,
                    checksum,
                };
                self.on_file_meta(file_name, digest, sender_id).await;
            }
            Message::SendBlock {
                file_name,
                block_index,
                total_blocks,
                payload,
                sender_id,
                requester_id,
                ..
            } => {
                if requester_id != self.identity.id {
                    debug!(%file_name, %requester_id, "block addressed to another requester, dropping");
                    return;
                }
                self.on_send_block(file_name, block_index, total_blocks, payload, sender_id)
                    .await;
            }
        }
    }

    /// A peer asked for a file. Serve it on the same connection when we hold
    /// it; otherwise silently ignore (the protocol has no negative ack).
    async fn on_request_file(self: &Arc<Self>, conn_id: ConnId, file_name: String, requester_id: PeerId) {
        if !self.registry.lock().await.contains(&file_name) {
            debug!(%file_name, %requester_id, "requested file not held, ignoring");
            return;
        }
        let Some(handle) = self.connections.get(conn_id).await else {
            return;
        };
        let node = self.clone();
        tokio::spawn(async move {
            node.serve_file(handle, file_name, requester_id).await;
        });
    }

    /// Send pipeline: one FileMeta, then every block in ascending index
    /// order. A dead connection aborts the remaining sends; blocks already
    /// queued are not retracted.
    async fn serve_file(&self, handle: ConnectionHandle, file_name: String, requester_id: PeerId) {
        let digest = match self
            .storage
            .open_file(&file_name)
            .and_then(integrity::compute_meta)
        {
            Ok(d) => d,
            Err(e) => {
                warn!(%file_name, error = %e, "cannot read file for serving");
                return;
            }
        };
        let meta = Message::FileMeta {
            file_name: file_name.clone(),
            size_bytes: digest.size_bytes,
            checksum: digest.checksum,
            sender_id: self.identity.id.clone(),
            requester_id: requester_id.clone(),
        };
        if !self.send_or_abort(&handle, &meta, &file_name) {
            return;
        }

        let total_blocks = chunk::block_count(digest.size_bytes, BLOCK_SIZE);
        let mut file = match self.storage.open_file(&file_name) {
            Ok(f) => f,
            Err(e) => {
                warn!(%file_name, error = %e, "cannot reopen file for serving");
                return;
            }
        };
        for (index, (start, end)) in chunk::block_spans(digest.size_bytes, BLOCK_SIZE)
            .into_iter()
            .enumerate()
        {
            let mut payload = vec![0u8; (end - start) as usize];
            if let Err(e) = file.read_exact(&mut payload) {
                warn!(%file_name, index, error = %e, "short read while chunking, aborting send");
                return;
            }
            let block = Message::SendBlock {
                file_name: file_name.clone(),
                block_name: chunk::block_name(&file_name, index as u64),
                block_index: index as u64,
                total_blocks,
                payload,
                sender_id: self.identity.id.clone(),
                requester_id: requester_id.clone(),
            };
            if !self.send_or_abort(&handle, &block, &file_name) {
                return;
            }
        }
        info!(%file_name, total_blocks, peer = %requester_id, "served file");
    }

    fn send_or_abort(&self, handle: &ConnectionHandle, msg: &Message, file_name: &str) -> bool {
        let frame = match encode_frame(msg) {
            Ok(f) => f,
            Err(e) => {
                warn!(%file_name, error = %e, "failed to encode frame, aborting send");
                return false;
            }
        };
        if handle.send_frame(frame) {
            true
        } else {
            warn!(%file_name, addr = %handle.addr, "peer went away mid-send, aborting");
            false
        }
    }

    async fn on_file_meta(&self, file_name: String, digest: FileDigest, sender_id: PeerId) {
        if self.registry.lock().await.contains(&file_name) {
            debug!(%file_name, "meta for a file we already hold, dropping");
            return;
        }
        let empty_ready = {
            let mut transfers = self.transfers.lock().await;
            let state = transfers
                .entry(file_name.clone())
                .or_insert_with(|| TransferState::new(file_name.clone()));
            match state.record_meta(digest) {
                Ok(ready) => ready,
                Err(e) => {
                    warn!(%file_name, %sender_id, error = %e, "dropping meta");
                    return;
                }
            }
        };
        if empty_ready {
            self.finish_transfer(&file_name).await;
        }
    }

    async fn on_send_block(
        &self,
        file_name: String,
        index: u64,
        total_blocks: u64,
        payload: Vec<u8>,
        sender_id: PeerId,
    ) {
        if self.registry.lock().await.contains(&file_name) {
            debug!(%file_name, index, "stale block for a published file, dropping");
            return;
        }
        // Record and persist under the tracker lock: an index only stands
        // once its payload is on disk, and a rejected block (total mismatch,
        // terminal state) never touches disk at all.
        let ready = {
            let mut transfers = self.transfers.lock().await;
            let state = transfers
                .entry(file_name.clone())
                .or_insert_with(|| TransferState::new(file_name.clone()));
            let outcome = match state.record_block(index, total_blocks) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(%file_name, index, %sender_id, error = %e, "dropping block");
                    return;
                }
            };
            match outcome {
                BlockOutcome::Duplicate => {
                    debug!(%file_name, index, "duplicate block, ignoring");
                    false
                }
                BlockOutcome::Accepted | BlockOutcome::ReadyToAssemble => {
                    if let Err(e) = self.storage.write_block(&file_name, index, &payload) {
                        warn!(%file_name, index, error = %e, "failed to persist block, dropping");
                        state.forget_block(index);
                        if state.received_count() == 0 && state.meta().is_none() {
                            transfers.remove(&file_name);
                        }
                        false
                    } else {
                        outcome == BlockOutcome::ReadyToAssemble
                    }
                }
            }
        };
        if ready {
            self.finish_transfer(&file_name).await;
        }
    }

    /// Every expected index is on disk: reassemble, verify when a meta was
    /// announced, then either publish or discard. Terminal states stay in
    /// the tracker map so straggler blocks are rejected instead of
    /// restarting the transfer.
    async fn finish_transfer(&self, file_name: &str) {
        let (total_blocks, meta) = {
            let transfers = self.transfers.lock().await;
            let Some(state) = transfers.get(file_name) else {
                return;
            };
            (state.total_blocks().unwrap_or(0), state.meta().copied())
        };
        let verified = self
            .storage
            .reassemble(file_name, total_blocks)
            .and_then(|partial| match &meta {
                Some(m) => integrity::verify(std::fs::File::open(partial)?, m),
                None => Ok(true),
            });
        match verified {
            Ok(true) => {
                if let Err(e) = self.storage.publish(file_name) {
                    warn!(%file_name, error = %e, "failed to publish artifact");
                    self.fail_transfer(file_name).await;
                    return;
                }
                self.registry.lock().await.insert(file_name.to_string());
                if let Some(state) = self.transfers.lock().await.get_mut(file_name) {
                    state.mark_complete();
                }
                let _ = self.storage.remove_blocks(file_name);
                info!(%file_name, total_blocks, verified = meta.is_some(), "transfer complete");
            }
            Ok(false) => {
                warn!(%file_name, "integrity verification failed, discarding transfer");
                self.fail_transfer(file_name).await;
            }
            Err(e) => {
                warn!(%file_name, error = %e, "reassembly failed, discarding transfer");
                self.fail_transfer(file_name).await;
            }
        }
    }

    /// Mark the transfer Failed and remove everything it wrote. No retry and
    /// no re-request: the protocol has no repair mechanism.
    async fn fail_transfer(&self, file_name: &str) {
        if let Some(state) = self.transfers.lock().await.get_mut(file_name) {
            state.mark_failed();
        }
        let _ = self.storage.discard_partial(file_name);
        let _ = self.storage.remove_blocks(file_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node(id: &str) -> (tempfile::TempDir, Arc<Node>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageArea::open(dir.path()).unwrap();
        let identity = PeerIdentity::new(PeerId::new(id), "127.0.0.1", 0);
        let node = Node::new(identity, storage).unwrap();
        (dir, node)
    }

    fn digest_of(bytes: &[u8]) -> FileDigest {
        integrity::compute_meta(bytes).unwrap()
    }

    fn block_msg(
        file_name: &str,
        index: u64,
        total_blocks: u64,
        payload: &[u8],
        requester: &str,
    ) -> Message {
        Message::SendBlock {
            file_name: file_name.to_string(),
            block_name: chunk::block_name(file_name, index),
            block_index: index,
            total_blocks,
            payload: payload.to_vec(),
            sender_id: PeerId::new("holder"),
            requester_id: PeerId::new(requester),
        }
    }

    fn meta_msg(file_name: &str, digest: FileDigest, requester: &str) -> Message {
        Message::FileMeta {
            file_name: file_name.to_string(),
            size_bytes: digest.size_bytes,
            checksum: digest.checksum,
            sender_id: PeerId::new("holder"),
            requester_id: PeerId::new(requester),
        }
    }

    #[tokio::test]
    async fn meta_for_another_requester_is_dropped() {
        let (_dir, node) = test_node("me");
        node.handle_message(0, meta_msg("a.bin", digest_of(b"xyz"), "someone-else"))
            .await;
        assert!(node.active_transfers().await.is_empty());
    }

    #[tokio::test]
    async fn request_for_absent_file_is_noop() {
        let (_dir, node) = test_node("me");
        node.handle_message(
            0,
            Message::RequestFile {
                file_name: "nowhere.bin".into(),
                requester_id: PeerId::new("peer"),
            },
        )
        .await;
        assert!(node.active_transfers().await.is_empty());
        assert_eq!(node.connection_count().await, 0);
    }

    #[tokio::test]
    async fn blocks_complete_without_meta() {
        let (_dir, node) = test_node("me");
        // Out of order, with a duplicate in the middle.
        node.handle_message(0, block_msg("f.bin", 1, 2, b"world", "me")).await;
        node.handle_message(0, block_msg("f.bin", 1, 2, b"world", "me")).await;
        node.handle_message(0, block_msg("f.bin", 0, 2, b"hello ", "me")).await;
        assert_eq!(node.local_files().await, vec!["f.bin"]);
        assert_eq!(
            node.transfer_status("f.bin").await,
            Some(TransferStatus::Complete)
        );
        let mut got = Vec::new();
        node.storage()
            .open_file("f.bin")
            .unwrap()
            .read_to_end(&mut got)
            .unwrap();
        assert_eq!(got, b"hello world");
    }

    #[tokio::test]
    async fn verified_transfer_publishes_and_cleans_up() {
        let (dir, node) = test_node("me");
        let content = b"payload under test";
        node.handle_message(0, meta_msg("v.bin", digest_of(content), "me")).await;
        node.handle_message(0, block_msg("v.bin", 0, 1, content, "me")).await;
        assert_eq!(node.local_files().await, vec!["v.bin"]);
        assert!(!dir.path().join("blocks").join("v.bin").exists());
    }

    #[tokio::test]
    async fn integrity_mismatch_fails_and_discards() {
        let (dir, node) = test_node("me");
        let wrong = digest_of(b"expected content");
        node.handle_message(0, meta_msg("bad.bin", wrong, "me")).await;
        node.handle_message(0, block_msg("bad.bin", 0, 1, b"actual content!!", "me"))
            .await;
        assert!(node.local_files().await.is_empty());
        assert_eq!(
            node.transfer_status("bad.bin").await,
            Some(TransferStatus::Failed)
        );
        assert!(!dir.path().join("blocks").join("bad.bin").exists());
        assert!(!dir.path().join("blocks").join("bad.bin.partial").exists());
    }

    #[tokio::test]
    async fn empty_file_completes_on_meta_alone() {
        let (_dir, node) = test_node("me");
        node.handle_message(0, meta_msg("empty.bin", digest_of(b""), "me")).await;
        assert_eq!(node.local_files().await, vec!["empty.bin"]);
        let mut got = Vec::new();
        node.storage()
            .open_file("empty.bin")
            .unwrap()
            .read_to_end(&mut got)
            .unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn conflicting_total_blocks_is_dropped() {
        let (_dir, node) = test_node("me");
        node.handle_message(0, block_msg("c.bin", 0, 3, b"a", "me")).await;
        node.handle_message(0, block_msg("c.bin", 1, 4, b"b", "me")).await;
        assert_eq!(
            node.transfer_status("c.bin").await,
            Some(TransferStatus::Receiving)
        );
        assert!(node.local_files().await.is_empty());
    }

    #[tokio::test]
    async fn straggler_block_after_completion_is_dropped() {
        let (dir, node) = test_node("me");
        node.handle_message(0, block_msg("s.bin", 0, 1, b"done", "me")).await;
        assert_eq!(node.local_files().await, vec!["s.bin"]);
        // A second holder finishing late must not disturb the published file.
        node.handle_message(0, block_msg("s.bin", 0, 1, b"done", "me")).await;
        assert_eq!(node.local_files().await, vec!["s.bin"]);
        assert!(!dir.path().join("blocks").join("s.bin").exists());
        let mut got = Vec::new();
        node.storage()
            .open_file("s.bin")
            .unwrap()
            .read_to_end(&mut got)
            .unwrap();
        assert_eq!(got, b"done");
    }

    #[tokio::test]
    async fn hostile_file_name_never_touches_disk() {
        let (dir, node) = test_node("me");
        node.handle_message(0, block_msg("../escape", 0, 1, b"x", "me")).await;
        assert!(node.local_files().await.is_empty());
        assert!(node.active_transfers().await.is_empty());
        // blocks/../escape would land at the storage root.
        assert!(!dir.path().join("escape").exists());
    }
}
