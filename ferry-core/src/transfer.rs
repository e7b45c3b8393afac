//! Transfer tracker: per-file accumulation state for an in-flight download.
//!
//! Tracks which block indices have arrived and when the set is complete.
//! Payload storage is the caller's concern; the tracker only does the
//! bookkeeping, so it stays correct under any interleaving of block
//! arrivals from any number of connections.

use std::collections::BTreeSet;

use crate::integrity::FileDigest;

/// Lifecycle of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Created, nothing received yet.
    Pending,
    /// At least one block or the meta has arrived.
    Receiving,
    /// Every expected index is present; reassembly in progress.
    Verifying,
    /// Reassembled and (when meta was supplied) verified.
    Complete,
    /// Verification mismatched; artifacts discarded.
    Failed,
}

/// Outcome of feeding one block into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Index recorded; more blocks outstanding.
    Accepted,
    /// Index seen before; nothing changed.
    Duplicate,
    /// Every index in `[0, total_blocks)` is now present.
    ReadyToAssemble,
}

/// Rejected input. The offending message is dropped; the transfer and the
/// connection that delivered it both stay alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("total_blocks {got} conflicts with established {expected}")]
    TotalMismatch { expected: u64, got: u64 },
    #[error("block index {index} out of range for {total_blocks} blocks")]
    IndexOutOfRange { index: u64, total_blocks: u64 },
    #[error("transfer already terminal")]
    Terminal,
}

/// Bookkeeping for one in-flight download of one file.
#[derive(Debug)]
pub struct TransferState {
    file_name: String,
    meta: Option<FileDigest>,
    total_blocks: Option<u64>,
    received: BTreeSet<u64>,
    status: TransferStatus,
}

impl TransferState {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            meta: None,
            total_blocks: None,
            received: BTreeSet::new(),
            status: TransferStatus::Pending,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn meta(&self) -> Option<&FileDigest> {
        self.meta.as_ref()
    }

    pub fn total_blocks(&self) -> Option<u64> {
        self.total_blocks
    }

    pub fn received_count(&self) -> u64 {
        self.received.len() as u64
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TransferStatus::Complete | TransferStatus::Failed)
    }

    /// Record the pre-announced digest. The first meta wins; a repeat is
    /// ignored. Returns `true` when the transfer is complete on the meta
    /// alone: an empty file has zero blocks, so no `SendBlock` will follow.
    pub fn record_meta(&mut self, meta: FileDigest) -> Result<bool, TransferError> {
        if self.is_terminal() {
            return Err(TransferError::Terminal);
        }
        if self.meta.is_none() {
            self.meta = Some(meta);
        }
        if self.status == TransferStatus::Pending {
            self.status = TransferStatus::Receiving;
        }
        if self.status != TransferStatus::Verifying
            && self.meta.map(|m| m.size_bytes) == Some(0)
            && self.received.is_empty()
        {
            self.total_blocks = Some(0);
            self.status = TransferStatus::Verifying;
            return Ok(true);
        }
        Ok(false)
    }

    /// Record arrival of one block index. The first block's `total_blocks`
    /// is established for the transfer; a later conflicting value is a
    /// protocol inconsistency and leaves the state untouched.
    pub fn record_block(
        &mut self,
        index: u64,
        total_blocks: u64,
    ) -> Result<BlockOutcome, TransferError> {
        if self.is_terminal() {
            return Err(TransferError::Terminal);
        }
        if index >= total_blocks {
            return Err(TransferError::IndexOutOfRange {
                index,
                total_blocks,
            });
        }
        let expected = match self.total_blocks {
            None => {
                self.total_blocks = Some(total_blocks);
                total_blocks
            }
            Some(t) if t != total_blocks => {
                return Err(TransferError::TotalMismatch {
                    expected: t,
                    got: total_blocks,
                })
            }
            Some(t) => t,
        };
        if self.status == TransferStatus::Pending {
            self.status = TransferStatus::Receiving;
        }
        if !self.received.insert(index) {
            return Ok(BlockOutcome::Duplicate);
        }
        if self.received.len() as u64 == expected {
            self.status = TransferStatus::Verifying;
            Ok(BlockOutcome::ReadyToAssemble)
        } else {
            Ok(BlockOutcome::Accepted)
        }
    }

    /// Roll back a recorded index whose payload could not be persisted, so
    /// the transfer cannot complete around a missing artifact.
    pub fn forget_block(&mut self, index: u64) {
        if self.received.remove(&index) && self.status == TransferStatus::Verifying {
            self.status = TransferStatus::Receiving;
        }
    }

    pub fn mark_complete(&mut self) {
        self.status = TransferStatus::Complete;
    }

    pub fn mark_failed(&mut self) {
        self.status = TransferStatus::Failed;
    }
}
