//! Block file transfer protocol.
//! Pure bookkeeping: no sockets or filesystem side effects; the node daemon
//! owns all I/O and feeds bytes and events through these types.

pub mod chunk;
pub mod identity;
pub mod integrity;
pub mod protocol;
pub mod transfer;
pub mod wire;

pub use chunk::BLOCK_SIZE;
pub use identity::{PeerId, PeerIdentity};
pub use integrity::FileDigest;
pub use protocol::Message;
pub use transfer::{BlockOutcome, TransferError, TransferState, TransferStatus};
pub use wire::{encode_frame, FrameDecodeError, FrameDecoder, FrameEncodeError};
