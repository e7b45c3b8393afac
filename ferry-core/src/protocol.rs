//! Wire protocol: message types. Encoding is JSON; framing is newline-delimited (see wire module).

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// All wire message types. Binary payloads travel base64-encoded and
/// checksums hex-encoded, so an encoded frame is always delimiter-safe text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Ask a peer for a whole file by name. Broadcast to every live connection.
    RequestFile {
        file_name: String,
        requester_id: PeerId,
    },
    /// Pre-announce the size and checksum of the file about to follow in blocks.
    /// Sent once per transfer, before the first block.
    FileMeta {
        file_name: String,
        size_bytes: u64,
        #[serde(with = "hex_32")]
        checksum: [u8; 32],
        sender_id: PeerId,
        requester_id: PeerId,
    },
    /// One block of a file. `block_index` is dense and 0-based; `total_blocks`
    /// is constant across every block of one transfer.
    SendBlock {
        file_name: String,
        block_name: String,
        block_index: u64,
        total_blocks: u64,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
        sender_id: PeerId,
        requester_id: PeerId,
    },
}

mod hex_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte checksum"))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
