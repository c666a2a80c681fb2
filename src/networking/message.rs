use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: i32 = 1;

/// Every request leads with a zero-padded ASCII command of this length.
pub const COMMAND_LENGTH: usize = 20;

/// Blocks per `blocklist` frame in a range reply.
pub const BLOCK_BATCH_SIZE: usize = 100;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Version {
    pub version: i32,
    pub best_height: i64,
    pub addr_from: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct KnownNodesMessage {
    pub addr_list: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct BlockMessage {
    pub addr_from: String,
    pub block: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct BlockListMessage {
    pub addr_from: String,
    pub blocks: Vec<Vec<u8>>,
    /// Total unbatched block count for the whole reply, not this frame.
    pub length: usize,
}

/// Range request; `id` carries the ASCII string `"<start>-<end>"`.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct LatestBlockHeight {
    pub addr_from: String,
    pub kind: String,
    pub id: Vec<u8>,
}

pub fn cmd_to_bytes(cmd: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; COMMAND_LENGTH];
    bytes[..cmd.len()].copy_from_slice(cmd.as_bytes());
    bytes
}

pub fn bytes_to_cmd(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| **b != 0)
        .map(|b| *b as char)
        .collect()
}

pub fn encode_payload<T: Serialize>(data: &T) -> Vec<u8> {
    bincode::serialize(data).expect("[message::encode_payload] ERROR: encoding failed")
}

/// Command bytes followed by the encoded payload: one complete request.
pub fn frame<T: Serialize>(cmd: &str, payload: &T) -> Vec<u8> {
    let mut request = cmd_to_bytes(cmd);
    request.extend(encode_payload(payload));
    request
}
