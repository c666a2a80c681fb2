use std::error::Error;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::AtomicBool;

use num_bigint::BigUint;
use num_traits::One;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::blockchain::proof::ProofOfWork;
use crate::config::Config;

/// Byte string carried raw in memory and encoded as lowercase hex (no `0x`
/// prefix) in the JSON form. Empty serializes as `""`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_empty() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str(&hex::encode(&self.0))
        }
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        if hex_str.len() % 2 != 0 || !hex_str.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(D::Error::custom(format!("invalid hex string: {}", hex_str)));
        }
        hex::decode(&hex_str)
            .map(HexBytes)
            .map_err(D::Error::custom)
    }
}

impl Deref for HexBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for HexBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(bytes: Vec<u8>) -> Self {
        HexBytes(bytes)
    }
}

impl From<&[u8]> for HexBytes {
    fn from(bytes: &[u8]) -> Self {
        HexBytes(bytes.to_vec())
    }
}

impl From<&str> for HexBytes {
    fn from(s: &str) -> Self {
        HexBytes(s.as_bytes().to_vec())
    }
}

/// Difficulty rides in the JSON as a plain arbitrary-precision number, never
/// a string and never scientific notation.
pub mod difficulty_json {
    use std::str::FromStr;

    use num_bigint::BigUint;
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        let number = serde_json::Number::from_str(&value.to_str_radix(10))
            .map_err(S::Error::custom)?;
        number.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let number = serde_json::Number::deserialize(deserializer)?;
        BigUint::from_str(&number.to_string()).map_err(|_| {
            D::Error::custom(format!("difficulty is not a positive integer: {}", number))
        })
    }
}

/// The block record. Field order here is the canonical JSON order; the PoW
/// pre-image hashes that JSON byte-for-byte, so do not reorder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Block {
    pub timestamp: i64,
    pub hash: HexBytes,
    pub prev_hash: HexBytes,
    pub main_block_height: i64,
    pub main_block_hash: HexBytes,
    pub nonce: HexBytes,
    pub height: i64,
    #[serde(with = "difficulty_json")]
    pub difficulty: BigUint,
    pub miner: HexBytes,
    pub validator: HexBytes,
}

impl Block {
    /// Builds a block on the given parent and runs the nonce search to
    /// completion. Only used for genesis creation; the miner drives its own
    /// cancellable search.
    pub fn create(
        prev_hash: Vec<u8>,
        height: i64,
        address: &str,
        config: &Config,
    ) -> Result<Self, Box<dyn Error>> {
        let mut block = Block {
            timestamp: 0,
            hash: HexBytes::default(),
            prev_hash: HexBytes(prev_hash),
            main_block_height: 0,
            main_block_hash: HexBytes::default(),
            nonce: HexBytes::default(),
            height,
            difficulty: config.default_difficulty.clone(),
            miner: HexBytes::from(address),
            validator: HexBytes::from(address),
        };

        let pow = ProofOfWork::new(&block);
        let never_cancelled = AtomicBool::new(false);
        let nonce = pow
            .run(&never_cancelled)?
            .ok_or("[block::create] ERROR: nonce search returned no result")?;
        block.hash = HexBytes(pow.final_hash(&nonce));
        block.nonce = HexBytes(nonce);

        Ok(block)
    }

    pub fn genesis(address: &str, config: &Config) -> Result<Self, Box<dyn Error>> {
        Self::create(Vec::new(), 0, address, config)
    }

    /// Sentinel returned when the store has no `"lh"` pointer yet.
    pub fn default_block() -> Self {
        Block {
            timestamp: 0,
            hash: HexBytes::default(),
            prev_hash: HexBytes::default(),
            main_block_height: 0,
            main_block_hash: HexBytes::default(),
            nonce: HexBytes::default(),
            height: 0,
            difficulty: BigUint::one(),
            miner: HexBytes::default(),
            validator: HexBytes::default(),
        }
    }

    /// Canonical JSON bytes, used for hashing, persistence, and the wire.
    pub fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("[block::serialize] ERROR: serialization failed")
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, Box<dyn Error>> {
        serde_json::from_slice(data)
            .map_err(|e| format!("[block::deserialize] ERROR: {}", e).into())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "----- Block -----")?;
        writeln!(f, "Height:      {}", self.height)?;
        writeln!(f, "Timestamp:   {}", self.timestamp)?;
        writeln!(f, "Hash:        {}", hex::encode(&self.hash))?;
        writeln!(f, "PrevHash:    {}", hex::encode(&self.prev_hash))?;
        writeln!(f, "Nonce:       {}", hex::encode(&self.nonce))?;
        writeln!(f, "Difficulty:  {}", self.difficulty)?;
        writeln!(f, "Miner:       {}", hex::encode(&self.miner))?;
        write!(f, "Validator:   {}", hex::encode(&self.validator))
    }
}
