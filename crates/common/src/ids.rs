//! Transaction and branch identifiers.
//!
//! Ids are 64-bit, time-ordered and generated by the coordinator itself, so
//! they are monotonic within a process and unique across restarts as long as
//! distinct coordinators use distinct node ids. The xid seen on the wire is
//! the coordinator address plus the numeric transaction id, which lets a
//! resource manager route phase-two traffic back to the coordinator that
//! owns the transaction.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch for id timestamps: 2020-01-01T00:00:00Z in millis.
const ID_EPOCH_MS: u64 = 1_577_836_800_000;

/// Bit layout: 41 bits timestamp | 10 bits node | 12 bits sequence.
const NODE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const NODE_MASK: u64 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Generates 64-bit time-ordered ids for global transactions and branches.
///
/// Ids from one generator are strictly increasing. The sequence field rolls
/// the generator forward into the next millisecond when more than 4096 ids
/// are requested within one, so the generator never blocks.
pub struct IdGenerator {
    node_id: u64,
    state: Mutex<GeneratorState>,
}

struct GeneratorState {
    last_ms: u64,
    sequence: u64,
}

impl IdGenerator {
    /// Create a generator for the given node id (low 10 bits are used).
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: u64::from(node_id) & NODE_MASK,
            state: Mutex::new(GeneratorState {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    /// Produce the next id.
    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock();
        let mut now = Self::elapsed_ms();
        if now < state.last_ms {
            // Clock went backwards; keep issuing from the last observed
            // millisecond so ordering is preserved.
            now = state.last_ms;
        }
        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                now += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        let id = (now << (NODE_BITS + SEQUENCE_BITS)) | (self.node_id << SEQUENCE_BITS) | state.sequence;
        id as i64
    }

    fn elapsed_ms() -> u64 {
        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        unix_ms.saturating_sub(ID_EPOCH_MS)
    }
}

/// Globally unique identifier of one global transaction.
///
/// Rendered as `<coordinator-address>:<transaction-id>`, e.g.
/// `192.168.0.10:8091:2000042`. The address segment may itself contain
/// colons, so parsing splits on the last one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    address: String,
    transaction_id: i64,
}

impl Xid {
    /// Build an xid from a coordinator address and a transaction id.
    pub fn new(address: impl Into<String>, transaction_id: i64) -> Self {
        Self {
            address: address.into(),
            transaction_id,
        }
    }

    /// The coordinator address segment (host:port).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The numeric transaction id segment.
    pub fn transaction_id(&self) -> i64 {
        self.transaction_id
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.transaction_id)
    }
}

/// Error parsing an xid from its string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid xid: {0}")]
pub struct XidParseError(pub String);

impl FromStr for Xid {
    type Err = XidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, id) = s
            .rsplit_once(':')
            .ok_or_else(|| XidParseError(s.to_string()))?;
        if address.is_empty() {
            return Err(XidParseError(s.to_string()));
        }
        let transaction_id = id.parse().map_err(|_| XidParseError(s.to_string()))?;
        Ok(Self {
            address: address.to_string(),
            transaction_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_strictly_increasing() {
        let generator = IdGenerator::new(1);
        let mut last = generator.next_id();
        for _ in 0..10_000 {
            let id = generator.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_node_id_embedded() {
        let a = IdGenerator::new(3).next_id() as u64;
        let b = IdGenerator::new(4).next_id() as u64;
        assert_eq!((a >> SEQUENCE_BITS) & NODE_MASK, 3);
        assert_eq!((b >> SEQUENCE_BITS) & NODE_MASK, 4);
    }

    #[test]
    fn test_xid_roundtrip() {
        let xid = Xid::new("10.0.0.5:8091", 42_000_017);
        let s = xid.to_string();
        assert_eq!(s, "10.0.0.5:8091:42000017");
        let parsed: Xid = s.parse().unwrap();
        assert_eq!(parsed, xid);
        assert_eq!(parsed.address(), "10.0.0.5:8091");
        assert_eq!(parsed.transaction_id(), 42_000_017);
    }

    #[test]
    fn test_xid_parse_rejects_garbage() {
        assert!("no-separator".parse::<Xid>().is_err());
        assert!("addr:not-a-number".parse::<Xid>().is_err());
        assert!(":123".parse::<Xid>().is_err());
    }
}
