//! src/crypto.rs
//!
//! Stands in for Sphinx packet construction and per-hop unwrapping, which
//! are out of scope here (spec.md §1 Non-goals). `PacketCrypto` is the seam
//! a real Sphinx implementation would sit behind; `FixedSizeCrypto` is a
//! reference implementation used by the simulator and its tests, grounded
//! on `original_source/mixnet/protocol/sphinx.py`'s `build`/`size` and
//! `original_source/mixnet/protocol/node.py`'s
//! `__process_sphinx_packet` match over `ProcessedForwardHopPacket` /
//! `ProcessedFinalHopPacket` / unwrap failure.

use std::fmt;

use crate::domain::PrivateKey;
use crate::error::Result;

/// Outcome of unwrapping one hop of a mix packet (spec.md §3 "Packet
/// processing"), mirroring `node.py`'s three-way match: forward to the
/// next hop, deliver the recovered payload, or silently drop what this
/// node cannot unwrap.
pub enum Processed {
    /// Another hop remains; re-gossip the returned bytes as a new packet.
    Forward(Vec<u8>),
    /// This was the final hop; `payload` is the fully recovered message.
    Final(Vec<u8>),
    /// This node's private key could not unwrap the packet at all.
    Reject,
}

impl fmt::Debug for Processed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Processed::Forward(b) => write!(f, "Forward({} bytes)", b.len()),
            Processed::Final(b) => write!(f, "Final({} bytes)", b.len()),
            Processed::Reject => write!(f, "Reject"),
        }
    }
}

/// The external collaborator the mix overlay dispatches packet bytes
/// through. A real implementation wraps Sphinx; `FixedSizeCrypto` below is
/// a deterministic stand-in that preserves the same three-way contract
/// without doing any actual onion encryption (spec.md §1 Non-goals).
pub trait PacketCrypto {
    /// Builds the wire bytes for a message routed over `path_len` hops.
    fn build(&self, message: &[u8], path_len: usize) -> Result<Vec<u8>>;

    /// The fixed size, in bytes, of every packet this crypto produces for a
    /// path of length `max_path_len`. The mix pipeline uses this to size
    /// its noise packets (spec.md §3 "fixed packet size").
    fn size(&self, max_path_len: usize) -> usize;

    /// Unwraps one hop using `private_key`, yielding the next action.
    fn process(&self, packet: &[u8], private_key: &PrivateKey) -> Processed;
}

/// A reference `PacketCrypto`: every packet is `[hops_remaining: u8][payload
/// padded to max_message_size]`. `process` decrements `hops_remaining`
/// ignoring the private key's actual value (there is no real unwrapping to
/// authenticate against), which lets the simulator drive the NomMix
/// forward/final dispatch without modelling Sphinx's cryptography.
pub struct FixedSizeCrypto {
    max_message_size: usize,
}

impl FixedSizeCrypto {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl PacketCrypto for FixedSizeCrypto {
    fn build(&self, message: &[u8], path_len: usize) -> Result<Vec<u8>> {
        if message.len() > self.max_message_size {
            return Err(crate::error::Error::PacketBuild(format!(
                "message of {} bytes exceeds max_message_size {}",
                message.len(),
                self.max_message_size
            )));
        }
        if path_len == 0 {
            return Err(crate::error::Error::PacketBuild(
                "path_len must be greater than 0".to_string(),
            ));
        }
        // `path_len` counts the hops a packet is processed by, including the
        // final one; `hops_remaining` counts the `Forward`s still owed
        // before that last `process()` call returns `Final`.
        let mut bytes = Vec::with_capacity(1 + self.max_message_size);
        bytes.push((path_len - 1) as u8);
        bytes.extend_from_slice(message);
        bytes.resize(1 + self.max_message_size, 0u8);
        Ok(bytes)
    }

    fn size(&self, max_path_len: usize) -> usize {
        let _ = max_path_len;
        1 + self.max_message_size
    }

    fn process(&self, packet: &[u8], _private_key: &PrivateKey) -> Processed {
        let Some((&hops_remaining, payload)) = packet.split_first() else {
            return Processed::Reject;
        };
        if payload.len() != self.max_message_size {
            return Processed::Reject;
        }
        if hops_remaining == 0 {
            return Processed::Final(payload.to_vec());
        }
        let mut next = Vec::with_capacity(packet.len());
        next.push(hops_remaining - 1);
        next.extend_from_slice(payload);
        Processed::Forward(next)
    }
}
