//! src/domain.rs
//!
//! Core wire types shared across the simulator: node identities, the
//! REAL/NOISE mix packet, and the plain broadcast message. Consolidates the
//! concepts the teacher split across `model.rs`/`crypto.rs` into one module,
//! the way the teacher's own later revision (`domain.rs`) already
//! consolidated identity and message types.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::transport::HasLen;

/// A node's public key, and its identity throughout the simulation.
/// `GlobalConfig::membership` is an ordered list of these.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node::{}", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// A node's cryptographic identity: a keypair whose public half is its
/// `NodeId` and whose private half is handed opaquely to `PacketCrypto`
/// (spec.md §3 "Node: owns a private key"; the crypto itself — Sphinx
/// unwrap, route sampling — is an external collaborator, spec.md §1).
pub struct Identity {
    signing_key: SigningKey,
    pub node_id: NodeId,
}

impl Identity {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let node_id = NodeId::new(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            node_id,
        }
    }

    /// Deterministic identity for reproducible `node_configs` derivation
    /// from a run index (spec.md §6 expects one `NodeConfig` per index; see
    /// `original_source/mixnet/sim/config.py`'s private-key derivation,
    /// which is seeded from the node's index rather than truly random, so
    /// that two runs over the same `RunConfig` reproduce the same
    /// membership).
    pub fn from_index(index: u32) -> Self {
        let mut seed = [0u8; 32];
        seed[..4].copy_from_slice(&index.to_be_bytes());
        let digest = Sha256::digest(seed);
        let signing_key = SigningKey::from_bytes(digest.as_ref().try_into().unwrap());
        let node_id = NodeId::new(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            node_id,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        match fs::read(path.as_ref()) {
            Ok(bytes) => {
                let key_bytes: [u8; 32] = bytes.try_into().map_err(|_| Error::InvalidKeyFile)?;
                let signing_key = SigningKey::from_bytes(&key_bytes);
                let node_id = NodeId::new(signing_key.verifying_key().to_bytes());
                Ok(Self {
                    signing_key,
                    node_id,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let identity = Self::generate();
                fs::write(path.as_ref(), identity.signing_key.to_bytes())?;
                Ok(identity)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn private_key(&self) -> PrivateKey {
        PrivateKey(self.signing_key.to_bytes())
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

/// Opaque private key material, as handed to `PacketCrypto::process`.
#[derive(Clone, Copy)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// A stable, content-addressed 256-bit identifier used by the gossip layer
/// for duplicate suppression (spec.md §3 "Message ... a stable 256-bit
/// id()").
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; 32]);

impl MessageId {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self)
    }
}

/// Anything the gossip overlay can deduplicate and forward: a stable id and
/// a known wire length (`HasLen`, shared with the transport layer's
/// metering so `len()` never needs to parse the payload).
pub trait GossipPayload: Clone + HasLen {
    fn id(&self) -> MessageId;
}

/// The 1-byte wire tag distinguishing real traffic from filler (spec.md §3
/// "Packet ... 1-byte flag").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Flag {
    Real = 0x00,
    Noise = 0x01,
}

/// The wire unit on a mix link: a 1-byte REAL/NOISE flag followed by
/// exactly `S` payload bytes. Every frame on a mix link is `1 + S` bytes
/// regardless of flag (spec.md §3 invariant).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub flag: Flag,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn real(payload: Vec<u8>) -> Self {
        Self {
            flag: Flag::Real,
            payload,
        }
    }

    pub fn noise(payload_size: usize) -> Self {
        Self {
            flag: Flag::Noise,
            payload: vec![0u8; payload_size],
        }
    }

    pub fn is_noise(&self) -> bool {
        self.flag == Flag::Noise
    }
}

impl HasLen for Packet {
    fn wire_len(&self) -> usize {
        1 + self.payload.len()
    }
}

impl GossipPayload for Packet {
    fn id(&self) -> MessageId {
        MessageId::of(&self.payload)
    }
}

/// Raw wire bytes (a built mix packet, or one of its unwrapped hops) are
/// themselves gossipable: `NomMixOverlay`'s own REAL/NOISE framing
/// (`NomMessage<M>`) is the only flag layer a mix packet needs, so `Node`
/// gossips `Vec<u8>` directly rather than re-wrapping it in `Packet`.
impl GossipPayload for Vec<u8> {
    fn id(&self) -> MessageId {
        MessageId::of(self)
    }
}

/// An opaque, fixed-length message carried by the post-mix broadcast
/// overlay (spec.md §3 "Message (for gossip/broadcast)").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastMessage(pub Vec<u8>);

impl HasLen for BroadcastMessage {
    fn wire_len(&self) -> usize {
        self.0.len()
    }
}

impl GossipPayload for BroadcastMessage {
    fn id(&self) -> MessageId {
        MessageId::of(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_frame_size_is_flag_plus_payload() {
        let p = Packet::real(vec![0u8; 128]);
        assert_eq!(p.wire_len(), 129);
        let n = Packet::noise(128);
        assert_eq!(n.wire_len(), 129);
        assert!(n.is_noise());
    }

    #[test]
    fn message_id_is_stable_and_content_addressed() {
        let a = BroadcastMessage(b"hello".to_vec());
        let b = BroadcastMessage(b"hello".to_vec());
        let c = BroadcastMessage(b"world".to_vec());
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn identity_from_index_is_deterministic() {
        let a = Identity::from_index(7);
        let b = Identity::from_index(7);
        assert_eq!(a.node_id, b.node_id);
        let c = Identity::from_index(8);
        assert_ne!(a.node_id, c.node_id);
    }

    #[test]
    fn identity_from_file_creates_new() {
        use tempfile::tempdir;
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.key");
        assert!(!path.exists());
        let identity = Identity::from_file(&path).unwrap();
        assert!(path.exists());
        let reloaded = Identity::from_file(&path).unwrap();
        assert_eq!(identity.node_id, reloaded.node_id);
    }
}
