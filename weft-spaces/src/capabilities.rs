//! Capability interfaces consumed by the replication adapter.
//!
//! The identity primitives, the CRDT algorithm, the group-key lifecycle, and
//! the symmetric change cipher are external collaborators. The adapter
//! depends only on these narrow traits, which keeps the replication core
//! portable across CRDT and crypto implementations.

use crate::error::CapabilityError;
use crate::payload::b64;
use crate::space::SpaceId;
use serde::{Deserialize, Serialize};
use weft_types::Did;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a symmetric group key in bytes.
pub const GROUP_KEY_SIZE: usize = 32;

/// Monotonic version counter for a space's group key.
pub type Generation = u64;

/// Symmetric group key material for one generation of one space.
///
/// Zeroed on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct GroupKey([u8; GROUP_KEY_SIZE]);

impl GroupKey {
    /// Create a key from raw bytes; `None` unless exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == GROUP_KEY_SIZE {
            let mut arr = [0u8; GROUP_KEY_SIZE];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; GROUP_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupKey([REDACTED])")
    }
}

/// An asymmetrically wrapped secret: encrypt-for-recipient output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sealed {
    /// The wrapped bytes.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Encryption nonce.
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Sender's ephemeral public key.
    #[serde(with = "b64")]
    pub ephemeral_public_key: Vec<u8>,
}

/// A symmetrically encrypted change buffer, keyed by `(space, generation)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedChange {
    /// The encrypted bytes.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Encryption nonce.
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Key generation this was encrypted under.
    pub generation: Generation,
    /// DID of the encrypting peer.
    pub from_did: Did,
}

/// Identity primitives: DID, signing, and asymmetric wrap/unwrap.
pub trait Identity: Send + Sync {
    /// This peer's DID.
    fn did(&self) -> Did;

    /// Sign bytes with this peer's signing key.
    fn sign(&self, bytes: &[u8]) -> Vec<u8>;

    /// Encrypt a secret so only the holder of `recipient_public_key` can
    /// read it.
    fn encrypt_for(
        &self,
        plaintext: &[u8],
        recipient_public_key: &[u8],
    ) -> Result<Sealed, CapabilityError>;

    /// Unwrap a secret that was encrypted for this peer.
    fn decrypt_for_me(&self, sealed: &Sealed) -> Result<Vec<u8>, CapabilityError>;
}

/// The opaque CRDT document capability.
///
/// The engine owns merge semantics and causal history; the adapter only
/// moves binary diffs around. Documents are immutable values from the
/// adapter's point of view: `change` and `apply` return successors.
pub trait CrdtEngine: Send + Sync {
    /// The opaque document value.
    type Doc: Clone + Send + Sync + 'static;

    /// Apply a local mutation, returning the new document.
    fn change(&self, doc: &Self::Doc, mutator: &mut dyn FnMut(&mut Self::Doc)) -> Self::Doc;

    /// Binary diffs that turn `before` into `after`.
    fn changes(&self, before: &Self::Doc, after: &Self::Doc) -> Vec<Vec<u8>>;

    /// Apply remote diffs to a document, returning the new document.
    fn apply(&self, doc: &Self::Doc, changes: &[Vec<u8>]) -> Result<Self::Doc, CapabilityError>;

    /// Serialize a full document snapshot.
    fn save(&self, doc: &Self::Doc) -> Vec<u8>;

    /// Load a document from a snapshot.
    fn load(&self, bytes: &[u8]) -> Result<Self::Doc, CapabilityError>;
}

/// Group-key lifecycle: one monotonically increasing generation per space.
pub trait GroupKeyService: Send + Sync {
    /// Mint generation-0 key material for a new space.
    fn create_key(&self, space_id: &SpaceId) -> Result<GroupKey, CapabilityError>;

    /// Mint the next generation, making it current.
    fn rotate_key(&self, space_id: &SpaceId) -> Result<GroupKey, CapabilityError>;

    /// The current key, if any exists for the space.
    fn current_key(&self, space_id: &SpaceId) -> Option<GroupKey>;

    /// The current generation, if any key exists for the space.
    fn current_generation(&self, space_id: &SpaceId) -> Option<Generation>;

    /// The key for an exact generation; `None` if this peer never held it
    /// (e.g. it was removed before the generation was minted).
    fn key_by_generation(&self, space_id: &SpaceId, generation: Generation) -> Option<GroupKey>;

    /// Import a key received in an invite or rotation at the stated
    /// generation.
    fn import_key(
        &self,
        space_id: &SpaceId,
        key: GroupKey,
        generation: Generation,
    ) -> Result<(), CapabilityError>;
}

/// Symmetric encrypt/decrypt of change buffers with associated data.
pub trait ChangeCipher: Send + Sync {
    /// Encrypt a change buffer under a group key.
    fn encrypt_change(
        &self,
        plaintext: &[u8],
        key: &GroupKey,
        space_id: &SpaceId,
        generation: Generation,
        from_did: &Did,
    ) -> Result<EncryptedChange, CapabilityError>;

    /// Decrypt a change buffer with the key for its generation.
    fn decrypt_change(
        &self,
        encrypted: &EncryptedChange,
        key: &GroupKey,
    ) -> Result<Vec<u8>, CapabilityError>;
}
