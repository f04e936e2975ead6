//! # weft-spaces
//!
//! Encrypted CRDT space replication over the Weft relay.
//!
//! A **space** is a CRDT document plus its member list and group encryption
//! key lineage. [`SpaceSync`] keeps a set of spaces in sync across members:
//! local changes are encrypted under the space's current key generation and
//! broadcast as `content` envelopes; membership changes trigger invites
//! (`space-invite`) and rekeying (`group-key-rotation`).
//!
//! The identity primitives, the CRDT algorithm, the group-key lifecycle, and
//! the symmetric change cipher are consumed as capability traits
//! ([`Identity`], [`CrdtEngine`], [`GroupKeyService`], [`ChangeCipher`]) so
//! the replication core stays portable across implementations.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod adapter;
mod capabilities;
mod error;
mod payload;
mod space;

#[cfg(test)]
pub(crate) mod testutil;

pub use adapter::{MemberChangeCallback, RemoteUpdateCallback, SpaceHandle, SpaceSync};
pub use capabilities::{
    ChangeCipher, CrdtEngine, EncryptedChange, Generation, GroupKey, GroupKeyService, Identity,
    Sealed, GROUP_KEY_SIZE,
};
pub use error::{CapabilityError, SpaceError};
pub use payload::{pack_changes, split_changes, ContentPayload, InvitePayload, RotationPayload};
pub use space::{MemberAction, MemberChange, SpaceId, SpaceInfo, SpaceType};
