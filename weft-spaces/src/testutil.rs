//! Concrete capability implementations and a peer harness for tests.
//!
//! The symmetric cipher is real XChaCha20-Poly1305 over the group key; the
//! asymmetric seal and the CRDT engine are deterministic doubles.

use crate::adapter::SpaceSync;
use crate::capabilities::{
    ChangeCipher, CrdtEngine, EncryptedChange, Generation, GroupKey, GroupKeyService, Identity,
    Sealed, GROUP_KEY_SIZE,
};
use crate::error::CapabilityError;
use crate::space::SpaceId;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use weft_client::{ClientConfig, MockTransport, RelayClient};
use weft_types::{ClientFrame, Did, MessageEnvelope, ServerFrame};

/// Deterministic "public key" for a DID in the XOR seal scheme.
pub(crate) fn public_key_for(did: &Did) -> Vec<u8> {
    let bytes = did.as_str().as_bytes();
    (0..32u8).map(|i| bytes[i as usize % bytes.len()] ^ i).collect()
}

fn xor(data: &[u8], key: &[u8]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect()
}

/// Identity double: XOR keystream seal keyed by the recipient's public key.
#[derive(Clone)]
pub(crate) struct TestIdentity {
    did: Did,
    public: Vec<u8>,
}

impl TestIdentity {
    pub fn new(did: &str) -> Self {
        let did = Did::new(did);
        let public = public_key_for(&did);
        Self { did, public }
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public
    }
}

impl Identity for TestIdentity {
    fn did(&self) -> Did {
        self.did.clone()
    }

    fn sign(&self, bytes: &[u8]) -> Vec<u8> {
        // Deterministic stand-in for Ed25519: keystream over a digest-sized
        // prefix.
        let prefix = &bytes[..bytes.len().min(32)];
        xor(prefix, &self.public)
    }

    fn encrypt_for(
        &self,
        plaintext: &[u8],
        recipient_public_key: &[u8],
    ) -> Result<Sealed, CapabilityError> {
        if recipient_public_key.is_empty() {
            return Err(CapabilityError::InvalidKey("empty recipient key".into()));
        }
        Ok(Sealed {
            ciphertext: xor(plaintext, recipient_public_key),
            nonce: vec![0u8; 24],
            ephemeral_public_key: self.public.clone(),
        })
    }

    fn decrypt_for_me(&self, sealed: &Sealed) -> Result<Vec<u8>, CapabilityError> {
        Ok(xor(&sealed.ciphertext, &self.public))
    }
}

/// In-memory group-key service with per-space generation lineages.
#[derive(Clone, Default)]
pub(crate) struct TestKeyService {
    inner: Arc<Mutex<KeyStore>>,
}

#[derive(Default)]
struct KeyStore {
    keys: HashMap<(SpaceId, Generation), GroupKey>,
    current: HashMap<SpaceId, Generation>,
    minted: u64,
}

impl TestKeyService {
    /// Drop all key material for a space (simulates mid-rotation gaps).
    pub fn forget_space(&self, space_id: &SpaceId) {
        let mut store = self.inner.lock().unwrap();
        store.keys.retain(|(id, _), _| id != space_id);
        store.current.remove(space_id);
    }

    fn mint(store: &mut KeyStore) -> GroupKey {
        store.minted += 1;
        let seed = store.minted;
        let mut bytes = [0u8; GROUP_KEY_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (seed as u8).wrapping_mul(31).wrapping_add(i as u8);
        }
        GroupKey::from_bytes(&bytes).expect("fixed-size key")
    }
}

impl GroupKeyService for TestKeyService {
    fn create_key(&self, space_id: &SpaceId) -> Result<GroupKey, CapabilityError> {
        let mut store = self.inner.lock().unwrap();
        let key = Self::mint(&mut store);
        store.keys.insert((space_id.clone(), 0), key.clone());
        store.current.insert(space_id.clone(), 0);
        Ok(key)
    }

    fn rotate_key(&self, space_id: &SpaceId) -> Result<GroupKey, CapabilityError> {
        let mut store = self.inner.lock().unwrap();
        let next = match store.current.get(space_id) {
            Some(current) => current + 1,
            None => return Err(CapabilityError::InvalidKey("no key to rotate".into())),
        };
        let key = Self::mint(&mut store);
        store.keys.insert((space_id.clone(), next), key.clone());
        store.current.insert(space_id.clone(), next);
        Ok(key)
    }

    fn current_key(&self, space_id: &SpaceId) -> Option<GroupKey> {
        let store = self.inner.lock().unwrap();
        let generation = *store.current.get(space_id)?;
        store.keys.get(&(space_id.clone(), generation)).cloned()
    }

    fn current_generation(&self, space_id: &SpaceId) -> Option<Generation> {
        self.inner.lock().unwrap().current.get(space_id).copied()
    }

    fn key_by_generation(&self, space_id: &SpaceId, generation: Generation) -> Option<GroupKey> {
        self.inner
            .lock()
            .unwrap()
            .keys
            .get(&(space_id.clone(), generation))
            .cloned()
    }

    fn import_key(
        &self,
        space_id: &SpaceId,
        key: GroupKey,
        generation: Generation,
    ) -> Result<(), CapabilityError> {
        let mut store = self.inner.lock().unwrap();
        store.keys.insert((space_id.clone(), generation), key);
        let current = store.current.entry(space_id.clone()).or_insert(generation);
        if generation > *current {
            *current = generation;
        }
        Ok(())
    }
}

/// XChaCha20-Poly1305 change cipher with generation and sender as AAD.
#[derive(Clone, Default)]
pub(crate) struct ChaChaChangeCipher {
    nonce_counter: Arc<AtomicU64>,
}

fn associated_data(generation: Generation, from_did: &Did) -> Vec<u8> {
    format!("{generation}|{from_did}").into_bytes()
}

impl ChangeCipher for ChaChaChangeCipher {
    fn encrypt_change(
        &self,
        plaintext: &[u8],
        key: &GroupKey,
        _space_id: &SpaceId,
        generation: Generation,
        from_did: &Did,
    ) -> Result<EncryptedChange, CapabilityError> {
        let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|e| CapabilityError::InvalidKey(e.to_string()))?;

        let mut nonce = [0u8; 24];
        nonce[..8].copy_from_slice(
            &self
                .nonce_counter
                .fetch_add(1, Ordering::Relaxed)
                .to_be_bytes(),
        );

        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &associated_data(generation, from_did),
                },
            )
            .map_err(|e| CapabilityError::Crypto(e.to_string()))?;

        Ok(EncryptedChange {
            ciphertext,
            nonce: nonce.to_vec(),
            generation,
            from_did: from_did.clone(),
        })
    }

    fn decrypt_change(
        &self,
        encrypted: &EncryptedChange,
        key: &GroupKey,
    ) -> Result<Vec<u8>, CapabilityError> {
        let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|e| CapabilityError::InvalidKey(e.to_string()))?;
        if encrypted.nonce.len() != 24 {
            return Err(CapabilityError::Crypto("bad nonce length".into()));
        }
        cipher
            .decrypt(
                XNonce::from_slice(&encrypted.nonce),
                Payload {
                    msg: &encrypted.ciphertext,
                    aad: &associated_data(encrypted.generation, &encrypted.from_did),
                },
            )
            .map_err(|_| CapabilityError::Crypto("authentication failed".into()))
    }
}

/// Grow-only list document: the simplest CRDT with meaningful diffs.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ListDoc(pub Vec<String>);

impl ListDoc {
    pub fn push(&mut self, entry: &str) {
        self.0.push(entry.to_string());
    }
}

/// Engine over [`ListDoc`]: diffs are the appended entries.
pub(crate) struct ListEngine;

impl CrdtEngine for ListEngine {
    type Doc = ListDoc;

    fn change(&self, doc: &ListDoc, mutator: &mut dyn FnMut(&mut ListDoc)) -> ListDoc {
        let mut next = doc.clone();
        mutator(&mut next);
        next
    }

    fn changes(&self, before: &ListDoc, after: &ListDoc) -> Vec<Vec<u8>> {
        after.0[before.0.len()..]
            .iter()
            .map(|entry| entry.as_bytes().to_vec())
            .collect()
    }

    fn apply(&self, doc: &ListDoc, changes: &[Vec<u8>]) -> Result<ListDoc, CapabilityError> {
        let mut next = doc.clone();
        for change in changes {
            let entry = String::from_utf8(change.clone())
                .map_err(|e| CapabilityError::Document(e.to_string()))?;
            next.0.push(entry);
        }
        Ok(next)
    }

    fn save(&self, doc: &ListDoc) -> Vec<u8> {
        serde_json::to_vec(&doc.0).unwrap_or_default()
    }

    fn load(&self, bytes: &[u8]) -> Result<ListDoc, CapabilityError> {
        serde_json::from_slice(bytes)
            .map(ListDoc)
            .map_err(|e| CapabilityError::Document(e.to_string()))
    }
}

/// The adapter type all tests use.
pub(crate) type TestSync =
    SpaceSync<MockTransport, ListEngine, TestIdentity, TestKeyService, ChaChaChangeCipher>;

/// One fully wired peer: connected client, adapter, and capability doubles.
pub(crate) struct Peer {
    pub sync: TestSync,
    pub transport: MockTransport,
    pub keys: TestKeyService,
    pub identity: TestIdentity,
}

impl Peer {
    /// Envelopes this peer has handed to its transport so far.
    pub fn sent_envelopes(&self) -> Vec<MessageEnvelope> {
        self.transport
            .sent_frames()
            .iter()
            .filter_map(|bytes| {
                let text = std::str::from_utf8(bytes).ok()?;
                match ClientFrame::from_json(text).ok()? {
                    ClientFrame::Send { envelope } => Some(envelope),
                    _ => None,
                }
            })
            .collect()
    }

    /// Simulate the relay delivering an envelope to this peer.
    pub fn deliver(&self, envelope: &MessageEnvelope) {
        let frame = ServerFrame::Message {
            envelope: envelope.clone(),
        };
        self.transport
            .queue_response(frame.to_json().expect("frame encodes").into_bytes());
    }
}

/// Build a connected peer named by its DID.
pub(crate) async fn peer(did: &str) -> Peer {
    let transport = MockTransport::new();
    transport.auto_receipt(true);
    transport.queue_response(
        ServerFrame::Registered {
            did: Did::new(did),
        }
        .to_json()
        .expect("frame encodes")
        .into_bytes(),
    );

    let client = RelayClient::new(ClientConfig::new("ws://relay.test"), transport.clone());
    client.connect(&Did::new(did)).await.expect("mock connect");

    let identity = TestIdentity::new(did);
    let keys = TestKeyService::default();
    let sync = SpaceSync::new(
        client,
        ListEngine,
        identity.clone(),
        keys.clone(),
        ChaChaChangeCipher::default(),
    );
    sync.start();

    Peer {
        sync,
        transport,
        keys,
        identity,
    }
}

/// Poll until a condition holds or a generous deadline passes.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not met within deadline");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chacha_cipher_roundtrip() {
        let cipher = ChaChaChangeCipher::default();
        let key = GroupKey::from_bytes(&[9u8; 32]).unwrap();
        let space = SpaceId::new("s-1");
        let did = Did::new("did:key:alice");

        let encrypted = cipher
            .encrypt_change(b"some diff bytes", &key, &space, 0, &did)
            .unwrap();
        assert_ne!(encrypted.ciphertext, b"some diff bytes");

        let decrypted = cipher.decrypt_change(&encrypted, &key).unwrap();
        assert_eq!(decrypted, b"some diff bytes");
    }

    #[test]
    fn chacha_cipher_rejects_wrong_key() {
        let cipher = ChaChaChangeCipher::default();
        let key = GroupKey::from_bytes(&[9u8; 32]).unwrap();
        let other = GroupKey::from_bytes(&[10u8; 32]).unwrap();
        let space = SpaceId::new("s-1");
        let did = Did::new("did:key:alice");

        let encrypted = cipher
            .encrypt_change(b"secret", &key, &space, 0, &did)
            .unwrap();
        assert!(cipher.decrypt_change(&encrypted, &other).is_err());
    }

    #[test]
    fn chacha_cipher_binds_generation_as_aad() {
        let cipher = ChaChaChangeCipher::default();
        let key = GroupKey::from_bytes(&[9u8; 32]).unwrap();
        let space = SpaceId::new("s-1");
        let did = Did::new("did:key:alice");

        let mut encrypted = cipher
            .encrypt_change(b"secret", &key, &space, 3, &did)
            .unwrap();
        encrypted.generation = 4;
        assert!(cipher.decrypt_change(&encrypted, &key).is_err());
    }

    #[test]
    fn xor_seal_roundtrips_to_the_recipient() {
        let alice = TestIdentity::new("did:key:alice");
        let bob = TestIdentity::new("did:key:bob");

        let sealed = alice.encrypt_for(b"wrapped key", bob.public_key()).unwrap();
        assert_ne!(sealed.ciphertext, b"wrapped key");
        assert_eq!(bob.decrypt_for_me(&sealed).unwrap(), b"wrapped key");
    }

    #[test]
    fn key_service_tracks_generations() {
        let keys = TestKeyService::default();
        let space = SpaceId::new("s-1");

        let k0 = keys.create_key(&space).unwrap();
        assert_eq!(keys.current_generation(&space), Some(0));

        let k1 = keys.rotate_key(&space).unwrap();
        assert_eq!(keys.current_generation(&space), Some(1));
        assert_ne!(k0, k1);

        assert_eq!(keys.key_by_generation(&space, 0), Some(k0));
        assert_eq!(keys.key_by_generation(&space, 1), Some(k1));
        assert_eq!(keys.key_by_generation(&space, 2), None);
    }

    #[test]
    fn key_service_import_advances_current() {
        let keys = TestKeyService::default();
        let space = SpaceId::new("s-1");
        let key = GroupKey::from_bytes(&[1u8; 32]).unwrap();

        keys.import_key(&space, key.clone(), 4).unwrap();
        assert_eq!(keys.current_generation(&space), Some(4));

        // An older import does not move current backwards
        keys.import_key(&space, key, 2).unwrap();
        assert_eq!(keys.current_generation(&space), Some(4));
    }

    #[test]
    fn list_engine_diffs_are_appended_entries() {
        let engine = ListEngine;
        let before = ListDoc(vec!["a".into()]);
        let after = engine.change(&before, &mut |doc| {
            doc.push("b");
            doc.push("c");
        });

        let diffs = engine.changes(&before, &after);
        assert_eq!(diffs.len(), 2);

        let rebuilt = engine.apply(&before, &diffs).unwrap();
        assert_eq!(rebuilt, after);
    }

    #[test]
    fn list_engine_snapshot_roundtrip() {
        let engine = ListEngine;
        let doc = ListDoc(vec!["x".into(), "y".into()]);
        let snapshot = engine.save(&doc);
        assert_eq!(engine.load(&snapshot).unwrap(), doc);
    }
}
