//! The replication adapter: encrypted multi-party spaces over the relay.
//!
//! [`SpaceSync`] maintains a set of CRDT spaces, broadcasts local changes as
//! encrypted `content` envelopes, applies remote ones, and handles
//! membership changes with group-key rotation. Per peer, a space moves
//! `unknown → member (has current key) → member (new key after rotation)`;
//! eviction is implicit — a removed member simply stops receiving rotation
//! envelopes and loses the ability to decrypt later generations.

use crate::capabilities::{ChangeCipher, CrdtEngine, GroupKey, GroupKeyService, Identity};
use crate::error::{CapabilityError, SpaceError};
use crate::payload::{pack_changes, split_changes, ContentPayload, InvitePayload, RotationPayload};
use crate::space::{MemberAction, MemberChange, SpaceId, SpaceInfo, SpaceType};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use weft_client::{RelayClient, Transport};
use weft_types::{Did, MessageEnvelope, MessageKind};

/// Handle identifier within one space.
type HandleId = u64;

/// Callback invoked after a remote change was applied to a space's document.
pub type RemoteUpdateCallback<D> = Arc<dyn Fn(&D) + Send + Sync>;

/// Callback invoked on local membership changes.
pub type MemberChangeCallback = Arc<dyn Fn(&MemberChange) + Send + Sync>;

/// Live state of one space: the document, the open handles, and the
/// encryption public keys of members this peer has invited (needed to wrap
/// rotated keys for them).
struct SpaceState<D> {
    info: SpaceInfo,
    doc: D,
    member_keys: HashMap<Did, Vec<u8>>,
    update_listeners: HashMap<HandleId, Vec<RemoteUpdateCallback<D>>>,
}

/// The replication adapter.
///
/// Cheap to clone; clones share the same space map and transport.
pub struct SpaceSync<T, E, I, K, C>
where
    T: Transport + 'static,
    E: CrdtEngine + 'static,
    I: Identity + 'static,
    K: GroupKeyService + 'static,
    C: ChangeCipher + 'static,
{
    inner: Arc<SyncInner<T, E, I, K, C>>,
}

impl<T, E, I, K, C> Clone for SpaceSync<T, E, I, K, C>
where
    T: Transport + 'static,
    E: CrdtEngine + 'static,
    I: Identity + 'static,
    K: GroupKeyService + 'static,
    C: ChangeCipher + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SyncInner<T: Transport + 'static, E: CrdtEngine, I, K, C> {
    client: RelayClient<T>,
    engine: E,
    identity: I,
    keys: K,
    cipher: C,
    spaces: Mutex<HashMap<SpaceId, SpaceState<E::Doc>>>,
    member_listeners: Mutex<Vec<MemberChangeCallback>>,
    next_handle_id: AtomicU64,
    started: AtomicBool,
}

impl<T, E, I, K, C> SpaceSync<T, E, I, K, C>
where
    T: Transport + 'static,
    E: CrdtEngine + 'static,
    I: Identity + 'static,
    K: GroupKeyService + 'static,
    C: ChangeCipher + 'static,
{
    /// Create an adapter over a connected [`RelayClient`].
    pub fn new(client: RelayClient<T>, engine: E, identity: I, keys: K, cipher: C) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                client,
                engine,
                identity,
                keys,
                cipher,
                spaces: Mutex::new(HashMap::new()),
                member_listeners: Mutex::new(Vec::new()),
                next_handle_id: AtomicU64::new(1),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to inbound envelopes on the transport adapter.
    ///
    /// Must be called once before remote changes can be applied. Envelope
    /// kinds this adapter does not handle are ignored, not errors.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .client
            .on_message(Arc::new(move |envelope: &MessageEnvelope| {
                inner.handle_envelope(envelope).map_err(|e| e.to_string())
            }));
    }

    /// Tear down: close all handles and drop every space.
    pub fn stop(&self) {
        self.inner.spaces.lock().unwrap().clear();
    }

    /// Create a new space with this peer as sole member and generation-0
    /// key material.
    pub fn create_space(
        &self,
        space_type: SpaceType,
        initial: E::Doc,
    ) -> Result<SpaceInfo, SpaceError> {
        let id = SpaceId::generate();
        self.inner.keys.create_key(&id)?;

        let info = SpaceInfo {
            id: id.clone(),
            space_type,
            members: vec![self.inner.identity.did()],
            created_at: Utc::now(),
        };

        self.inner.spaces.lock().unwrap().insert(
            id.clone(),
            SpaceState {
                info: info.clone(),
                doc: initial,
                member_keys: HashMap::new(),
                update_listeners: HashMap::new(),
            },
        );

        tracing::debug!("Created space {}", id);
        Ok(info)
    }

    /// Open a handle onto an existing space.
    pub fn open_space(&self, space_id: &SpaceId) -> Result<SpaceHandle<T, E, I, K, C>, SpaceError> {
        let mut spaces = self.inner.spaces.lock().unwrap();
        let state = spaces
            .get_mut(space_id)
            .ok_or_else(|| SpaceError::UnknownSpace(space_id.clone()))?;

        let handle_id = self.inner.next_handle_id.fetch_add(1, Ordering::Relaxed);
        state.update_listeners.insert(handle_id, Vec::new());

        Ok(SpaceHandle {
            sync: self.clone(),
            space_id: space_id.clone(),
            handle_id,
            closed: AtomicBool::new(false),
        })
    }

    /// Public description of a space, if known locally.
    pub fn space_info(&self, space_id: &SpaceId) -> Option<SpaceInfo> {
        self.inner
            .spaces
            .lock()
            .unwrap()
            .get(space_id)
            .map(|s| s.info.clone())
    }

    /// Subscribe to local membership-change notifications.
    pub fn on_member_change(&self, callback: MemberChangeCallback) {
        self.inner.member_listeners.lock().unwrap().push(callback);
    }

    /// Invite a member: record its encryption key, wrap the current group
    /// key for it, and send one `space-invite` carrying the wrapped key and
    /// an encrypted snapshot of the current document.
    pub async fn add_member(
        &self,
        space_id: &SpaceId,
        did: &Did,
        encryption_public_key: &[u8],
    ) -> Result<(), SpaceError> {
        let (info, snapshot) = {
            let mut spaces = self.inner.spaces.lock().unwrap();
            let state = spaces
                .get_mut(space_id)
                .ok_or_else(|| SpaceError::UnknownSpace(space_id.clone()))?;
            if !state.info.members.contains(did) {
                state.info.members.push(did.clone());
            }
            state
                .member_keys
                .insert(did.clone(), encryption_public_key.to_vec());
            (state.info.clone(), self.inner.engine.save(&state.doc))
        };

        let generation = self
            .inner
            .keys
            .current_generation(space_id)
            .ok_or_else(|| SpaceError::NoKey(space_id.clone()))?;
        let key = self
            .inner
            .keys
            .current_key(space_id)
            .ok_or_else(|| SpaceError::NoKey(space_id.clone()))?;

        let wrapped_key = self
            .inner
            .identity
            .encrypt_for(key.as_bytes(), encryption_public_key)?;
        let snapshot = self.inner.cipher.encrypt_change(
            &snapshot,
            &key,
            space_id,
            generation,
            &self.inner.identity.did(),
        )?;

        let payload = InvitePayload {
            space: info,
            generation,
            wrapped_key,
            snapshot,
        };
        let envelope =
            self.inner
                .signed_envelope(MessageKind::SpaceInvite, did, serde_json::to_value(&payload)?)?;
        self.inner.client.send(envelope).await?;

        self.inner.emit_member_change(MemberChange {
            space_id: space_id.clone(),
            did: did.clone(),
            action: MemberAction::Added,
        });
        Ok(())
    }

    /// Remove a member: rotate the group key to a new generation the removed
    /// peer cannot derive, and distribute it to every remaining member.
    pub async fn remove_member(&self, space_id: &SpaceId, did: &Did) -> Result<(), SpaceError> {
        let remaining = {
            let mut spaces = self.inner.spaces.lock().unwrap();
            let state = spaces
                .get_mut(space_id)
                .ok_or_else(|| SpaceError::UnknownSpace(space_id.clone()))?;
            state.info.members.retain(|m| m != did);
            state.member_keys.remove(did);

            let me = self.inner.identity.did();
            state
                .info
                .members
                .iter()
                .filter(|m| **m != me)
                .map(|m| (m.clone(), state.member_keys.get(m).cloned()))
                .collect::<Vec<_>>()
        };

        let new_key = self.inner.keys.rotate_key(space_id)?;
        let generation = self
            .inner
            .keys
            .current_generation(space_id)
            .ok_or_else(|| SpaceError::NoKey(space_id.clone()))?;

        for (member, public_key) in remaining {
            let Some(public_key) = public_key else {
                tracing::warn!(
                    "No encryption key recorded for {} in {}, skipping rekey envelope",
                    member,
                    space_id
                );
                continue;
            };
            let wrapped_key = self.inner.identity.encrypt_for(new_key.as_bytes(), &public_key)?;
            let payload = RotationPayload {
                space_id: space_id.clone(),
                generation,
                wrapped_key,
            };
            let envelope = self.inner.signed_envelope(
                MessageKind::GroupKeyRotation,
                &member,
                serde_json::to_value(&payload)?,
            )?;
            if let Err(e) = self.inner.client.send(envelope).await {
                tracing::warn!("Rekey envelope to {} failed: {}", member, e);
            }
        }

        tracing::debug!("Rotated {} to generation {}", space_id, generation);
        self.inner.emit_member_change(MemberChange {
            space_id: space_id.clone(),
            did: did.clone(),
            action: MemberAction::Removed,
        });
        Ok(())
    }
}

/// A handle bound to one space.
///
/// Closing a handle detaches only that handle; other handles onto the same
/// space keep working.
pub struct SpaceHandle<T, E, I, K, C>
where
    T: Transport + 'static,
    E: CrdtEngine + 'static,
    I: Identity + 'static,
    K: GroupKeyService + 'static,
    C: ChangeCipher + 'static,
{
    sync: SpaceSync<T, E, I, K, C>,
    space_id: SpaceId,
    handle_id: HandleId,
    closed: AtomicBool,
}

impl<T, E, I, K, C> SpaceHandle<T, E, I, K, C>
where
    T: Transport + 'static,
    E: CrdtEngine + 'static,
    I: Identity + 'static,
    K: GroupKeyService + 'static,
    C: ChangeCipher + 'static,
{
    /// The space this handle is bound to.
    pub fn space_id(&self) -> &SpaceId {
        &self.space_id
    }

    /// A snapshot of the current document.
    pub fn read(&self) -> Result<E::Doc, SpaceError> {
        self.ensure_open()?;
        let spaces = self.sync.inner.spaces.lock().unwrap();
        let state = spaces
            .get(&self.space_id)
            .ok_or_else(|| SpaceError::UnknownSpace(self.space_id.clone()))?;
        Ok(state.doc.clone())
    }

    /// Apply a local mutation and broadcast the resulting diffs.
    ///
    /// The broadcast is fire-and-forget: the local mutation has already
    /// committed and is never rolled back by a transport problem. With no
    /// current key (e.g. mid-rotation) the broadcast is skipped silently.
    pub fn transact(&self, mutator: &mut dyn FnMut(&mut E::Doc)) -> Result<(), SpaceError> {
        self.ensure_open()?;
        let inner = &self.sync.inner;

        let (diffs, members) = {
            let mut spaces = inner.spaces.lock().unwrap();
            let state = spaces
                .get_mut(&self.space_id)
                .ok_or_else(|| SpaceError::UnknownSpace(self.space_id.clone()))?;

            let before = state.doc.clone();
            let after = inner.engine.change(&before, mutator);
            let diffs = inner.engine.changes(&before, &after);
            state.doc = after;
            (diffs, state.info.members.clone())
        };

        if !diffs.is_empty() {
            inner.broadcast_changes(&self.space_id, diffs, members);
        }
        Ok(())
    }

    /// Register a callback invoked whenever a remote `content` message is
    /// successfully applied to this space's document.
    pub fn on_remote_update(&self, callback: RemoteUpdateCallback<E::Doc>) -> Result<(), SpaceError> {
        self.ensure_open()?;
        let mut spaces = self.sync.inner.spaces.lock().unwrap();
        let state = spaces
            .get_mut(&self.space_id)
            .ok_or_else(|| SpaceError::UnknownSpace(self.space_id.clone()))?;
        if let Some(listeners) = state.update_listeners.get_mut(&self.handle_id) {
            listeners.push(callback);
        }
        Ok(())
    }

    /// Detach this handle. The shared space state is unaffected.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut spaces = self.sync.inner.spaces.lock().unwrap();
        if let Some(state) = spaces.get_mut(&self.space_id) {
            state.update_listeners.remove(&self.handle_id);
        }
    }

    fn ensure_open(&self) -> Result<(), SpaceError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SpaceError::HandleClosed)
        } else {
            Ok(())
        }
    }
}

impl<T, E, I, K, C> SyncInner<T, E, I, K, C>
where
    T: Transport + 'static,
    E: CrdtEngine + 'static,
    I: Identity,
    K: GroupKeyService,
    C: ChangeCipher,
{
    /// Encrypt diffs under the current generation and send one `content`
    /// envelope per member, excluding self. Detached sends; failures are
    /// logged, never propagated.
    fn broadcast_changes(&self, space_id: &SpaceId, diffs: Vec<Vec<u8>>, members: Vec<Did>) {
        let Some(generation) = self.keys.current_generation(space_id) else {
            tracing::debug!("No key for {}, skipping broadcast", space_id);
            return;
        };
        let Some(key) = self.keys.current_key(space_id) else {
            tracing::debug!("No key for {}, skipping broadcast", space_id);
            return;
        };

        let me = self.identity.did();
        let (buffer, change_lengths) = pack_changes(&diffs);
        let change = match self
            .cipher
            .encrypt_change(&buffer, &key, space_id, generation, &me)
        {
            Ok(change) => change,
            Err(e) => {
                tracing::warn!("Encrypting changes for {} failed: {}", space_id, e);
                return;
            }
        };

        let payload = ContentPayload {
            space_id: space_id.clone(),
            change_lengths,
            change,
        };
        let value = match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Encoding content payload failed: {}", e);
                return;
            }
        };

        for member in members.into_iter().filter(|m| *m != me) {
            let envelope = match self.signed_envelope(MessageKind::Content, &member, value.clone())
            {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!("Building content envelope for {} failed: {}", member, e);
                    continue;
                }
            };
            let client = self.client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.send(envelope).await {
                    tracing::debug!("Content broadcast to {} failed: {}", member, e);
                }
            });
        }
    }

    /// Route one inbound envelope. Unknown kinds are a no-op.
    fn handle_envelope(&self, envelope: &MessageEnvelope) -> Result<(), SpaceError> {
        match envelope.kind {
            MessageKind::Content => self.handle_content(envelope),
            MessageKind::SpaceInvite => self.handle_invite(envelope),
            MessageKind::GroupKeyRotation => self.handle_rotation(envelope),
            _ => Ok(()),
        }
    }

    fn handle_content(&self, envelope: &MessageEnvelope) -> Result<(), SpaceError> {
        let payload: ContentPayload = serde_json::from_value(envelope.payload.clone())?;

        // The space may not exist here yet (invite still in flight) — not an
        // error.
        if !self
            .spaces
            .lock()
            .unwrap()
            .contains_key(&payload.space_id)
        {
            tracing::debug!("Content for unknown space {} ignored", payload.space_id);
            return Ok(());
        }

        // A missing generation is an expected, permanent condition for a
        // peer removed before it was minted.
        let Some(key) = self
            .keys
            .key_by_generation(&payload.space_id, payload.change.generation)
        else {
            tracing::debug!(
                "No key for {} generation {}, dropping content",
                payload.space_id,
                payload.change.generation
            );
            return Ok(());
        };

        let buffer = match self.cipher.decrypt_change(&payload.change, &key) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::debug!("Undecryptable content for {}: {}", payload.space_id, e);
                return Ok(());
            }
        };
        let diffs = split_changes(&buffer, &payload.change_lengths)?;

        let (doc, listeners) = {
            let mut spaces = self.spaces.lock().unwrap();
            let state = spaces
                .get_mut(&payload.space_id)
                .ok_or_else(|| SpaceError::UnknownSpace(payload.space_id.clone()))?;
            state.doc = self.engine.apply(&state.doc, &diffs)?;
            let listeners: Vec<RemoteUpdateCallback<E::Doc>> = state
                .update_listeners
                .values()
                .flatten()
                .cloned()
                .collect();
            (state.doc.clone(), listeners)
        };

        for listener in listeners {
            listener(&doc);
        }
        Ok(())
    }

    fn handle_invite(&self, envelope: &MessageEnvelope) -> Result<(), SpaceError> {
        let payload: InvitePayload = serde_json::from_value(envelope.payload.clone())?;
        let space_id = payload.space.id.clone();

        if self.spaces.lock().unwrap().contains_key(&space_id) {
            tracing::debug!("Duplicate invite for {} ignored", space_id);
            return Ok(());
        }

        let key_bytes = self.identity.decrypt_for_me(&payload.wrapped_key)?;
        let key = GroupKey::from_bytes(&key_bytes).ok_or_else(|| {
            SpaceError::Capability(CapabilityError::InvalidKey(
                "wrapped group key has wrong length".to_string(),
            ))
        })?;
        self.keys
            .import_key(&space_id, key.clone(), payload.generation)?;

        let snapshot = self.cipher.decrypt_change(&payload.snapshot, &key)?;
        let doc = self.engine.load(&snapshot)?;

        self.spaces.lock().unwrap().insert(
            space_id.clone(),
            SpaceState {
                info: payload.space,
                doc,
                member_keys: HashMap::new(),
                update_listeners: HashMap::new(),
            },
        );
        tracing::info!(
            "Joined space {} at generation {} via invite from {}",
            space_id,
            payload.generation,
            envelope.from_did
        );
        Ok(())
    }

    fn handle_rotation(&self, envelope: &MessageEnvelope) -> Result<(), SpaceError> {
        let payload: RotationPayload = serde_json::from_value(envelope.payload.clone())?;

        let key_bytes = self.identity.decrypt_for_me(&payload.wrapped_key)?;
        let key = GroupKey::from_bytes(&key_bytes).ok_or_else(|| {
            SpaceError::Capability(CapabilityError::InvalidKey(
                "wrapped group key has wrong length".to_string(),
            ))
        })?;
        self.keys
            .import_key(&payload.space_id, key, payload.generation)?;

        tracing::debug!(
            "Imported generation {} for {}",
            payload.generation,
            payload.space_id
        );
        Ok(())
    }

    fn signed_envelope(
        &self,
        kind: MessageKind,
        to: &Did,
        payload: serde_json::Value,
    ) -> Result<MessageEnvelope, SpaceError> {
        let envelope = MessageEnvelope::new(kind, self.identity.did(), to.clone(), payload);
        let signature = self.identity.sign(&envelope.canonical_bytes()?);
        Ok(envelope.with_signature(BASE64.encode(signature)))
    }

    fn emit_member_change(&self, change: MemberChange) {
        let listeners: Vec<MemberChangeCallback> =
            self.member_listeners.lock().unwrap().clone();
        for listener in listeners {
            listener(&change);
        }
    }
}
