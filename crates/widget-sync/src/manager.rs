//! The browser-side hub: routes messages between channels, models and views.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace, warn};
use web_time::Instant;
use widget_sync_core::codec::{decode_frame, encode_frame};
use widget_sync_core::value::collect_refs;
use widget_sync_core::{
    Envelope, Frame, MessageKind, ModelId, Patch, PropertyChange, PropertyStore,
    SubscriptionId,
};
use widget_sync_dom::{Dom, NodeId};

use crate::binder::{Binder, BindingKey, BindingState, ViewAction, ViewRegistry};
use crate::channel::{Channel, ChannelEvent, ChannelState, CommChannel};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::reconnect::ReconnectPolicy;
use crate::sequencer::Sequencer;
use crate::transport::Transport;
use crate::{ChannelId, MountId};

/// A contained error, as kept in the local history and reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub channel_id: Option<ChannelId>,
    pub model_id: Option<ModelId>,
    pub code: String,
    pub message: String,
}

struct Model {
    channel: ChannelId,
    type_tag: String,
    store: PropertyStore,
}

struct Retry {
    attempt: u32,
    due: Instant,
}

struct ChannelSlot {
    channel: Box<dyn Channel>,
    retry: Option<Retry>,
}

/// Reorder buffer of one model, tied to the channel whose numbering it
/// follows.
struct Ordering {
    channel: ChannelId,
    sequencer: Sequencer<Envelope>,
}

/// Owns the document, every model and every channel of one page.
///
/// Created by [`CommManager::init`] and shut down by
/// [`CommManager::teardown`]; there is no ambient instance. Everything runs
/// on the caller's thread: [`CommManager::poll`] pumps the channels,
/// dispatches what arrived and flushes what is due.
pub struct CommManager {
    config: SyncConfig,
    dom: Dom,
    binder: Binder,
    channels: IndexMap<ChannelId, ChannelSlot>,
    models: IndexMap<ModelId, Model>,
    mounts: IndexMap<MountId, NodeId>,
    sequencers: HashMap<ModelId, Ordering>,
    outbox: VecDeque<(ChannelId, Envelope)>,
    diagnostics: VecDeque<Diagnostic>,
    reconnect: Box<dyn ReconnectPolicy>,
    active: bool,
}

impl std::fmt::Debug for CommManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommManager")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("mounts", &self.mounts)
            .field("binder", &self.binder)
            .field("outbox", &self.outbox.len())
            .field("active", &self.active)
            .finish()
    }
}

impl CommManager {
    pub fn init(config: SyncConfig, views: ViewRegistry) -> Self {
        Self::with_dom(config, views, Dom::new())
    }

    /// Like [`CommManager::init`], rendering into an existing document.
    pub fn with_dom(config: SyncConfig, views: ViewRegistry, dom: Dom) -> Self {
        debug!(?config, "comm manager initialised");
        Self {
            binder: Binder::new(views, config.render.batch),
            reconnect: config.reconnect.policy(),
            config,
            dom,
            channels: IndexMap::new(),
            models: IndexMap::new(),
            mounts: IndexMap::new(),
            sequencers: HashMap::new(),
            outbox: VecDeque::new(),
            diagnostics: VecDeque::new(),
            active: true,
        }
    }

    /// Closes every channel and disposes every model and view. Calling it
    /// again does nothing.
    pub fn teardown(&mut self) {
        if !self.active {
            return;
        }
        let channels: Vec<ChannelId> = self.channels.keys().cloned().collect();
        for id in channels {
            self.close_channel(&id);
        }
        let models: Vec<ModelId> = self.models.keys().cloned().collect();
        for id in models {
            self.dispose_model(&id);
        }
        self.binder.clear(&mut self.dom);
        self.sequencers.clear();
        self.outbox.clear();
        self.active = false;
        debug!("comm manager torn down");
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    pub fn dom_mut(&mut self) -> &mut Dom {
        &mut self.dom
    }

    pub fn views_mut(&mut self) -> &mut ViewRegistry {
        self.binder.views_mut()
    }

    /// Replaces the reconnect policy chosen by the config.
    pub fn set_reconnect_policy<P: ReconnectPolicy + 'static>(&mut self, policy: P) {
        self.reconnect = Box::new(policy);
    }

    // ── channels ──────────────────────────────────────────────────────────

    /// Registers `channel` under `id`, closing any channel it replaces
    /// (which disposes that channel's models).
    pub fn register_channel(&mut self, id: &str, mut channel: Box<dyn Channel>) {
        if !self.active {
            warn!(channel = id, "manager is torn down; closing new channel");
            channel.close();
            return;
        }
        self.close_channel(id);
        let state = channel.state();
        debug!(channel = id, ?state, "channel registered");
        // A channel that could not open yet is retried on the next poll.
        let retry = (state == ChannelState::Connecting).then(|| Retry {
            attempt: 1,
            due: Instant::now(),
        });
        self.channels
            .insert(id.to_string(), ChannelSlot { channel, retry });
    }

    /// Opens a [`CommChannel`] over `transport` and registers it.
    pub fn connect<T: Transport + 'static>(&mut self, id: &str, transport: T) {
        self.register_channel(id, Box::new(CommChannel::open(transport)));
    }

    pub fn channel_state(&self, id: &str) -> Option<ChannelState> {
        self.channels.get(id).map(|slot| slot.channel.state())
    }

    /// Closes channel `id` and disposes every model it owns. Returns
    /// whether the channel existed.
    pub fn close_channel(&mut self, id: &str) -> bool {
        let Some(mut slot) = self.channels.shift_remove(id) else {
            return false;
        };
        slot.channel.close();
        let owned: Vec<ModelId> = self
            .models
            .iter()
            .filter(|(_, m)| m.channel == id)
            .map(|(k, _)| k.clone())
            .collect();
        for model_id in &owned {
            self.dispose_model(model_id);
            self.binder.forget(model_id);
        }
        self.sequencers.retain(|_, o| o.channel != id);
        self.outbox.retain(|(channel, _)| channel != id);
        debug!(channel = id, models = owned.len(), "channel closed");
        true
    }

    // ── mounts ────────────────────────────────────────────────────────────

    /// Names `node` as mount point `id`.
    pub fn register_mount(&mut self, id: &str, node: NodeId) -> Result<(), SyncError> {
        if !self.dom.contains(node) {
            return Err(SyncError::UnknownMount(id.to_string()));
        }
        self.mounts.insert(id.to_string(), node);
        Ok(())
    }

    /// The node of mount `id`, created as `<div data-mount="id">` under the
    /// document root when it does not exist yet.
    pub fn mount_point(&mut self, id: &str) -> Result<NodeId, SyncError> {
        if let Some(node) = self.mounts.get(id) {
            return Ok(*node);
        }
        let node = self.dom.create_element("div");
        let root = self.dom.root();
        self.dom
            .set_attribute(node, "data-mount", id)
            .and_then(|()| self.dom.append_child(root, node))
            .map_err(|_| SyncError::UnknownMount(id.to_string()))?;
        self.mounts.insert(id.to_string(), node);
        Ok(node)
    }

    pub fn mount(&self, id: &str) -> Option<NodeId> {
        self.mounts.get(id).copied()
    }

    // ── models ────────────────────────────────────────────────────────────

    pub fn model(&self, id: &str) -> Option<&PropertyStore> {
        self.models.get(id).map(|m| &m.store)
    }

    pub fn model_type(&self, id: &str) -> Option<&str> {
        self.models.get(id).map(|m| m.type_tag.as_str())
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Subscribes to property changes and host events of model `id`.
    pub fn subscribe<F>(&mut self, id: &str, listener: F) -> Result<SubscriptionId, SyncError>
    where
        F: FnMut(&PropertyChange) + 'static,
    {
        let model = self
            .models
            .get_mut(id)
            .ok_or_else(|| SyncError::UnknownModel(id.to_string()))?;
        Ok(model.store.subscribe(listener))
    }

    pub fn binding_state(&self, model_id: &str, mount_id: &str) -> BindingState {
        self.binder.state(&BindingKey::new(model_id, mount_id))
    }

    // ── inbound ───────────────────────────────────────────────────────────

    /// Decodes and dispatches one frame received on `channel_id`.
    pub fn dispatch_frame(&mut self, channel_id: &str, frame: &Frame) -> Result<(), SyncError> {
        let limit = self.config.max_frame_bytes;
        let decoded = if frame.len() > limit {
            Err(SyncError::FrameTooLarge {
                size: frame.len(),
                limit,
            })
        } else {
            decode_frame(frame).map_err(SyncError::from)
        };
        match decoded {
            Ok(env) => self.dispatch(channel_id, env),
            Err(err) => {
                self.report(Some(channel_id), &err);
                Err(err)
            }
        }
    }

    /// Dispatches one message received on `channel_id`.
    ///
    /// Sequenced messages are released in order per model. Failures are
    /// contained: they are logged, recorded as diagnostics and returned,
    /// and never affect other models.
    pub fn dispatch(&mut self, channel_id: &str, env: Envelope) -> Result<(), SyncError> {
        if !self.channels.contains_key(channel_id) {
            let err = SyncError::UnknownChannel(channel_id.to_string());
            self.report(None, &err);
            return Err(err);
        }
        let released = match env.seq {
            Some(seq) if self.config.reorder.enabled => {
                let model_id = env.model_id.clone();
                let max_pending = self.config.reorder.max_pending;
                let out = self
                    .sequencers
                    .entry(model_id.clone())
                    .or_insert_with(|| Ordering {
                        channel: channel_id.to_string(),
                        sequencer: Sequencer::new(max_pending),
                    })
                    .sequencer
                    .push(seq, env);
                if out.duplicate {
                    debug!(model = %model_id, seq, "dropping duplicate message");
                }
                if let Some(gap) = out.skipped {
                    let err = SyncError::SequenceGap {
                        model_id,
                        from: gap.start,
                        to: gap.end,
                    };
                    self.report(Some(channel_id), &err);
                }
                out.ready
            }
            _ => vec![env],
        };

        let mut first_err = None;
        for env in released {
            if let Err(err) = self.apply(channel_id, env) {
                self.report(Some(channel_id), &err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn apply(&mut self, channel_id: &str, env: Envelope) -> Result<(), SyncError> {
        trace!(channel = channel_id, model = %env.model_id, kind = env.kind.as_str(), seq = ?env.seq, "dispatch");
        match env.kind {
            MessageKind::Create => self.create_model(channel_id, &env),
            MessageKind::Patch => {
                let patches = env.patches()?;
                let model = self
                    .models
                    .get_mut(&env.model_id)
                    .ok_or_else(|| SyncError::UnknownModel(env.model_id.clone()))?;
                let changed = model
                    .store
                    .apply_batch(&patches)
                    .map_err(|e| SyncError::from_patch(&env.model_id, e))?;
                let errors = self
                    .binder
                    .notify(&mut self.dom, &env.model_id, &model.store, &changed);
                self.report_all(Some(channel_id), errors);
                Ok(())
            }
            MessageKind::Event => {
                let patches = env.patches()?;
                if patches.iter().any(|p| !p.is_event()) {
                    return Err(widget_sync_core::CodecError::InvalidPayload(
                        "event messages carry only events".into(),
                    )
                    .into());
                }
                let model = self
                    .models
                    .get_mut(&env.model_id)
                    .ok_or_else(|| SyncError::UnknownModel(env.model_id.clone()))?;
                model
                    .store
                    .apply_batch(&patches)
                    .map_err(|e| SyncError::from_patch(&env.model_id, e))?;
                let mut errors = Vec::new();
                for patch in &patches {
                    if let Patch::Event { name, data } = patch {
                        errors.extend(self.binder.model_event(&mut self.dom, &env.model_id, name, data));
                    }
                }
                self.report_all(Some(channel_id), errors);
                Ok(())
            }
            MessageKind::Dispose => {
                if !self.dispose_model(&env.model_id) {
                    return Err(SyncError::UnknownModel(env.model_id));
                }
                Ok(())
            }
            MessageKind::Diagnostic => {
                let payload = env.diagnostic_payload()?;
                warn!(channel = channel_id, model = %env.model_id, code = %payload.code, "host diagnostic: {}", payload.message);
                self.record(Diagnostic {
                    channel_id: Some(channel_id.to_string()),
                    model_id: Some(env.model_id),
                    code: payload.code,
                    message: payload.message,
                });
                Ok(())
            }
        }
    }

    /// Creates the model and its references. A `create` for a model this
    /// channel already owns is a resynchronisation: the store is re-seeded
    /// in place and its views follow. Every store is validated before any
    /// is registered.
    fn create_model(&mut self, channel_id: &str, env: &Envelope) -> Result<(), SyncError> {
        let payload = env.create_payload()?;
        if self.owned_elsewhere(&env.model_id, channel_id) {
            return Err(SyncError::DuplicateModel(env.model_id.clone()));
        }
        let mut staged: Vec<(String, String, PropertyStore)> = Vec::new();
        for reference in &payload.references {
            if reference.id == env.model_id
                || staged.iter().any(|(id, ..)| *id == reference.id)
                || self.owned_elsewhere(&reference.id, channel_id)
            {
                continue;
            }
            let store = PropertyStore::from_props(reference.schema.clone(), &reference.props)
                .map_err(|e| SyncError::from_patch(&reference.id, e))?;
            staged.push((reference.id.clone(), reference.type_tag.clone(), store));
        }
        let store = PropertyStore::from_props(payload.schema, &payload.props)
            .map_err(|e| SyncError::from_patch(&env.model_id, e))?;
        staged.push((env.model_id.clone(), payload.type_tag, store));

        for (id, type_tag, store) in staged {
            self.upsert_model(channel_id, &id, &type_tag, store);
        }
        for id in collect_refs(&Value::Object(payload.props)) {
            if !self.models.contains_key(&id) {
                warn!(model = %env.model_id, reference = %id, "reference to a model that does not exist yet");
            }
        }
        match payload.mount {
            Some(mount) => self.bind_model(&env.model_id, &mount),
            None => Ok(()),
        }
    }

    fn owned_elsewhere(&self, model_id: &str, channel_id: &str) -> bool {
        self.models
            .get(model_id)
            .is_some_and(|m| m.channel != channel_id)
    }

    fn upsert_model(&mut self, channel_id: &str, id: &str, type_tag: &str, store: PropertyStore) {
        let Some(model) = self.models.get_mut(id) else {
            self.binder.forget(id);
            self.models.insert(
                id.to_string(),
                Model {
                    channel: channel_id.to_string(),
                    type_tag: type_tag.to_string(),
                    store,
                },
            );
            debug!(channel = channel_id, model = id, type_tag, "model created");
            return;
        };
        let changed = model.store.replace_with(store);
        let retyped = model.type_tag != type_tag;
        model.type_tag = type_tag.to_string();
        debug!(channel = channel_id, model = id, changed = changed.len(), retyped, "model resynchronised");

        let mut errors = if retyped {
            Vec::new()
        } else {
            self.binder.notify(&mut self.dom, id, &model.store, &changed)
        };
        for key in self.binder.keys_for(id) {
            let state = self.binder.state(&key);
            let rerender = state == BindingState::Degraded || (retyped && state == BindingState::Bound);
            if !rerender {
                continue;
            }
            self.binder.dispose_binding(&mut self.dom, &key);
            if let Err(err) = self.bind_model(id, &key.mount_id) {
                errors.push(err);
            }
        }
        self.report_all(Some(channel_id), errors);
    }

    /// Disposes the views of `id` and removes it. Later messages for it are
    /// reported as unknown-model drops.
    fn dispose_model(&mut self, id: &str) -> bool {
        self.binder.dispose(&mut self.dom, id);
        let removed = self.models.shift_remove(id).is_some();
        if removed {
            debug!(model = id, "model disposed");
        }
        removed
    }

    // ── binding ───────────────────────────────────────────────────────────

    /// Renders model `model_id` into mount `mount_id`.
    pub fn bind(&mut self, model_id: &str, mount_id: &str) -> Result<(), SyncError> {
        let result = self.bind_model(model_id, mount_id);
        if let Err(err) = &result {
            self.report(None, err);
        }
        result
    }

    fn bind_model(&mut self, model_id: &str, mount_id: &str) -> Result<(), SyncError> {
        let node = *self
            .mounts
            .get(mount_id)
            .ok_or_else(|| SyncError::UnknownMount(mount_id.to_string()))?;
        let model = self
            .models
            .get(model_id)
            .ok_or_else(|| SyncError::UnknownModel(model_id.to_string()))?;
        self.binder.bind(
            &mut self.dom,
            BindingKey::new(model_id, mount_id),
            node,
            &model.type_tag,
            &model.store,
        )
    }

    /// Disposes every view of `model_id`; the model itself stays. Returns
    /// how many views were live.
    pub fn unbind(&mut self, model_id: &str) -> usize {
        self.binder.dispose(&mut self.dom, model_id)
    }

    // ── outbound ──────────────────────────────────────────────────────────

    /// Queues a transient event for the host on the model's channel.
    pub fn emit(&mut self, model_id: &str, name: &str, data: Value) -> Result<(), SyncError> {
        let model = self
            .models
            .get(model_id)
            .ok_or_else(|| SyncError::UnknownModel(model_id.to_string()))?;
        self.outbox
            .push_back((model.channel.clone(), Envelope::event(model_id, name, data)));
        Ok(())
    }

    /// Applies a browser-originated change locally, updates the views and
    /// queues the patch for the host.
    pub fn emit_patch(&mut self, model_id: &str, patch: Patch) -> Result<Vec<String>, SyncError> {
        let model = self
            .models
            .get_mut(model_id)
            .ok_or_else(|| SyncError::UnknownModel(model_id.to_string()))?;
        let changed = model
            .store
            .apply_patch(&patch)
            .map_err(|e| SyncError::from_patch(model_id, e))?;
        let channel = model.channel.clone();
        let errors = self
            .binder
            .notify(&mut self.dom, model_id, &model.store, &changed);
        self.outbox
            .push_back((channel.clone(), Envelope::patch(model_id, &[patch])));
        self.report_all(Some(&channel), errors);
        Ok(changed)
    }

    /// Fires `event` at `node` and lets the owning views react. Returns the
    /// number of listeners that were handled by a view.
    pub fn dispatch_dom_event(&mut self, node: NodeId, event: &str) -> usize {
        let hits = self.dom.fire(node, event);
        let mut handled = 0;
        for listener in hits {
            let Some(key) = self.binder.key_for_owner(listener.owner).cloned() else {
                continue;
            };
            let Some(model) = self.models.get(&key.model_id) else {
                continue;
            };
            let actions = match self
                .binder
                .dom_event(&mut self.dom, &key, &listener.handler, &model.store)
            {
                Ok(actions) => actions,
                Err(err) => {
                    self.report(None, &err);
                    continue;
                }
            };
            handled += 1;
            for action in actions {
                let result = match action {
                    ViewAction::Emit { name, data } => self.emit(&key.model_id, &name, data),
                    ViewAction::Patch(patch) => self.emit_patch(&key.model_id, patch).map(drop),
                };
                if let Err(err) = result {
                    self.report(None, &err);
                }
            }
        }
        handled
    }

    // ── pumping ───────────────────────────────────────────────────────────

    /// Runs one cycle. Due reconnects run first, then inbound frames are
    /// dispatched, batched renders flushed and queued messages handed to the
    /// channels. Lost connections are scheduled for reconnection. Returns
    /// the number of inbound frames dispatched.
    pub fn poll(&mut self, now: Instant) -> usize {
        if !self.active {
            return 0;
        }
        self.retry_due(now);
        self.deliver_outbox();

        let mut inbound = Vec::new();
        let mut opened = Vec::new();
        let mut disconnected = Vec::new();
        for (id, slot) in self.channels.iter_mut() {
            for event in slot.channel.poll() {
                match event {
                    ChannelEvent::Opened => {
                        slot.retry = None;
                        debug!(channel = %id, "channel opened");
                        opened.push(id.clone());
                    }
                    ChannelEvent::Message(frame) => inbound.push((id.clone(), frame)),
                    ChannelEvent::Disconnected(reason) => {
                        warn!(channel = %id, %reason, "channel lost its connection");
                        disconnected.push(id.clone());
                    }
                }
            }
        }

        for id in opened {
            self.restart_numbering(&id);
        }
        let dispatched = inbound.len();
        for (id, frame) in inbound {
            // Failures are reported as diagnostics by dispatch itself.
            let _ = self.dispatch_frame(&id, &frame);
        }
        self.flush_renders();
        self.deliver_outbox();
        let mut reopened = Vec::new();
        for (id, slot) in self.channels.iter_mut() {
            for event in slot.channel.flush() {
                match event {
                    ChannelEvent::Opened => {
                        slot.retry = None;
                        reopened.push(id.clone());
                    }
                    ChannelEvent::Message(_) => {}
                    ChannelEvent::Disconnected(reason) => {
                        warn!(channel = %id, %reason, "channel lost its connection");
                        disconnected.push(id.clone());
                    }
                }
            }
        }
        for id in reopened {
            self.restart_numbering(&id);
        }
        for id in disconnected {
            self.schedule_retry(&id, 1, now);
        }
        dispatched
    }

    /// A (re)opened connection starts every model's numbering at 0 again;
    /// messages held from the previous connection are dropped.
    fn restart_numbering(&mut self, channel_id: &str) {
        let before = self.sequencers.len();
        self.sequencers.retain(|_, o| o.channel != channel_id);
        let restarted = before - self.sequencers.len();
        if restarted > 0 {
            debug!(channel = channel_id, models = restarted, "sequence numbering restarted");
        }
    }

    /// [`CommManager::poll`] at the current time.
    pub fn poll_now(&mut self) -> usize {
        self.poll(Instant::now())
    }

    fn retry_due(&mut self, now: Instant) {
        let due: Vec<(ChannelId, u32)> = self
            .channels
            .iter()
            .filter_map(|(id, slot)| {
                slot.retry
                    .as_ref()
                    .filter(|r| r.due <= now)
                    .map(|r| (id.clone(), r.attempt))
            })
            .collect();
        for (id, attempt) in due {
            let Some(slot) = self.channels.get_mut(&id) else {
                continue;
            };
            match slot.channel.reconnect() {
                Ok(()) => {
                    slot.retry = None;
                    debug!(channel = %id, attempt, "reconnected");
                }
                Err(err) => {
                    debug!(channel = %id, attempt, %err, "reconnect failed");
                    self.schedule_retry(&id, attempt.saturating_add(1), now);
                }
            }
        }
    }

    fn schedule_retry(&mut self, id: &str, attempt: u32, now: Instant) {
        match self.reconnect.next_delay(attempt) {
            Some(delay) => {
                if let Some(slot) = self.channels.get_mut(id) {
                    slot.retry = Some(Retry {
                        attempt,
                        due: now + delay,
                    });
                    debug!(channel = id, attempt, ?delay, "reconnect scheduled");
                }
            }
            None => {
                warn!(channel = id, attempt, "giving up on channel");
                let err = SyncError::ChannelClosed(id.to_string());
                self.report(Some(id), &err);
                self.close_channel(id);
            }
        }
    }

    fn deliver_outbox(&mut self) {
        while let Some((channel_id, env)) = self.outbox.pop_front() {
            let frame = match encode_frame(&env, self.config.wire_format) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(channel = %channel_id, model = %env.model_id, %err, "dropping unencodable message");
                    continue;
                }
            };
            match self.channels.get_mut(&channel_id) {
                Some(slot) => {
                    if let Err(err) = slot.channel.send(frame) {
                        warn!(channel = %channel_id, %err, "dropping outbound message");
                    }
                }
                None => warn!(channel = %channel_id, "dropping message for unknown channel"),
            }
        }
    }

    fn flush_renders(&mut self) {
        if !self.config.render.batch {
            return;
        }
        let models = &self.models;
        let errors = self
            .binder
            .flush(&mut self.dom, |id| models.get(id).map(|m| &m.store));
        self.report_all(None, errors);
    }

    // ── diagnostics ───────────────────────────────────────────────────────

    /// Retained diagnostics, oldest first.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.drain(..).collect()
    }

    fn report_all(&mut self, channel_id: Option<&str>, errors: Vec<SyncError>) {
        for err in &errors {
            self.report(channel_id, err);
        }
    }

    /// Logs `err`, keeps it in the history and, when configured, queues it
    /// for the host on the relevant channel.
    fn report(&mut self, channel_id: Option<&str>, err: &SyncError) {
        warn!(code = err.code(), %err, "contained error");
        let model_id = err.model_id().map(str::to_string);
        let channel_id = channel_id.map(str::to_string).or_else(|| {
            model_id
                .as_deref()
                .and_then(|id| self.models.get(id))
                .map(|m| m.channel.clone())
        });
        let diagnostic = Diagnostic {
            channel_id,
            model_id,
            code: err.code().to_string(),
            message: err.to_string(),
        };
        if self.config.diagnostics.send_to_host {
            if let Some(channel) = diagnostic
                .channel_id
                .as_ref()
                .filter(|c| self.channels.contains_key(c.as_str()))
            {
                let env = Envelope::diagnostic(
                    diagnostic.model_id.as_deref().unwrap_or_default(),
                    &diagnostic.code,
                    &diagnostic.message,
                );
                self.outbox.push_back((channel.clone(), env));
            }
        }
        self.record(diagnostic);
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        let cap = self.config.diagnostics.history;
        if cap == 0 {
            return;
        }
        while self.diagnostics.len() >= cap {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(diagnostic);
    }
}

impl Drop for CommManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
