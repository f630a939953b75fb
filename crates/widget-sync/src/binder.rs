//! Model/view binding.
//!
//! A binding attaches one model to one mount point through the view adapter
//! registered for the model's type tag. The binder owns every live view
//! instance and decides, per change, between an incremental update and a
//! full re-render. Adapter failures are contained: the failing binding is
//! marked [`BindingState::Degraded`] and every other binding keeps working.

use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::{debug, warn};
use widget_sync_core::{ModelId, Patch, PropertyStore};
use widget_sync_dom::{Dom, NodeId};
use widget_sync_template::new_owner;

use crate::error::{SyncError, ViewError};
use crate::MountId;

/// What a view gets to work with while rendering or reacting.
pub struct ViewContext<'a> {
    pub dom: &'a mut Dom,
    model_id: &'a str,
    owner: u64,
}

impl<'a> ViewContext<'a> {
    pub fn new(dom: &'a mut Dom, model_id: &'a str, owner: u64) -> Self {
        Self {
            dom,
            model_id,
            owner,
        }
    }

    pub fn model_id(&self) -> &str {
        self.model_id
    }

    /// Token to tag DOM listeners with, so their hits route back to this
    /// binding.
    pub fn owner(&self) -> u64 {
        self.owner
    }
}

/// Outbound effect of a DOM interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewAction {
    /// Send a transient event to the host.
    Emit { name: String, data: Value },
    /// Change a property locally and report it to the host.
    Patch(Patch),
}

/// Renders models of one type tag.
pub trait ViewAdapter {
    fn render(
        &self,
        ctx: &mut ViewContext<'_>,
        store: &PropertyStore,
        mount: NodeId,
    ) -> Result<Box<dyn ViewInstance>, ViewError>;
}

/// A rendered view of one model at one mount point.
pub trait ViewInstance {
    /// Applies a change. Only called when [`ViewInstance::incremental`]
    /// returns `true`; otherwise the view is disposed and rendered again.
    fn update(
        &mut self,
        ctx: &mut ViewContext<'_>,
        store: &PropertyStore,
        changed: &[String],
    ) -> Result<(), ViewError>;

    fn dispose(&mut self, ctx: &mut ViewContext<'_>);

    fn incremental(&self) -> bool {
        true
    }

    /// A transient event from the host.
    fn on_event(&mut self, _ctx: &mut ViewContext<'_>, _name: &str, _data: &Value) -> Result<(), ViewError> {
        Ok(())
    }

    /// A DOM listener registered with this binding's owner token fired.
    fn on_dom_event(
        &mut self,
        _ctx: &mut ViewContext<'_>,
        _handler: &str,
        _store: &PropertyStore,
    ) -> Result<Vec<ViewAction>, ViewError> {
        Ok(Vec::new())
    }
}

/// View adapters by model type tag.
#[derive(Default, Clone)]
pub struct ViewRegistry {
    adapters: IndexMap<String, Rc<dyn ViewAdapter>>,
}

impl fmt::Debug for ViewRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewRegistry")
            .field("types", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` for `type_tag`, returning the one it replaces.
    pub fn register<A>(&mut self, type_tag: &str, adapter: A) -> Option<Rc<dyn ViewAdapter>>
    where
        A: ViewAdapter + 'static,
    {
        self.adapters.insert(type_tag.to_string(), Rc::new(adapter))
    }

    pub fn with<A>(mut self, type_tag: &str, adapter: A) -> Self
    where
        A: ViewAdapter + 'static,
    {
        self.register(type_tag, adapter);
        self
    }

    pub fn get(&self, type_tag: &str) -> Option<Rc<dyn ViewAdapter>> {
        self.adapters.get(type_tag).cloned()
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.adapters.contains_key(type_tag)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    pub model_id: ModelId,
    pub mount_id: MountId,
}

impl BindingKey {
    pub fn new(model_id: &str, mount_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            mount_id: mount_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingState {
    Unbound,
    Bound,
    /// The adapter failed; the view is stale until the binding is re-bound.
    Degraded,
    Disposed,
}

struct Binding {
    state: BindingState,
    mount: NodeId,
    type_tag: String,
    owner: u64,
    instance: Option<Box<dyn ViewInstance>>,
    pending: IndexSet<String>,
}

impl Binding {
    fn teardown(&mut self, dom: &mut Dom, model_id: &str) {
        self.pending.clear();
        if let Some(mut instance) = self.instance.take() {
            instance.dispose(&mut ViewContext::new(dom, model_id, self.owner));
        }
    }
}

pub struct Binder {
    views: ViewRegistry,
    bindings: IndexMap<BindingKey, Binding>,
    batch: bool,
}

impl fmt::Debug for Binder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binder")
            .field("views", &self.views)
            .field(
                "bindings",
                &self
                    .bindings
                    .iter()
                    .map(|(k, b)| (k, b.state))
                    .collect::<Vec<_>>(),
            )
            .field("batch", &self.batch)
            .finish()
    }
}

impl Binder {
    /// With `batch`, changes are accumulated per binding and rendered on
    /// [`Binder::flush`] instead of immediately.
    pub fn new(views: ViewRegistry, batch: bool) -> Self {
        Self {
            views,
            bindings: IndexMap::new(),
            batch,
        }
    }

    pub fn views(&self) -> &ViewRegistry {
        &self.views
    }

    pub fn views_mut(&mut self) -> &mut ViewRegistry {
        &mut self.views
    }

    pub fn state(&self, key: &BindingKey) -> BindingState {
        self.bindings
            .get(key)
            .map_or(BindingState::Unbound, |b| b.state)
    }

    pub fn keys_for(&self, model_id: &str) -> Vec<BindingKey> {
        self.bindings
            .keys()
            .filter(|k| k.model_id == model_id)
            .cloned()
            .collect()
    }

    /// Number of bindings currently showing a live view.
    pub fn bound_count(&self) -> usize {
        self.bindings
            .values()
            .filter(|b| b.state == BindingState::Bound)
            .count()
    }

    /// Renders `store` into `mount`. Binding an already bound key does
    /// nothing; binding a degraded or disposed key renders it afresh.
    pub fn bind(
        &mut self,
        dom: &mut Dom,
        key: BindingKey,
        mount: NodeId,
        type_tag: &str,
        store: &PropertyStore,
    ) -> Result<(), SyncError> {
        if self.state(&key) == BindingState::Bound {
            return Ok(());
        }
        let adapter = self
            .views
            .get(type_tag)
            .ok_or_else(|| SyncError::UnknownViewType(type_tag.to_string()))?;
        let owner = match self.bindings.get_mut(&key) {
            Some(stale) => {
                stale.teardown(dom, &key.model_id);
                stale.owner
            }
            None => new_owner(),
        };
        let mut ctx = ViewContext::new(dom, &key.model_id, owner);
        let (state, instance, result) = match adapter.render(&mut ctx, store, mount) {
            Ok(instance) => {
                debug!(model = %key.model_id, mount = %key.mount_id, type_tag, "bound");
                (BindingState::Bound, Some(instance), Ok(()))
            }
            Err(source) => {
                warn!(model = %key.model_id, mount = %key.mount_id, %source, "view failed to render");
                let err = SyncError::ViewAdapter {
                    model_id: key.model_id.clone(),
                    source,
                };
                (BindingState::Degraded, None, Err(err))
            }
        };
        let binding = Binding {
            state,
            mount,
            type_tag: type_tag.to_string(),
            owner,
            instance,
            pending: IndexSet::new(),
        };
        self.bindings.insert(key, binding);
        result
    }

    /// Propagates a property change to every live binding of `model_id`.
    /// Returns the failures; each failing binding is degraded.
    pub fn notify(
        &mut self,
        dom: &mut Dom,
        model_id: &str,
        store: &PropertyStore,
        changed: &[String],
    ) -> Vec<SyncError> {
        let mut errors = Vec::new();
        if changed.is_empty() {
            return errors;
        }
        for (key, binding) in self.bindings.iter_mut() {
            if key.model_id != model_id || binding.state != BindingState::Bound {
                continue;
            }
            if self.batch {
                binding.pending.extend(changed.iter().cloned());
                continue;
            }
            if let Err(err) = refresh(&self.views, dom, key, binding, store, changed) {
                errors.push(err);
            }
        }
        errors
    }

    /// Renders every batched change, once per binding.
    pub fn flush<'s>(
        &mut self,
        dom: &mut Dom,
        lookup: impl Fn(&str) -> Option<&'s PropertyStore>,
    ) -> Vec<SyncError> {
        let mut errors = Vec::new();
        for (key, binding) in self.bindings.iter_mut() {
            if binding.pending.is_empty() {
                continue;
            }
            let changed: Vec<String> = binding.pending.drain(..).collect();
            if binding.state != BindingState::Bound {
                continue;
            }
            let Some(store) = lookup(&key.model_id) else {
                continue;
            };
            if let Err(err) = refresh(&self.views, dom, key, binding, store, &changed) {
                errors.push(err);
            }
        }
        errors
    }

    /// Delivers a host event to every live binding of `model_id`.
    pub fn model_event(&mut self, dom: &mut Dom, model_id: &str, name: &str, data: &Value) -> Vec<SyncError> {
        let mut errors = Vec::new();
        for (key, binding) in self.bindings.iter_mut() {
            if key.model_id != model_id || binding.state != BindingState::Bound {
                continue;
            }
            let Some(instance) = binding.instance.as_mut() else {
                continue;
            };
            let mut ctx = ViewContext::new(dom, &key.model_id, binding.owner);
            if let Err(source) = instance.on_event(&mut ctx, name, data) {
                binding.state = BindingState::Degraded;
                warn!(model = %key.model_id, %source, "view failed on event");
                errors.push(SyncError::ViewAdapter {
                    model_id: key.model_id.clone(),
                    source,
                });
            }
        }
        errors
    }

    /// The live binding whose listeners carry `owner`.
    pub fn key_for_owner(&self, owner: u64) -> Option<&BindingKey> {
        self.bindings
            .iter()
            .find(|(_, b)| b.owner == owner && b.state == BindingState::Bound)
            .map(|(k, _)| k)
    }

    /// Hands a DOM listener hit to the binding's view.
    pub fn dom_event(
        &mut self,
        dom: &mut Dom,
        key: &BindingKey,
        handler: &str,
        store: &PropertyStore,
    ) -> Result<Vec<ViewAction>, SyncError> {
        let Some(binding) = self.bindings.get_mut(key) else {
            return Ok(Vec::new());
        };
        let Some(instance) = binding.instance.as_mut() else {
            return Ok(Vec::new());
        };
        let mut ctx = ViewContext::new(dom, &key.model_id, binding.owner);
        instance.on_dom_event(&mut ctx, handler, store).map_err(|source| {
            binding.state = BindingState::Degraded;
            SyncError::ViewAdapter {
                model_id: key.model_id.clone(),
                source,
            }
        })
    }

    /// Disposes every binding of `model_id`, cancelling batched renders.
    /// Returns how many were live; repeating the call returns 0.
    pub fn dispose(&mut self, dom: &mut Dom, model_id: &str) -> usize {
        let mut disposed = 0;
        for (key, binding) in self.bindings.iter_mut() {
            if key.model_id != model_id || binding.state == BindingState::Disposed {
                continue;
            }
            binding.teardown(dom, &key.model_id);
            binding.state = BindingState::Disposed;
            disposed += 1;
        }
        if disposed > 0 {
            debug!(model = model_id, bindings = disposed, "disposed views");
        }
        disposed
    }

    /// Disposes one binding. Returns whether it was live.
    pub fn dispose_binding(&mut self, dom: &mut Dom, key: &BindingKey) -> bool {
        match self.bindings.get_mut(key) {
            Some(binding) if binding.state != BindingState::Disposed => {
                binding.teardown(dom, &key.model_id);
                binding.state = BindingState::Disposed;
                true
            }
            _ => false,
        }
    }

    /// Drops the disposed bindings of `model_id` from the table.
    pub fn forget(&mut self, model_id: &str) {
        self.bindings
            .retain(|k, b| k.model_id != model_id || b.state != BindingState::Disposed);
    }

    /// Disposes everything and empties the table.
    pub fn clear(&mut self, dom: &mut Dom) {
        for (key, binding) in self.bindings.iter_mut() {
            binding.teardown(dom, &key.model_id);
        }
        self.bindings.clear();
    }
}

/// Brings one binding up to date: incremental when the view supports it,
/// dispose-and-render otherwise.
fn refresh(
    views: &ViewRegistry,
    dom: &mut Dom,
    key: &BindingKey,
    binding: &mut Binding,
    store: &PropertyStore,
    changed: &[String],
) -> Result<(), SyncError> {
    let mut ctx = ViewContext::new(dom, &key.model_id, binding.owner);
    let incremental = binding.instance.as_ref().is_some_and(|i| i.incremental());
    let result = if incremental {
        match binding.instance.as_mut() {
            Some(instance) => instance.update(&mut ctx, store, changed),
            None => Ok(()),
        }
    } else {
        if let Some(mut old) = binding.instance.take() {
            old.dispose(&mut ctx);
        }
        match views.get(&binding.type_tag) {
            Some(adapter) => adapter.render(&mut ctx, store, binding.mount).map(|instance| {
                binding.instance = Some(instance);
            }),
            None => Err(ViewError::Render(format!(
                "no view registered for type `{}`",
                binding.type_tag
            ))),
        }
    };
    result.map_err(|source| {
        binding.state = BindingState::Degraded;
        warn!(model = %key.model_id, mount = %key.mount_id, %source, "view update failed");
        SyncError::ViewAdapter {
            model_id: key.model_id.clone(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Log(Rc<RefCell<Vec<String>>>);

    struct Recorder {
        log: Rc<RefCell<Vec<String>>>,
        incremental: bool,
        fail_on: Option<&'static str>,
    }

    struct RecorderView {
        log: Rc<RefCell<Vec<String>>>,
        incremental: bool,
        fail_on: Option<&'static str>,
    }

    impl ViewAdapter for Recorder {
        fn render(
            &self,
            ctx: &mut ViewContext<'_>,
            _store: &PropertyStore,
            _mount: NodeId,
        ) -> Result<Box<dyn ViewInstance>, ViewError> {
            if self.fail_on == Some("render") {
                return Err(ViewError::Render("boom".into()));
            }
            self.log.borrow_mut().push(format!("render {}", ctx.model_id()));
            Ok(Box::new(RecorderView {
                log: Rc::clone(&self.log),
                incremental: self.incremental,
                fail_on: self.fail_on,
            }))
        }
    }

    impl ViewInstance for RecorderView {
        fn update(
            &mut self,
            _ctx: &mut ViewContext<'_>,
            _store: &PropertyStore,
            changed: &[String],
        ) -> Result<(), ViewError> {
            if self.fail_on == Some("update") {
                return Err(ViewError::Render("update failed".into()));
            }
            self.log.borrow_mut().push(format!("update {}", changed.join(",")));
            Ok(())
        }

        fn dispose(&mut self, _ctx: &mut ViewContext<'_>) {
            self.log.borrow_mut().push("dispose".into());
        }

        fn incremental(&self) -> bool {
            self.incremental
        }
    }

    fn binder(incremental: bool, batch: bool, fail_on: Option<&'static str>) -> (Binder, Log) {
        let log = Log::default();
        let views = ViewRegistry::new().with(
            "Rec",
            Recorder {
                log: Rc::clone(&log.0),
                incremental,
                fail_on,
            },
        );
        (Binder::new(views, batch), log)
    }

    fn store() -> PropertyStore {
        let mut store = PropertyStore::schemaless();
        store
            .apply_patch(&Patch::set("value", json!(1)))
            .expect("seed must apply");
        store
    }

    #[test]
    fn incremental_views_get_updates() {
        let (mut binder, log) = binder(true, false, None);
        let mut dom = Dom::new();
        let mount = dom.root();
        let key = BindingKey::new("m1", "main");
        binder.bind(&mut dom, key.clone(), mount, "Rec", &store()).unwrap();
        binder.bind(&mut dom, key.clone(), mount, "Rec", &store()).unwrap();
        binder.notify(&mut dom, "m1", &store(), &["value".into()]);
        assert_eq!(*log.0.borrow(), vec!["render m1", "update value"]);
        assert_eq!(binder.state(&key), BindingState::Bound);
    }

    #[test]
    fn non_incremental_views_are_rerendered() {
        let (mut binder, log) = binder(false, false, None);
        let mut dom = Dom::new();
        let mount = dom.root();
        binder
            .bind(&mut dom, BindingKey::new("m1", "main"), mount, "Rec", &store())
            .unwrap();
        binder.notify(&mut dom, "m1", &store(), &["value".into()]);
        assert_eq!(*log.0.borrow(), vec!["render m1", "dispose", "render m1"]);
    }

    #[test]
    fn batching_coalesces_and_dispose_cancels() {
        let (mut binder, log) = binder(true, true, None);
        let mut dom = Dom::new();
        let mount = dom.root();
        let s = store();
        binder.bind(&mut dom, BindingKey::new("m1", "a"), mount, "Rec", &s).unwrap();
        binder.bind(&mut dom, BindingKey::new("m2", "b"), mount, "Rec", &s).unwrap();
        binder.notify(&mut dom, "m1", &s, &["value".into()]);
        binder.notify(&mut dom, "m1", &s, &["value".into(), "max".into()]);
        binder.notify(&mut dom, "m2", &s, &["value".into()]);
        assert_eq!(binder.dispose(&mut dom, "m2"), 1);
        assert_eq!(binder.dispose(&mut dom, "m2"), 0);
        binder.flush(&mut dom, |_| Some(&s));
        assert_eq!(
            *log.0.borrow(),
            vec!["render m1", "render m2", "dispose", "update value,max"]
        );
    }

    #[test]
    fn failures_degrade_and_rebinding_recovers() {
        let (mut binder, _log) = binder(true, false, Some("update"));
        let mut dom = Dom::new();
        let mount = dom.root();
        let key = BindingKey::new("m1", "main");
        binder.bind(&mut dom, key.clone(), mount, "Rec", &store()).unwrap();
        let errors = binder.notify(&mut dom, "m1", &store(), &["value".into()]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), "view_adapter_error");
        assert_eq!(binder.state(&key), BindingState::Degraded);

        binder.bind(&mut dom, key.clone(), mount, "Rec", &store()).unwrap();
        assert_eq!(binder.state(&key), BindingState::Bound);
    }

    #[test]
    fn render_failure_is_reported() {
        let (mut binder, _log) = binder(true, false, Some("render"));
        let mut dom = Dom::new();
        let mount = dom.root();
        let key = BindingKey::new("m1", "main");
        let err = binder
            .bind(&mut dom, key.clone(), mount, "Rec", &store())
            .unwrap_err();
        assert!(matches!(err, SyncError::ViewAdapter { .. }));
        assert_eq!(binder.state(&key), BindingState::Degraded);
        assert!(matches!(
            binder.bind(&mut dom, BindingKey::new("m2", "x"), mount, "Nope", &store()),
            Err(SyncError::UnknownViewType(_))
        ));
    }
}
