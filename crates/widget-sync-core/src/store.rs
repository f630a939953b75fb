//! Per-model property store with synchronous change subscriptions.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::patch::{Patch, PatchError};
use crate::schema::{PropertyKind, PropertySchema};

/// Delivered to subscribers after every successful apply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyChange {
    /// Properties whose value changed, in first-change order.
    pub changed: Vec<String>,
    /// Transient events carried by the applied patches, in order.
    pub events: Vec<(String, Value)>,
}

impl PropertyChange {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.events.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&PropertyChange)>;

/// Current value of every synchronized attribute of one model.
///
/// A store built with a schema rejects undeclared properties and values that
/// do not match their declared kind; a schema-less store accepts anything.
pub struct PropertyStore {
    schema: Option<PropertySchema>,
    values: IndexMap<String, Value>,
    next_subscription_id: u64,
    subscribers: BTreeMap<u64, Subscriber>,
}

impl fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyStore")
            .field("schema", &self.schema)
            .field("values", &self.values)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::schemaless()
    }
}

impl PropertyStore {
    pub fn schemaless() -> Self {
        Self {
            schema: None,
            values: IndexMap::new(),
            next_subscription_id: 1,
            subscribers: BTreeMap::new(),
        }
    }

    pub fn with_schema(schema: PropertySchema) -> Self {
        Self {
            schema: Some(schema),
            ..Self::schemaless()
        }
    }

    /// Builds a store seeded with `initial`, validating every entry.
    pub fn from_props(
        schema: Option<PropertySchema>,
        initial: &Map<String, Value>,
    ) -> Result<Self, PatchError> {
        let mut store = match schema {
            Some(schema) => Self::with_schema(schema),
            None => Self::schemaless(),
        };
        for (name, value) in initial {
            let kind = store.kind_of(name)?;
            if !kind.accepts(value) {
                return Err(PatchError::KindMismatch {
                    prop: name.clone(),
                    expected: kind,
                });
            }
            store.values.insert(name.clone(), value.clone());
        }
        Ok(store)
    }

    pub fn schema(&self) -> Option<&PropertySchema> {
        self.schema.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All properties as one JSON object.
    pub fn snapshot(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&PropertyChange) + 'static,
    {
        let id = self.next_subscription_id;
        self.next_subscription_id = self.next_subscription_id.saturating_add(1);
        self.subscribers.insert(id, Box::new(listener));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id.0).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Applies one patch atomically and returns the names of the properties
    /// whose value changed.
    pub fn apply_patch(&mut self, patch: &Patch) -> Result<Vec<String>, PatchError> {
        self.apply_batch(std::slice::from_ref(patch))
    }

    /// Applies `patches` in order as one unit: if any of them fails, none is
    /// applied and the store keeps its previous state.
    pub fn apply_batch(&mut self, patches: &[Patch]) -> Result<Vec<String>, PatchError> {
        let mut staged: IndexMap<String, Value> = IndexMap::new();
        let mut events = Vec::new();
        for patch in patches {
            let Some(prop) = patch.prop() else {
                if let Patch::Event { name, data } = patch {
                    events.push((name.clone(), data.clone()));
                }
                continue;
            };
            let kind = self.kind_of(prop)?;
            let current = staged.get(prop).or_else(|| self.values.get(prop));
            if let Some(next) = patch.apply_to(current, kind)? {
                staged.insert(prop.to_string(), next);
            }
        }

        let mut changed = Vec::new();
        for (name, value) in staged {
            if self.values.get(&name) == Some(&value) {
                continue;
            }
            changed.push(name.clone());
            self.values.insert(name, value);
        }

        let change = PropertyChange {
            changed: changed.clone(),
            events,
        };
        if !change.is_empty() {
            for listener in self.subscribers.values_mut() {
                listener(&change);
            }
        }
        Ok(changed)
    }

    /// Takes over the schema and values of `fresh`, keeping this store's
    /// subscribers. Returns the properties that changed, were added or were
    /// removed; subscribers hear about them as one change.
    pub fn replace_with(&mut self, fresh: PropertyStore) -> Vec<String> {
        let mut changed: Vec<String> = fresh
            .values
            .iter()
            .filter(|(name, value)| self.values.get(name.as_str()) != Some(*value))
            .map(|(name, _)| name.clone())
            .collect();
        changed.extend(
            self.values
                .keys()
                .filter(|name| !fresh.values.contains_key(name.as_str()))
                .cloned(),
        );
        self.schema = fresh.schema;
        self.values = fresh.values;
        if !changed.is_empty() {
            let change = PropertyChange {
                changed: changed.clone(),
                events: Vec::new(),
            };
            for listener in self.subscribers.values_mut() {
                listener(&change);
            }
        }
        changed
    }

    fn kind_of(&self, name: &str) -> Result<PropertyKind, PatchError> {
        match &self.schema {
            None => Ok(PropertyKind::Any),
            Some(schema) => schema
                .kind(name)
                .ok_or_else(|| PatchError::UnknownProperty(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn progress_store() -> PropertyStore {
        let schema = PropertySchema::new()
            .with("value", PropertyKind::Scalar)
            .with("max", PropertyKind::Scalar)
            .with("ticks", PropertyKind::Sequence);
        let init = json!({"value": 0, "max": 100, "ticks": []});
        PropertyStore::from_props(Some(schema), init.as_object().unwrap()).unwrap()
    }

    #[test]
    fn set_reports_changed_names() {
        let mut store = progress_store();
        let changed = store.apply_patch(&Patch::set("value", json!(42))).unwrap();
        assert_eq!(changed, vec!["value".to_string()]);
        assert_eq!(store.get("value"), Some(&json!(42)));
    }

    #[test]
    fn setting_an_equal_value_changes_nothing() {
        let mut store = progress_store();
        let changed = store.apply_patch(&Patch::set("max", json!(100))).unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn undeclared_property_is_rejected() {
        let mut store = progress_store();
        let err = store.apply_patch(&Patch::set("colour", json!("red"))).unwrap_err();
        assert_eq!(err, PatchError::UnknownProperty("colour".into()));
    }

    #[test]
    fn schemaless_store_accepts_anything() {
        let mut store = PropertyStore::schemaless();
        store.apply_patch(&Patch::set("anything", json!({"a": 1}))).unwrap();
        assert_eq!(store.snapshot(), json!({"anything": {"a": 1}}));
    }

    #[test]
    fn failed_batch_leaves_last_known_good_state() {
        let mut store = progress_store();
        let batch = [
            Patch::set("value", json!(10)),
            Patch::insert("ticks", 0, vec![json!(1)]),
            Patch::remove("ticks", 0, 5),
        ];
        let err = store.apply_batch(&batch).unwrap_err();
        assert!(err.is_out_of_range());
        assert_eq!(store.get("value"), Some(&json!(0)));
        assert_eq!(store.get("ticks"), Some(&json!([])));
    }

    #[test]
    fn batch_sees_its_own_earlier_patches() {
        let mut store = progress_store();
        let batch = [
            Patch::insert("ticks", 0, vec![json!(1), json!(2)]),
            Patch::insert("ticks", 2, vec![json!(3)]),
            Patch::remove("ticks", 0, 1),
        ];
        let changed = store.apply_batch(&batch).unwrap();
        assert_eq!(changed, vec!["ticks".to_string()]);
        assert_eq!(store.get("ticks"), Some(&json!([2, 3])));
    }

    #[test]
    fn subscribers_receive_changes_and_events_in_order() {
        let mut store = progress_store();
        let seen: Rc<RefCell<Vec<PropertyChange>>> = Rc::default();
        let sink = Rc::clone(&seen);
        let id = store.subscribe(move |c| sink.borrow_mut().push(c.clone()));

        store.apply_patch(&Patch::set("value", json!(5))).unwrap();
        store.apply_patch(&Patch::event("click", json!(null))).unwrap();
        store.apply_patch(&Patch::set("value", json!(5))).unwrap();
        assert!(store.unsubscribe(id));
        store.apply_patch(&Patch::set("value", json!(6))).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].changed, vec!["value".to_string()]);
        assert_eq!(seen[1].events, vec![("click".to_string(), json!(null))]);
        assert!(store.get("click").is_none());
    }

    #[test]
    fn initial_props_are_validated() {
        let schema = PropertySchema::new().with("value", PropertyKind::Scalar);
        let err = PropertyStore::from_props(Some(schema), json!({"value": [1]}).as_object().unwrap())
            .unwrap_err();
        assert!(matches!(err, PatchError::KindMismatch { .. }));
    }

    #[test]
    fn replace_with_keeps_subscribers_and_reports_the_difference() {
        let mut store = progress_store();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(move |change| sink.borrow_mut().push(change.changed.clone()));

        let fresh = PropertyStore::from_props(None, json!({"value": 5, "max": 100, "label": "x"}).as_object().unwrap()).unwrap();
        let changed = store.replace_with(fresh);
        assert_eq!(changed, vec!["value".to_string(), "label".to_string(), "ticks".to_string()]);
        assert_eq!(*seen.borrow(), vec![changed.clone()]);
        assert!(store.schema().is_none());
        assert_eq!(store.get("ticks"), None);
        assert_eq!(store.subscriber_count(), 1);

        let same = PropertyStore::from_props(None, &store.snapshot().as_object().cloned().unwrap()).unwrap();
        assert!(store.replace_with(same).is_empty());
        assert_eq!(seen.borrow().len(), 1);
    }
}
