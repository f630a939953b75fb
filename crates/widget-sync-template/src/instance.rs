use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::{trace, warn};
use widget_sync_core::value::{display, is_truthy};
use widget_sync_dom::{Dom, DomError, Listener, ListenerId, NodeId};

use crate::compile::{AttrPlan, Binding, CompiledTemplate, FNode, Fragment};
use crate::expr::{Scope, Values};
use crate::parse::Segment;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Allocates a listener owner token unique within the process, so handles
/// and other listener owners sharing a [`Dom`] never collide.
pub fn new_owner() -> u64 {
    NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
}

/// A live rendering of a [`CompiledTemplate`] inside a [`Dom`].
#[derive(Debug)]
pub struct TemplateHandle {
    template: Rc<CompiledTemplate>,
    parent: NodeId,
    owner: u64,
    root: FragmentInstance,
    disposed: bool,
}

/// Renders `template` as the last children of `parent`, with a fresh owner
/// token on its event listeners.
pub fn instantiate(
    template: &Rc<CompiledTemplate>,
    dom: &mut Dom,
    parent: NodeId,
    values: &dyn Values,
) -> Result<TemplateHandle, DomError> {
    instantiate_with_owner(template, dom, parent, values, new_owner())
}

/// Like [`instantiate`], tagging every listener with `owner`.
pub fn instantiate_with_owner(
    template: &Rc<CompiledTemplate>,
    dom: &mut Dom,
    parent: NodeId,
    values: &dyn Values,
    owner: u64,
) -> Result<TemplateHandle, DomError> {
    let root = build(dom, &template.root, parent, None, values, Vec::new(), owner)?;
    trace!(owner, slots = root.slots.len(), "template instantiated");
    Ok(TemplateHandle {
        template: Rc::clone(template),
        parent,
        owner,
        root,
        disposed: false,
    })
}

impl TemplateHandle {
    pub fn template(&self) -> &Rc<CompiledTemplate> {
        &self.template
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Revisits the locations that read any of `changed`. Untouched
    /// locations cause no DOM mutation; neither do values that render the
    /// same as before.
    pub fn update<S: AsRef<str>>(
        &mut self,
        dom: &mut Dom,
        values: &dyn Values,
        changed: &[S],
    ) -> Result<(), DomError> {
        if self.disposed || changed.is_empty() {
            return Ok(());
        }
        let changed: Vec<String> = changed.iter().map(|s| s.as_ref().to_string()).collect();
        trace!(owner = self.owner, ?changed, "template update");
        self.root.update(dom, values, &changed, self.owner)
    }

    /// Removes every node and listener this handle created. Calling it again
    /// does nothing.
    pub fn dispose(&mut self, dom: &mut Dom) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.root.dispose(dom);
    }

    /// The handler name behind a listener hit, if the listener belongs to
    /// this handle.
    pub fn handler_for<'l>(&self, listener: &'l Listener) -> Option<&'l str> {
        (!self.disposed && listener.owner == self.owner).then_some(listener.handler.as_str())
    }

    /// Top-level nodes in document order, including block anchors.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.disposed {
            self.root.collect_nodes(&mut out);
        }
        out
    }
}

#[derive(Debug)]
enum Top {
    Node(NodeId),
    Block(usize),
}

#[derive(Debug)]
enum SlotState {
    Text {
        node: NodeId,
        current: String,
    },
    Attr {
        node: NodeId,
        name: String,
        current: Option<String>,
    },
    List {
        anchor: NodeId,
        rows: Vec<Row>,
    },
    Cond {
        anchor: NodeId,
        truthy: bool,
        inner: FragmentInstance,
    },
}

#[derive(Debug)]
struct Row {
    item: Value,
    inst: FragmentInstance,
}

#[derive(Debug)]
struct FragmentInstance {
    fragment: Rc<Fragment>,
    tops: Vec<Top>,
    slots: Vec<SlotState>,
    listeners: Vec<ListenerId>,
    locals: Vec<(String, Value)>,
}

fn build(
    dom: &mut Dom,
    fragment: &Rc<Fragment>,
    parent: NodeId,
    before: Option<NodeId>,
    values: &dyn Values,
    locals: Vec<(String, Value)>,
    owner: u64,
) -> Result<FragmentInstance, DomError> {
    let mut tops = Vec::with_capacity(fragment.nodes.len());
    let (slots, listeners) = {
        let mut builder = Builder {
            fragment,
            scope: Scope::new(values, &locals),
            owner,
            slots: Vec::with_capacity(fragment.bindings.len()),
            listeners: Vec::new(),
        };
        for node in &fragment.nodes {
            match builder.node(dom, node, parent, before) {
                Ok(top) => tops.push(top),
                Err(err) => {
                    remove_tops(dom, &tops, &mut builder.slots);
                    return Err(err);
                }
            }
        }
        (builder.slots, builder.listeners)
    };
    Ok(FragmentInstance {
        fragment: Rc::clone(fragment),
        tops,
        slots,
        listeners,
        locals,
    })
}

struct Builder<'a> {
    fragment: &'a Fragment,
    scope: Scope<'a>,
    owner: u64,
    slots: Vec<SlotState>,
    listeners: Vec<ListenerId>,
}

impl Builder<'_> {
    fn node(
        &mut self,
        dom: &mut Dom,
        node: &FNode,
        parent: NodeId,
        before: Option<NodeId>,
    ) -> Result<Top, DomError> {
        match node {
            FNode::Text(text) => {
                let id = dom.create_text(text);
                dom.insert_before(parent, id, before)?;
                Ok(Top::Node(id))
            }
            FNode::DynText(slot) => {
                let current = match self.fragment.bindings.get(*slot) {
                    Some(Binding::Text(parts)) => render(parts, &self.scope),
                    _ => String::new(),
                };
                let id = dom.create_text(&current);
                dom.insert_before(parent, id, before)?;
                debug_assert_eq!(self.slots.len(), *slot);
                self.slots.push(SlotState::Text { node: id, current });
                Ok(Top::Node(id))
            }
            FNode::Element {
                tag,
                attrs,
                events,
                children,
            } => {
                // Built detached, so attaching it is a single insertion.
                let el = dom.create_element(tag);
                for attr in attrs {
                    match attr {
                        AttrPlan::Static { name, value } => dom.set_attribute(el, name, value)?,
                        AttrPlan::Dynamic(slot) => {
                            let Some(Binding::Attr { name, parts }) = self.fragment.bindings.get(*slot) else {
                                continue;
                            };
                            let current = attr_value(parts, &self.scope);
                            if let Some(value) = &current {
                                dom.set_attribute(el, name, value)?;
                            }
                            debug_assert_eq!(self.slots.len(), *slot);
                            self.slots.push(SlotState::Attr {
                                node: el,
                                name: name.clone(),
                                current,
                            });
                        }
                    }
                }
                for (event, handler) in events {
                    let listener = Listener {
                        owner: self.owner,
                        handler: handler.clone(),
                    };
                    self.listeners.push(dom.add_listener(el, event, listener)?);
                }
                for child in children {
                    self.node(dom, child, el, None)?;
                }
                dom.insert_before(parent, el, before)?;
                Ok(Top::Node(el))
            }
            FNode::Block(slot) => {
                let state = match self.fragment.bindings.get(*slot) {
                    Some(Binding::List { var, source, body }) => {
                        let anchor = dom.create_anchor("for");
                        dom.insert_before(parent, anchor, before)?;
                        let mut rows = Vec::new();
                        for item in items(source.eval(&self.scope)) {
                            let locals = row_locals(self.scope.locals, var, &item);
                            let inst = build(dom, body, parent, Some(anchor), self.scope.values, locals, self.owner)?;
                            rows.push(Row { item, inst });
                        }
                        SlotState::List { anchor, rows }
                    }
                    Some(Binding::Cond {
                        cond,
                        then_frag,
                        else_frag,
                    }) => {
                        let anchor = dom.create_anchor("if");
                        dom.insert_before(parent, anchor, before)?;
                        let truthy = is_truthy(&cond.eval(&self.scope));
                        let branch = if truthy { then_frag } else { else_frag };
                        let inner = build(
                            dom,
                            branch,
                            parent,
                            Some(anchor),
                            self.scope.values,
                            self.scope.locals.to_vec(),
                            self.owner,
                        )?;
                        SlotState::Cond { anchor, truthy, inner }
                    }
                    _ => return Err(DomError::StaleNode(parent)),
                };
                debug_assert_eq!(self.slots.len(), *slot);
                self.slots.push(state);
                Ok(Top::Block(*slot))
            }
        }
    }
}

impl FragmentInstance {
    fn update(&mut self, dom: &mut Dom, values: &dyn Values, changed: &[String], owner: u64) -> Result<(), DomError> {
        let fragment = Rc::clone(&self.fragment);
        for slot in fragment.slots_for(changed) {
            let (Some(binding), Some(state)) = (fragment.bindings.get(slot), self.slots.get_mut(slot)) else {
                continue;
            };
            let scope = Scope::new(values, &self.locals);
            match (binding, state) {
                (Binding::Text(parts), SlotState::Text { node, current }) => {
                    let next = render(parts, &scope);
                    if next != *current {
                        dom.set_text(*node, &next)?;
                        *current = next;
                    }
                }
                (Binding::Attr { parts, .. }, SlotState::Attr { node, name, current }) => {
                    let next = attr_value(parts, &scope);
                    if next != *current {
                        match &next {
                            Some(value) => dom.set_attribute(*node, name, value)?,
                            None => {
                                dom.remove_attribute(*node, name)?;
                            }
                        }
                        *current = next;
                    }
                }
                (Binding::List { var, source, body }, SlotState::List { anchor, rows }) => {
                    let next = items(source.eval(&scope));
                    update_list(dom, &scope, body, var, *anchor, rows, next, changed, owner)?;
                }
                (
                    Binding::Cond {
                        cond,
                        then_frag,
                        else_frag,
                    },
                    SlotState::Cond { anchor, truthy, inner },
                ) => {
                    let next = is_truthy(&cond.eval(&scope));
                    if next != *truthy {
                        let parent = dom.parent(*anchor).ok_or(DomError::StaleNode(*anchor))?;
                        let branch = if next { then_frag } else { else_frag };
                        let fresh = build(dom, branch, parent, Some(*anchor), values, self.locals.clone(), owner)?;
                        inner.dispose(dom);
                        *inner = fresh;
                        *truthy = next;
                    } else {
                        inner.locals.clone_from(&self.locals);
                        inner.update(dom, values, changed, owner)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn first_node(&self) -> Option<NodeId> {
        match self.tops.first()? {
            Top::Node(id) => Some(*id),
            Top::Block(slot) => match self.slots.get(*slot)? {
                SlotState::List { anchor, rows } => rows
                    .first()
                    .and_then(|r| r.inst.first_node())
                    .or(Some(*anchor)),
                SlotState::Cond { anchor, inner, .. } => inner.first_node().or(Some(*anchor)),
                _ => None,
            },
        }
    }

    fn collect_nodes(&self, out: &mut Vec<NodeId>) {
        for top in &self.tops {
            match top {
                Top::Node(id) => out.push(*id),
                Top::Block(slot) => match self.slots.get(*slot) {
                    Some(SlotState::List { anchor, rows }) => {
                        for row in rows {
                            row.inst.collect_nodes(out);
                        }
                        out.push(*anchor);
                    }
                    Some(SlotState::Cond { anchor, inner, .. }) => {
                        inner.collect_nodes(out);
                        out.push(*anchor);
                    }
                    _ => {}
                },
            }
        }
    }

    fn dispose(&mut self, dom: &mut Dom) {
        for id in self.listeners.drain(..) {
            dom.remove_listener(id);
        }
        let tops = std::mem::take(&mut self.tops);
        remove_tops(dom, &tops, &mut self.slots);
        self.slots.clear();
    }
}

/// Splices `rows` towards `next`: rows matching at both ends are kept, the
/// differing middle is updated in place pairwise, and only the surplus is
/// created or removed.
#[allow(clippy::too_many_arguments)]
fn update_list(
    dom: &mut Dom,
    scope: &Scope<'_>,
    body: &Rc<Fragment>,
    var: &str,
    anchor: NodeId,
    rows: &mut Vec<Row>,
    next: Vec<Value>,
    changed: &[String],
    owner: u64,
) -> Result<(), DomError> {
    let old_len = rows.len();
    let new_len = next.len();
    let prefix = rows
        .iter()
        .zip(&next)
        .take_while(|(row, item)| row.item == **item)
        .count();
    let suffix = rows[prefix..]
        .iter()
        .rev()
        .zip(next[prefix..].iter().rev())
        .take_while(|(row, item)| row.item == **item)
        .count();
    let old_mid = old_len - prefix - suffix;
    let new_mid = new_len - prefix - suffix;
    let common = old_mid.min(new_mid);

    // Names visible inside a row; the loop variable shadows any outer name.
    let outer: Vec<String> = changed.iter().filter(|n| *n != var).cloned().collect();
    let mut rebound = outer.clone();
    rebound.push(var.to_string());

    let parent = dom.parent(anchor).ok_or(DomError::StaleNode(anchor))?;

    for (row, item) in rows[..prefix].iter_mut().zip(&next) {
        refresh_row(dom, scope, var, row, item, &outer, owner)?;
    }
    for (row, item) in rows[prefix..prefix + common].iter_mut().zip(&next[prefix..]) {
        row.item = item.clone();
        refresh_row(dom, scope, var, row, item, &rebound, owner)?;
    }

    let at = prefix + common;
    if old_mid > new_mid {
        let doomed: Vec<Row> = rows.drain(at..prefix + old_mid).collect();
        for mut row in doomed {
            row.inst.dispose(dom);
        }
    } else if new_mid > old_mid {
        let before = rows
            .get(at)
            .and_then(|r| r.inst.first_node())
            .unwrap_or(anchor);
        let mut fresh = Vec::with_capacity(new_mid - common);
        for item in &next[at..prefix + new_mid] {
            let locals = row_locals(scope.locals, var, item);
            let inst = build(dom, body, parent, Some(before), scope.values, locals, owner)?;
            fresh.push(Row {
                item: item.clone(),
                inst,
            });
        }
        rows.splice(at..at, fresh);
    }

    let tail = prefix + new_mid;
    for (row, item) in rows[tail..].iter_mut().zip(&next[tail..]) {
        refresh_row(dom, scope, var, row, item, &outer, owner)?;
    }
    Ok(())
}

/// Rebinds a row to the current outer scope and revisits the slots that
/// read `names`.
fn refresh_row(
    dom: &mut Dom,
    scope: &Scope<'_>,
    var: &str,
    row: &mut Row,
    item: &Value,
    names: &[String],
    owner: u64,
) -> Result<(), DomError> {
    row.inst.locals = row_locals(scope.locals, var, item);
    if names.is_empty() {
        return Ok(());
    }
    row.inst.update(dom, scope.values, names, owner)
}

fn remove_tops(dom: &mut Dom, tops: &[Top], slots: &mut [SlotState]) {
    for top in tops {
        match top {
            Top::Node(id) => remove_node(dom, *id),
            Top::Block(slot) => match slots.get_mut(*slot) {
                Some(SlotState::List { anchor, rows }) => {
                    for row in rows.iter_mut() {
                        row.inst.dispose(dom);
                    }
                    rows.clear();
                    remove_node(dom, *anchor);
                }
                Some(SlotState::Cond { anchor, inner, .. }) => {
                    inner.dispose(dom);
                    remove_node(dom, *anchor);
                }
                _ => {}
            },
        }
    }
}

fn remove_node(dom: &mut Dom, id: NodeId) {
    if !dom.contains(id) {
        return;
    }
    if let Err(err) = dom.remove(id) {
        warn!(?id, %err, "failed to remove template node");
    }
}

fn row_locals(outer: &[(String, Value)], var: &str, item: &Value) -> Vec<(String, Value)> {
    let mut locals = Vec::with_capacity(outer.len() + 1);
    locals.extend_from_slice(outer);
    locals.push((var.to_string(), item.clone()));
    locals
}

/// Items a `for` block iterates: array elements, object values, nothing otherwise.
fn items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        _ => Vec::new(),
    }
}

fn render(parts: &[Segment], scope: &Scope<'_>) -> String {
    let mut out = String::new();
    for part in parts {
        match part {
            Segment::Literal(s) => out.push_str(s),
            Segment::Expr(expr) => out.push_str(&display(&expr.eval(scope))),
        }
    }
    out
}

/// A lone `${expr}` that is `false` or `null` drops the attribute and `true`
/// renders it empty, as for `disabled` or `checked`.
fn attr_value(parts: &[Segment], scope: &Scope<'_>) -> Option<String> {
    if let [Segment::Expr(expr)] = parts {
        return match expr.eval(scope) {
            Value::Bool(false) | Value::Null => None,
            Value::Bool(true) => Some(String::new()),
            other => Some(display(&other)),
        };
    }
    Some(render(parts, scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use serde_json::{json, Map};
    use widget_sync_dom::Mutation;

    fn values(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn mount(template: &str, names: &[&str], v: &Map<String, Value>) -> (Dom, TemplateHandle) {
        let t = Rc::new(compile(template, names).expect("template must compile"));
        let mut dom = Dom::with_journal();
        let root = dom.root();
        let handle = instantiate(&t, &mut dom, root, v).expect("instantiate must succeed");
        dom.take_mutations();
        (dom, handle)
    }

    #[test]
    fn renders_text_and_attributes() {
        let v = values(json!({"value": 42, "label": "cpu", "busy": false}));
        let (dom, _h) = mount(
            r#"<div class="bar" aria-busy="${busy}" title="${label}: ${value}">${value}%</div>"#,
            &["value", "label", "busy"],
            &v,
        );
        assert_eq!(
            dom.inner_html(dom.root()),
            r#"<div class="bar" title="cpu: 42">42%</div>"#
        );
    }

    #[test]
    fn unchanged_render_writes_nothing() {
        let mut v = values(json!({"value": 1, "other": 2}));
        let (mut dom, mut h) = mount("<p>${value}</p>", &["value", "other"], &v);
        v.insert("other".into(), json!(3));
        h.update(&mut dom, &v, &["other"]).unwrap();
        h.update(&mut dom, &v, &["value"]).unwrap();
        assert!(dom.take_mutations().is_empty());
    }

    #[test]
    fn list_splice_only_touches_the_difference() {
        let mut v = values(json!({"rows": ["a", "b", "c"]}));
        let (mut dom, mut h) = mount("<ul>{% for r in rows %}<li>${r}</li>{% endfor %}</ul>", &["rows"], &v);
        v.insert("rows".into(), json!(["a", "x", "b", "c"]));
        h.update(&mut dom, &v, &["rows"]).unwrap();
        let muts = dom.take_mutations();
        assert_eq!(muts.len(), 1, "{muts:?}");
        assert!(matches!(muts[0], Mutation::Insert { .. }));
        assert_eq!(
            dom.inner_html(dom.root()),
            "<ul><li>a</li><li>x</li><li>b</li><li>c</li></ul>"
        );

        v.insert("rows".into(), json!(["a", "y", "b", "c"]));
        h.update(&mut dom, &v, &["rows"]).unwrap();
        let muts = dom.take_mutations();
        assert_eq!(muts.len(), 1, "{muts:?}");
        assert!(matches!(muts[0], Mutation::SetText { .. }));

        v.insert("rows".into(), json!(["c"]));
        h.update(&mut dom, &v, &["rows"]).unwrap();
        assert_eq!(dom.inner_html(dom.root()), "<ul><li>c</li></ul>");
        assert_eq!(dom.take_mutations().len(), 3);
    }

    #[test]
    fn conditional_swaps_only_on_truthiness_flip() {
        let mut v = values(json!({"open": true, "n": 1}));
        let (mut dom, mut h) = mount(
            "{% if open %}<b>${n}</b>{% else %}<i>closed</i>{% endif %}",
            &["open", "n"],
            &v,
        );
        v.insert("open".into(), json!("yes"));
        h.update(&mut dom, &v, &["open"]).unwrap();
        assert!(dom.take_mutations().is_empty());

        v.insert("n".into(), json!(2));
        h.update(&mut dom, &v, &["n"]).unwrap();
        assert_eq!(dom.take_mutations().len(), 1);

        v.insert("open".into(), json!(false));
        h.update(&mut dom, &v, &["open"]).unwrap();
        assert_eq!(dom.inner_html(dom.root()), "<i>closed</i>");
    }

    #[test]
    fn boolean_attributes_toggle() {
        let mut v = values(json!({"off": true}));
        let (mut dom, mut h) = mount(r#"<input disabled="${off}">"#, &["off"], &v);
        assert_eq!(dom.inner_html(dom.root()), r#"<input disabled="">"#);
        v.insert("off".into(), json!(false));
        h.update(&mut dom, &v, &["off"]).unwrap();
        assert_eq!(dom.inner_html(dom.root()), "<input>");
    }

    #[test]
    fn dispose_is_idempotent_and_drops_listeners() {
        let v = values(json!({}));
        let (mut dom, mut h) = mount(r#"<button on:click="inc">+</button>"#, &[], &v);
        let button = h.nodes()[0];
        let hits = dom.fire(button, "click");
        assert_eq!(hits.len(), 1);
        assert_eq!(h.handler_for(&hits[0]), Some("inc"));

        h.dispose(&mut dom);
        h.dispose(&mut dom);
        assert!(h.is_disposed());
        assert_eq!(dom.listener_count(), 0);
        assert_eq!(dom.inner_html(dom.root()), "");
        assert_eq!(dom.len(), 1);
    }
}
