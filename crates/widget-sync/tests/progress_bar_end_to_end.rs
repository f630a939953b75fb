mod common;

use serde_json::{json, Value};
use widget_sync::{BindingState, SyncConfig};
use widget_sync_core::{Envelope, MessageKind, Patch};
use widget_sync_dom::Mutation;

use crate::common::{create, progress_bar, Harness};

#[test]
fn create_then_set_value_touches_only_value_locations() {
    let mut h = Harness::new(SyncConfig::default());
    h.send(&progress_bar("p1", Some("main")));
    assert_eq!(h.pump(), 1);
    assert_eq!(
        h.html(),
        concat!(
            r#"<div class="progress" aria-valuemax="100">"#,
            r#"<div class="fill" style="width: 0%"></div>"#,
            r#"<span class="label">Loading: 0</span></div>"#
        )
    );
    assert_eq!(h.manager.binding_state("p1", "main"), BindingState::Bound);
    h.manager.dom_mut().take_mutations();

    h.send(&Envelope::patch("p1", &[Patch::set("value", json!(42))]));
    h.pump();

    let mutations = h.manager.dom_mut().take_mutations();
    assert_eq!(mutations.len(), 2, "fill width and label only: {mutations:?}");
    assert!(mutations
        .iter()
        .any(|m| matches!(m, Mutation::SetAttribute { name, .. } if name == "style")));
    assert!(mutations.iter().any(|m| matches!(m, Mutation::SetText { .. })));
    assert!(h.html().contains("width: 42%"));
    assert!(h.html().contains("Loading: 42"));
    assert_eq!(h.manager.model("p1").and_then(|s| s.get("value")), Some(&json!(42)));
    assert!(h.manager.diagnostics().next().is_none());
}

#[test]
fn unchanged_values_cause_no_dom_work() {
    let mut h = Harness::new(SyncConfig::default());
    h.send(&progress_bar("p1", Some("main")));
    h.pump();
    h.manager.dom_mut().take_mutations();

    h.send(&Envelope::patch("p1", &[Patch::set("value", json!(0))]));
    h.pump();
    assert!(h.manager.dom_mut().take_mutations().is_empty());
}

#[test]
fn dom_events_travel_back_to_the_host() {
    let mut h = Harness::new(SyncConfig::default());
    h.send(&create("c1", "Counter", json!({"count": 0}), Some("main")));
    h.pump();
    assert_eq!(h.html(), "<button>0</button><a>ping</a>");
    h.host_received();

    let mount = h.mount();
    let button = h.manager.dom().children(mount)[0];
    let link = h.manager.dom().children(mount)[1];
    assert_eq!(h.manager.dispatch_dom_event(button, "click"), 1);
    assert_eq!(h.html(), "<button>1</button><a>ping</a>");
    assert_eq!(h.manager.dispatch_dom_event(link, "click"), 1);
    assert_eq!(h.manager.dispatch_dom_event(link, "mouseover"), 0);
    h.pump();

    let sent = h.host_received();
    assert_eq!(sent.len(), 2, "{sent:?}");
    assert_eq!(sent[0].kind, MessageKind::Patch);
    assert_eq!(sent[0].patches().unwrap(), vec![Patch::set("count", json!(1))]);
    assert_eq!(sent[1].kind, MessageKind::Event);
    assert_eq!(sent[1].patches().unwrap(), vec![Patch::event("ping", Value::Null)]);
}

#[test]
fn host_events_reach_store_subscribers() {
    let mut h = Harness::new(SyncConfig::default());
    h.send(&progress_bar("p1", None));
    h.pump();

    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = std::rc::Rc::clone(&seen);
    h.manager
        .subscribe("p1", move |change| sink.borrow_mut().push(change.clone()))
        .unwrap();
    h.send(&Envelope::event("p1", "reset", json!({"to": 0})));
    h.pump();
    assert_eq!(seen.borrow().len(), 1);
    assert!(h.manager.diagnostics().next().is_none());
}

#[test]
fn references_are_created_before_their_owner() {
    let mut h = Harness::new(SyncConfig::default());
    let mut payload = widget_sync_core::CreatePayload::new(
        "ProgressBar",
        common::object(json!({"value": 1, "max": 10, "description": "Outer", "style": {"id": "s1"}})),
    );
    payload.references.push(widget_sync_core::codec::ModelSpec {
        id: "s1".into(),
        type_tag: "Style".into(),
        props: common::object(json!({"color": "red"})),
        schema: None,
    });
    h.send(&Envelope::create("p1", &payload));
    h.pump();

    let ids: Vec<&str> = h.manager.model_ids().collect();
    assert_eq!(ids, vec!["s1", "p1"]);
    assert_eq!(h.manager.model_type("s1"), Some("Style"));
    assert!(h.manager.diagnostics().next().is_none());
}
