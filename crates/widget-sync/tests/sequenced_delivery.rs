mod common;

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use widget_sync::SyncConfig;
use widget_sync_core::{Envelope, Patch};

use crate::common::{progress_bar, Harness};

fn set_value(seq: u64, value: i64) -> Envelope {
    Envelope::patch("p1", &[Patch::set("value", json!(value))]).with_seq(seq)
}

/// Counts the store changes that touched `value`.
fn count_value_changes(h: &mut Harness) -> Rc<RefCell<usize>> {
    let count = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&count);
    h.manager
        .subscribe("p1", move |change| {
            if change.changed.iter().any(|n| n == "value") {
                *sink.borrow_mut() += 1;
            }
        })
        .expect("model must exist");
    count
}

#[test]
fn reversed_delivery_is_applied_in_sequence_order() {
    let mut h = Harness::new(SyncConfig::default());
    h.send(&progress_bar("p1", Some("main")));
    h.pump();

    h.link.deliver_in_reverse(true);
    for (seq, value) in [(0, 10), (1, 20), (2, 30)] {
        h.send(&set_value(seq, value));
    }
    assert_eq!(h.pump(), 3);

    assert_eq!(h.manager.model("p1").and_then(|s| s.get("value")), Some(&json!(30)));
    assert!(h.html().contains("width: 30%"));
    assert!(h.codes().is_empty(), "{:?}", h.codes());
}

#[test]
fn each_sequenced_patch_is_applied_once_in_order() {
    let mut h = Harness::new(SyncConfig::default());
    h.send(&progress_bar("p1", None));
    h.pump();
    let applied = count_value_changes(&mut h);

    h.link.deliver_in_reverse(true);
    h.send(&set_value(1, 20));
    h.send(&set_value(0, 10));
    h.send(&set_value(0, 10));
    h.pump();

    // Arrival order is 0, 0, 1: the duplicate is dropped, 1 follows 0.
    assert_eq!(*applied.borrow(), 2);
    assert_eq!(h.manager.model("p1").and_then(|s| s.get("value")), Some(&json!(20)));
}

#[test]
fn a_stuck_gap_is_skipped_and_reported() {
    let config = SyncConfig::from_toml_str(
        r#"
        [reorder]
        max_pending = 2
        "#,
    )
    .expect("config must parse");
    let mut h = Harness::new(config);
    h.send(&progress_bar("p1", Some("main")));
    h.send(&set_value(0, 10));
    h.send(&set_value(2, 30));
    h.send(&set_value(3, 40));
    h.pump();
    assert_eq!(h.manager.model("p1").and_then(|s| s.get("value")), Some(&json!(10)));

    h.send(&set_value(4, 50));
    h.pump();
    assert_eq!(h.manager.model("p1").and_then(|s| s.get("value")), Some(&json!(50)));
    assert_eq!(h.codes(), vec!["sequence_gap"]);

    h.send(&set_value(1, 20));
    h.pump();
    assert_eq!(
        h.manager.model("p1").and_then(|s| s.get("value")),
        Some(&json!(50)),
        "a skipped patch arriving late is stale"
    );

    let sent = h.host_received();
    assert_eq!(sent.len(), 1);
    let payload = sent[0].diagnostic_payload().expect("diagnostic payload");
    assert_eq!(payload.code, "sequence_gap");
}

#[test]
fn reordering_can_be_disabled() {
    let config = SyncConfig::from_json_str(r#"{"reorder":{"enabled":false}}"#).expect("config must parse");
    let mut h = Harness::new(config);
    h.send(&progress_bar("p1", None));
    h.send(&set_value(5, 10));
    h.send(&set_value(3, 20));
    h.pump();
    assert_eq!(h.manager.model("p1").and_then(|s| s.get("value")), Some(&json!(20)));
}

#[test]
fn the_highest_sequence_number_ends_the_numbering() {
    let config = SyncConfig::from_toml_str("[reorder]\nmax_pending = 1").expect("config must parse");
    let mut h = Harness::new(config);
    h.send(&progress_bar("p1", None));
    h.send(&set_value(u64::MAX, 1));
    h.send(&set_value(u64::MAX - 1, 2));
    h.pump();
    assert_eq!(h.manager.model("p1").and_then(|s| s.get("value")), Some(&json!(1)));
    assert_eq!(h.codes(), vec!["sequence_gap"]);

    h.send(&set_value(0, 9));
    h.pump();
    assert_eq!(h.manager.model("p1").and_then(|s| s.get("value")), Some(&json!(1)));
}
