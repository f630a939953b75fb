mod common;

use serde_json::json;
use widget_sync::{SyncConfig, Transport};
use widget_sync_core::codec::{decode_frame, encode_frame};
use widget_sync_core::{Envelope, Frame, Patch, WireFormat};

use crate::common::{create, Harness};

#[test]
fn cbor_sessions_exchange_binary_frames() {
    let config = SyncConfig::from_toml_str(r#"wire_format = "cbor""#).expect("config must parse");
    let mut h = Harness::new(config);

    let frame = encode_frame(&create("c1", "Counter", json!({"count": 4}), Some("main")), WireFormat::Cbor).unwrap();
    assert!(matches!(frame, Frame::Binary(_)));
    h.host.transmit(frame).unwrap();
    // Text frames stay accepted on a binary session.
    h.send(&Envelope::patch("c1", &[Patch::set("count", json!(5))]));
    h.pump();
    assert_eq!(h.html(), "<button>5</button><a>ping</a>");

    let button = h.manager.dom().children(h.mount())[0];
    h.manager.dispatch_dom_event(button, "click");
    h.pump();

    let frames = h.host.drain().unwrap();
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0], Frame::Binary(_)));
    let env = decode_frame(&frames[0]).unwrap();
    assert_eq!(env.model_id, "c1");
    assert_eq!(env.patches().unwrap(), vec![Patch::set("count", json!(6))]);
}
