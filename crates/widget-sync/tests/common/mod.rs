#![allow(dead_code)]

use serde_json::{json, Map, Value};
use web_time::Instant;
use widget_sync::{
    logging, CommManager, LoopbackTransport, SyncConfig, TemplateView, Transport, ViewAction,
    ViewRegistry,
};
use widget_sync_core::codec::{decode_frame, encode_frame};
use widget_sync_core::{CreatePayload, Envelope, Patch, WireFormat};
use widget_sync_dom::{Dom, NodeId};

pub const PROGRESS: &str = r#"
<div class="progress" aria-valuemax="${max}">
  <div class="fill" style="width: ${value}%"></div>
  <span class="label">${description}: ${value}</span>
</div>
"#;

pub const COUNTER: &str = r#"<button on:click="inc">${count}</button><a on:click="ping">ping</a>"#;

pub fn object(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn views() -> ViewRegistry {
    let progress = TemplateView::compile(PROGRESS, &["value", "max", "description"])
        .expect("progress template must compile");
    let counter = TemplateView::compile(COUNTER, &["count"])
        .expect("counter template must compile")
        .on("inc", |store| {
            let next = store.get("count").and_then(Value::as_i64).unwrap_or(0) + 1;
            vec![ViewAction::Patch(Patch::set("count", json!(next)))]
        });
    ViewRegistry::new()
        .with("ProgressBar", progress)
        .with("Counter", counter)
}

pub fn create(model_id: &str, type_tag: &str, props: Value, mount: Option<&str>) -> Envelope {
    let mut payload = CreatePayload::new(type_tag, object(props));
    payload.mount = mount.map(str::to_string);
    Envelope::create(model_id, &payload)
}

pub fn progress_bar(model_id: &str, mount: Option<&str>) -> Envelope {
    create(
        model_id,
        "ProgressBar",
        json!({"value": 0, "max": 100, "description": "Loading"}),
        mount,
    )
}

/// A manager connected to an in-memory host over channel `kernel`, with
/// mount `main` ready.
pub struct Harness {
    pub manager: CommManager,
    pub host: LoopbackTransport,
    /// Fault handle on the browser end of the link.
    pub link: LoopbackTransport,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        logging::init_for_tests();
        let mut manager = CommManager::with_dom(config, views(), Dom::with_journal());
        manager.mount_point("main").expect("mount must be created");
        let (host, browser) = LoopbackTransport::pair();
        let link = browser.clone();
        manager.connect("kernel", browser);
        manager.poll(Instant::now());
        manager.dom_mut().take_mutations();
        Self { manager, host, link }
    }

    pub fn send(&mut self, env: &Envelope) {
        let frame = encode_frame(env, WireFormat::Json).expect("envelope must encode");
        self.host.transmit(frame).expect("host must be able to send");
    }

    pub fn pump(&mut self) -> usize {
        self.manager.poll(Instant::now())
    }

    /// Everything the browser sent to the host so far.
    pub fn host_received(&mut self) -> Vec<Envelope> {
        self.host
            .drain()
            .expect("host end must be readable")
            .iter()
            .map(|f| decode_frame(f).expect("browser frames must decode"))
            .collect()
    }

    pub fn mount(&self) -> NodeId {
        self.manager.mount("main").expect("mount must exist")
    }

    pub fn html(&self) -> String {
        self.manager.dom().inner_html(self.mount())
    }

    pub fn codes(&self) -> Vec<String> {
        self.manager.diagnostics().map(|d| d.code.clone()).collect()
    }
}
