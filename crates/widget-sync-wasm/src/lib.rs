//! WASM bindings for widget-sync.
//!
//! Exposes a `WidgetDocument` class owning one comm manager, its document
//! tree and a single host channel. The page owns the real socket: it hands
//! every host frame to `receive`/`receiveBinary` and ships whatever
//! `drainOutbound` returns back to the host. Views are registered as
//! templates by type name; `html` returns the current markup of a mount so
//! the page can mirror it into the live DOM.
//!
//! Every public `#[wasm_bindgen]` method delegates to a plain Rust method
//! returning `Result<_, String>`, so the logic is testable natively.

use serde_json::Value;
use tracing::debug;
use wasm_bindgen::prelude::*;

use widget_sync::{CommManager, QueueHandle, QueueTransport, SyncConfig, TemplateView, ViewRegistry};
use widget_sync_core::codec::{decode_frame, encode_envelope};
use widget_sync_core::Frame;
use widget_sync_dom::NodeId;
use widget_sync_template::TemplateCache;

const CHANNEL: &str = "host";

fn js_err(e: String) -> JsValue {
    JsValue::from_str(&e)
}

#[wasm_bindgen]
pub struct WidgetDocument {
    manager: CommManager,
    host: QueueHandle,
    templates: TemplateCache,
}

impl WidgetDocument {
    fn build(config_json: Option<&str>) -> Result<Self, String> {
        let config = match config_json {
            Some(src) => SyncConfig::from_json_str(src).map_err(|e| e.to_string())?,
            None => SyncConfig::default(),
        };
        let mut manager = CommManager::init(config, ViewRegistry::new());
        let (transport, host) = QueueTransport::pair();
        manager.connect(CHANNEL, transport);
        Ok(Self {
            manager,
            host,
            templates: TemplateCache::new(),
        })
    }

    fn add_template(&mut self, type_tag: &str, template: &str, bindings_json: &str) -> Result<(), String> {
        let bindings: Vec<String> =
            serde_json::from_str(bindings_json).map_err(|e| format!("invalid bindings JSON: {e}"))?;
        let bindings: Vec<&str> = bindings.iter().map(String::as_str).collect();
        let view = TemplateView::cached(&mut self.templates, template, &bindings)
            .map_err(|e| format!("template for `{type_tag}` does not compile: {e}"))?;
        self.manager.views_mut().register(type_tag, view);
        debug!(type_tag, cached = self.templates.len(), "template registered");
        Ok(())
    }

    /// Records the page's socket state. Coming back up after the host
    /// channel was given up on opens a fresh one; the host then re-creates
    /// its models.
    fn set_link(&mut self, connected: bool) {
        self.host.set_connected(connected);
        if !connected || !self.manager.is_active() || self.manager.channel_state(CHANNEL).is_some() {
            return;
        }
        let (transport, host) = QueueTransport::pair();
        self.manager.connect(CHANNEL, transport);
        self.host = host;
        debug!(channel = CHANNEL, "host channel reopened");
    }

    fn push_frame(&mut self, frame: Frame) -> usize {
        self.host.push_inbound(frame);
        self.manager.poll_now()
    }

    /// Outbound frames as a JSON array of envelopes.
    fn outbound_json(&mut self) -> Result<String, String> {
        let envelopes = self
            .host
            .drain_outbound()
            .iter()
            .map(|frame| decode_frame(frame).map(|env| encode_envelope(&env)))
            .collect::<Result<Vec<Value>, _>>()
            .map_err(|e| format!("outbound frame does not decode: {e}"))?;
        serde_json::to_string(&envelopes).map_err(|e| e.to_string())
    }

    /// Follows a `/`-separated path of child indexes from mount `mount_id`.
    fn resolve(&self, mount_id: &str, path: &str) -> Result<NodeId, String> {
        let mut node = self
            .manager
            .mount(mount_id)
            .ok_or_else(|| format!("unknown mount `{mount_id}`"))?;
        for step in path.split('/').filter(|s| !s.is_empty()) {
            let index: usize = step
                .parse()
                .map_err(|_| format!("invalid path step `{step}` in `{path}`"))?;
            node = *self
                .manager
                .dom()
                .children(node)
                .get(index)
                .ok_or_else(|| format!("path `{path}` leaves the tree at `{step}`"))?;
        }
        Ok(node)
    }

    fn fire(&mut self, mount_id: &str, path: &str, event: &str) -> Result<usize, String> {
        let node = self.resolve(mount_id, path)?;
        let handled = self.manager.dispatch_dom_event(node, event);
        self.manager.poll_now();
        Ok(handled)
    }

    fn diagnostics_json(&self) -> String {
        let list: Vec<Value> = self
            .manager
            .diagnostics()
            .map(|d| {
                serde_json::json!({
                    "channel": d.channel_id,
                    "modelId": d.model_id,
                    "code": d.code,
                    "message": d.message,
                })
            })
            .collect();
        Value::Array(list).to_string()
    }
}

#[wasm_bindgen]
impl WidgetDocument {
    /// `config_json` uses the same keys as the TOML config; omitted keys
    /// keep their defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<WidgetDocument, JsValue> {
        Self::build(config_json.as_deref()).map_err(js_err)
    }

    /// Renders models of `type_tag` with `template`, whose expressions may
    /// read the property names listed in `bindings_json`.
    #[wasm_bindgen(js_name = "registerTemplate")]
    pub fn register_template(&mut self, type_tag: &str, template: &str, bindings_json: &str) -> Result<(), JsValue> {
        self.add_template(type_tag, template, bindings_json).map_err(js_err)
    }

    /// Creates mount `mount_id` if needed.
    pub fn mount(&mut self, mount_id: &str) -> Result<(), JsValue> {
        self.manager
            .mount_point(mount_id)
            .map(drop)
            .map_err(|e| js_err(e.to_string()))
    }

    /// Hands a text frame from the host over and runs one cycle. Returns the
    /// number of frames dispatched.
    pub fn receive(&mut self, text: &str) -> usize {
        self.push_frame(Frame::Text(text.to_string()))
    }

    #[wasm_bindgen(js_name = "receiveBinary")]
    pub fn receive_binary(&mut self, bytes: &[u8]) -> usize {
        self.push_frame(Frame::Binary(bytes.to_vec()))
    }

    /// Runs one cycle without new input, driving reconnect timers.
    pub fn poll(&mut self) -> usize {
        self.manager.poll_now()
    }

    #[wasm_bindgen(js_name = "drainOutbound")]
    pub fn drain_outbound(&mut self) -> Result<String, JsValue> {
        self.outbound_json().map_err(js_err)
    }

    /// Reports whether the page's socket is up.
    #[wasm_bindgen(js_name = "setConnected")]
    pub fn set_connected(&mut self, connected: bool) {
        self.set_link(connected);
    }

    pub fn html(&self, mount_id: &str) -> Option<String> {
        let node = self.manager.mount(mount_id)?;
        Some(self.manager.dom().inner_html(node))
    }

    /// Fires `event` at the node reached by `path` (child indexes such as
    /// `"0/1"`) under mount `mount_id`.
    #[wasm_bindgen(js_name = "fireEvent")]
    pub fn fire_event(&mut self, mount_id: &str, path: &str, event: &str) -> Result<usize, JsValue> {
        self.fire(mount_id, path, event).map_err(js_err)
    }

    /// Retained diagnostics as a JSON array.
    pub fn diagnostics(&self) -> String {
        self.diagnostics_json()
    }

    pub fn teardown(&mut self) {
        self.manager.teardown();
    }
}
