//! View adapter rendering models through a compiled template.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;
use widget_sync_core::PropertyStore;
use widget_sync_dom::NodeId;
use widget_sync_template::{
    compile, instantiate_with_owner, CompileError, CompiledTemplate, TemplateCache, TemplateHandle,
};

use crate::binder::{ViewAction, ViewAdapter, ViewContext, ViewInstance};
use crate::error::ViewError;

type Handler = Rc<dyn Fn(&PropertyStore) -> Vec<ViewAction>>;

/// Renders every model of its type with one compiled template, updating
/// only the locations bound to changed properties.
///
/// DOM handlers named in `on:` attributes map to actions registered with
/// [`TemplateView::on`]; an unmapped handler is sent to the host as an
/// event of the same name with a `null` payload.
#[derive(Clone)]
pub struct TemplateView {
    template: Rc<CompiledTemplate>,
    handlers: IndexMap<String, Handler>,
}

impl fmt::Debug for TemplateView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateView")
            .field("dependencies", &self.template.dependencies())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TemplateView {
    pub fn new(template: Rc<CompiledTemplate>) -> Self {
        Self {
            template,
            handlers: IndexMap::new(),
        }
    }

    pub fn compile(template: &str, bindings: &[&str]) -> Result<Self, CompileError> {
        Ok(Self::new(Rc::new(compile(template, bindings)?)))
    }

    /// Like [`TemplateView::compile`], sharing compiled templates through
    /// `cache`.
    pub fn cached(cache: &mut TemplateCache, template: &str, bindings: &[&str]) -> Result<Self, CompileError> {
        Ok(Self::new(cache.get_or_compile(template, bindings)?))
    }

    /// Maps DOM handler `handler` to the actions `f` derives from the
    /// model's current properties.
    pub fn on<F>(mut self, handler: &str, f: F) -> Self
    where
        F: Fn(&PropertyStore) -> Vec<ViewAction> + 'static,
    {
        self.handlers.insert(handler.to_string(), Rc::new(f));
        self
    }

    pub fn template(&self) -> &Rc<CompiledTemplate> {
        &self.template
    }
}

impl ViewAdapter for TemplateView {
    fn render(
        &self,
        ctx: &mut ViewContext<'_>,
        store: &PropertyStore,
        mount: NodeId,
    ) -> Result<Box<dyn ViewInstance>, ViewError> {
        let owner = ctx.owner();
        let handle = instantiate_with_owner(&self.template, ctx.dom, mount, store, owner)?;
        Ok(Box::new(TemplateInstance {
            handle,
            handlers: self.handlers.clone(),
        }))
    }
}

struct TemplateInstance {
    handle: TemplateHandle,
    handlers: IndexMap<String, Handler>,
}

impl ViewInstance for TemplateInstance {
    fn update(
        &mut self,
        ctx: &mut ViewContext<'_>,
        store: &PropertyStore,
        changed: &[String],
    ) -> Result<(), ViewError> {
        Ok(self.handle.update(ctx.dom, store, changed)?)
    }

    fn dispose(&mut self, ctx: &mut ViewContext<'_>) {
        self.handle.dispose(ctx.dom);
    }

    fn on_dom_event(
        &mut self,
        _ctx: &mut ViewContext<'_>,
        handler: &str,
        store: &PropertyStore,
    ) -> Result<Vec<ViewAction>, ViewError> {
        Ok(match self.handlers.get(handler) {
            Some(f) => f(store),
            None => vec![ViewAction::Emit {
                name: handler.to_string(),
                data: Value::Null,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use widget_sync_core::Patch;
    use widget_sync_dom::Dom;

    use super::*;

    #[test]
    fn renders_updates_and_maps_handlers() {
        let view = TemplateView::compile(
            r#"<button on:click="inc">${count}</button><i on:click="ping"></i>"#,
            &["count"],
        )
        .expect("template must compile")
        .on("inc", |store| {
            let next = store.get("count").and_then(Value::as_i64).unwrap_or(0) + 1;
            vec![ViewAction::Patch(Patch::set("count", json!(next)))]
        });

        let mut store = PropertyStore::schemaless();
        store.apply_patch(&Patch::set("count", json!(1))).unwrap();
        let mut dom = Dom::new();
        let mount = dom.root();
        let mut ctx = ViewContext::new(&mut dom, "c1", 7);
        let mut instance = view.render(&mut ctx, &store, mount).unwrap();
        assert_eq!(ctx.dom.inner_html(mount), "<button>1</button><i></i>");

        let actions = instance.on_dom_event(&mut ctx, "inc", &store).unwrap();
        assert_eq!(actions, vec![ViewAction::Patch(Patch::set("count", json!(2)))]);
        let actions = instance.on_dom_event(&mut ctx, "ping", &store).unwrap();
        assert_eq!(
            actions,
            vec![ViewAction::Emit {
                name: "ping".into(),
                data: Value::Null
            }]
        );

        let changed = store.apply_patch(&Patch::set("count", json!(2))).unwrap();
        instance.update(&mut ctx, &store, &changed).unwrap();
        assert_eq!(ctx.dom.inner_html(mount), "<button>2</button><i></i>");

        instance.dispose(&mut ctx);
        assert_eq!(ctx.dom.inner_html(mount), "");
        assert_eq!(ctx.dom.listener_count(), 0);
    }
}
