use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::{compile, CompileError, CompiledTemplate};

/// Compiled templates keyed by source text and binding names, so each
/// distinct template is parsed once no matter how many views render it.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: HashMap<(String, Vec<String>), Rc<CompiledTemplate>>,
    hits: u64,
    misses: u64,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(
        &mut self,
        template: &str,
        bindings: &[&str],
    ) -> Result<Rc<CompiledTemplate>, CompileError> {
        let key = (
            template.to_string(),
            bindings.iter().map(|b| b.to_string()).collect::<Vec<_>>(),
        );
        if let Some(hit) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(Rc::clone(hit));
        }
        self.misses += 1;
        let compiled = Rc::new(compile(template, bindings)?);
        debug!(
            deps = ?compiled.dependencies(),
            cached = self.entries.len() + 1,
            "compiled template"
        );
        self.entries.insert(key, Rc::clone(&compiled));
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
