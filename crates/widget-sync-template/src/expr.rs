//! Binding expressions: dotted paths such as `value`, `item.label`, `rows.0`.

use std::collections::HashMap;
use std::hash::BuildHasher;

use serde_json::{Map, Value};
use widget_sync_core::PropertyStore;

use crate::CompileError;

/// Source of bound property values.
pub trait Values {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Values for PropertyStore {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Values for Map<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl<S: BuildHasher> Values for HashMap<String, Value, S> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Expr {
    pub(crate) root: String,
    pub(crate) steps: Vec<Step>,
    pub(crate) offset: usize,
}

impl Expr {
    pub(crate) fn parse(src: &str, offset: usize) -> Result<Self, CompileError> {
        let invalid = || CompileError::InvalidExpression {
            expr: src.to_string(),
            offset,
        };
        let src = src.trim();
        let mut parts = src.split('.');
        let root = parts.next().filter(|r| is_identifier(r)).ok_or_else(invalid)?;
        let mut steps = Vec::new();
        for part in parts {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(invalid());
            }
            steps.push(match part.parse::<usize>() {
                Ok(i) => Step::Index(i),
                Err(_) => Step::Key(part.to_string()),
            });
        }
        Ok(Self {
            root: root.to_string(),
            steps,
            offset,
        })
    }

    /// Resolves against the innermost local first, then `values`. Missing
    /// paths evaluate to `null`.
    pub(crate) fn eval(&self, scope: &Scope<'_>) -> Value {
        let Some(mut cur) = scope.lookup(&self.root) else {
            return Value::Null;
        };
        for step in &self.steps {
            let next = match (step, cur) {
                (Step::Index(i), Value::Array(items)) => items.get(*i),
                (Step::Index(i), Value::Object(map)) => map.get(&i.to_string()),
                (Step::Key(k), Value::Object(map)) => map.get(k),
                _ => None,
            };
            match next {
                Some(v) => cur = v,
                None => return Value::Null,
            }
        }
        cur.clone()
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Evaluation scope: loop variables layered over the bound values.
#[derive(Clone, Copy)]
pub(crate) struct Scope<'a> {
    pub(crate) values: &'a dyn Values,
    pub(crate) locals: &'a [(String, Value)],
}

impl<'a> Scope<'a> {
    pub(crate) fn new(values: &'a dyn Values, locals: &'a [(String, Value)]) -> Self {
        Self { values, locals }
    }

    fn lookup(&self, name: &str) -> Option<&'a Value> {
        self.locals
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .or_else(|| self.values.lookup(name))
    }
}
