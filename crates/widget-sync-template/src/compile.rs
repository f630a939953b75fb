use std::collections::BTreeSet;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::expr::Expr;
use crate::parse::{self, Attr, Node, Segment};
use crate::CompileError;

#[derive(Debug)]
pub(crate) enum AttrPlan {
    Static { name: String, value: String },
    Dynamic(usize),
}

/// Node of a compiled fragment. Dynamic parts refer to a binding slot of the
/// fragment that owns them.
#[derive(Debug)]
pub(crate) enum FNode {
    Element {
        tag: String,
        attrs: Vec<AttrPlan>,
        events: Vec<(String, String)>,
        children: Vec<FNode>,
    },
    Text(String),
    DynText(usize),
    Block(usize),
}

#[derive(Debug)]
pub(crate) enum Binding {
    Text(Vec<Segment>),
    Attr {
        name: String,
        parts: Vec<Segment>,
    },
    List {
        var: String,
        source: Expr,
        body: Rc<Fragment>,
    },
    Cond {
        cond: Expr,
        then_frag: Rc<Fragment>,
        else_frag: Rc<Fragment>,
    },
}

/// A compiled node list with its own binding slots. Slots are numbered in
/// document order, the order an instance creates them in.
#[derive(Debug, Default)]
pub(crate) struct Fragment {
    pub(crate) nodes: Vec<FNode>,
    pub(crate) bindings: Vec<Binding>,
    /// Free name -> slots reading it.
    pub(crate) deps: IndexMap<String, Vec<usize>>,
}

impl Fragment {
    fn push(&mut self, binding: Binding, names: impl IntoIterator<Item = String>) -> usize {
        let slot = self.bindings.len();
        self.bindings.push(binding);
        for name in names {
            let slots = self.deps.entry(name).or_default();
            if slots.last() != Some(&slot) {
                slots.push(slot);
            }
        }
        slot
    }

    /// Slots affected by any of `changed`, in document order.
    pub(crate) fn slots_for<S: AsRef<str>>(&self, changed: &[S]) -> BTreeSet<usize> {
        changed
            .iter()
            .filter_map(|name| self.deps.get(name.as_ref()))
            .flatten()
            .copied()
            .collect()
    }
}

/// A parsed and analysed template, ready to be instantiated any number of
/// times.
#[derive(Debug)]
pub struct CompiledTemplate {
    source: String,
    bindings: Vec<String>,
    handlers: Vec<String>,
    pub(crate) root: Rc<Fragment>,
}

impl CompiledTemplate {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names the template was compiled against.
    pub fn bindings(&self) -> &[String] {
        &self.bindings
    }

    /// Bound names the template actually reads, in first-use order.
    pub fn dependencies(&self) -> Vec<&str> {
        self.root.deps.keys().map(String::as_str).collect()
    }

    /// Number of top-level locations (text, attribute, list or conditional
    /// block) that are revisited when `name` changes.
    pub fn locations_for(&self, name: &str) -> usize {
        self.root.deps.get(name).map_or(0, Vec::len)
    }

    /// Event handler names referenced by `on:` attributes.
    pub fn handlers(&self) -> &[String] {
        &self.handlers
    }
}

/// Compiles `template` against the property names in `bindings`.
///
/// Every path root must be one of `bindings` or a loop variable in scope.
pub fn compile(template: &str, bindings: &[&str]) -> Result<CompiledTemplate, CompileError> {
    let nodes = parse::parse(template)?;
    let mut compiler = Compiler {
        bound: bindings.iter().map(|b| b.to_string()).collect(),
        handlers: IndexSet::new(),
    };
    let root = compiler.fragment(&nodes, &mut Vec::new())?;
    Ok(CompiledTemplate {
        source: template.to_string(),
        bindings: compiler.bound.into_iter().collect(),
        handlers: compiler.handlers.into_iter().collect(),
        root: Rc::new(root),
    })
}

struct Compiler {
    bound: IndexSet<String>,
    handlers: IndexSet<String>,
}

impl Compiler {
    fn fragment(&mut self, nodes: &[Node], scope: &mut Vec<String>) -> Result<Fragment, CompileError> {
        let mut frag = Fragment::default();
        let mut planned = Vec::with_capacity(nodes.len());
        for node in nodes {
            planned.push(self.node(node, scope, &mut frag)?);
        }
        frag.nodes = planned;
        Ok(frag)
    }

    fn node(&mut self, node: &Node, scope: &mut Vec<String>, frag: &mut Fragment) -> Result<FNode, CompileError> {
        match node {
            Node::Text(parts) => {
                if let Some(text) = literal(parts) {
                    return Ok(FNode::Text(text));
                }
                let names = self.segment_names(parts, scope)?;
                Ok(FNode::DynText(frag.push(Binding::Text(parts.clone()), names)))
            }
            Node::Element { tag, attrs, children } => {
                let mut planned_attrs = Vec::with_capacity(attrs.len());
                let mut events = Vec::new();
                for attr in attrs {
                    match attr {
                        Attr::Static { name, value } => planned_attrs.push(AttrPlan::Static {
                            name: name.clone(),
                            value: value.clone(),
                        }),
                        Attr::Dynamic { name, parts } => {
                            let names = self.segment_names(parts, scope)?;
                            let slot = frag.push(
                                Binding::Attr {
                                    name: name.clone(),
                                    parts: parts.clone(),
                                },
                                names,
                            );
                            planned_attrs.push(AttrPlan::Dynamic(slot));
                        }
                        Attr::Event { event, handler } => {
                            self.handlers.insert(handler.clone());
                            events.push((event.clone(), handler.clone()));
                        }
                    }
                }
                let mut planned_children = Vec::with_capacity(children.len());
                for child in children {
                    planned_children.push(self.node(child, scope, frag)?);
                }
                Ok(FNode::Element {
                    tag: tag.clone(),
                    attrs: planned_attrs,
                    events,
                    children: planned_children,
                })
            }
            Node::For { var, source, body } => {
                self.check(source, scope)?;
                scope.push(var.clone());
                let body = self.fragment(body, scope);
                scope.pop();
                let body = body?;
                let names: IndexSet<String> = std::iter::once(source.root.clone())
                    .chain(body.deps.keys().filter(|n| *n != var).cloned())
                    .collect();
                let slot = frag.push(
                    Binding::List {
                        var: var.clone(),
                        source: source.clone(),
                        body: Rc::new(body),
                    },
                    names,
                );
                Ok(FNode::Block(slot))
            }
            Node::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.check(cond, scope)?;
                let then_frag = self.fragment(then_branch, scope)?;
                let else_frag = self.fragment(else_branch, scope)?;
                let names: IndexSet<String> = std::iter::once(cond.root.clone())
                    .chain(then_frag.deps.keys().cloned())
                    .chain(else_frag.deps.keys().cloned())
                    .collect();
                let slot = frag.push(
                    Binding::Cond {
                        cond: cond.clone(),
                        then_frag: Rc::new(then_frag),
                        else_frag: Rc::new(else_frag),
                    },
                    names,
                );
                Ok(FNode::Block(slot))
            }
        }
    }

    fn check(&self, expr: &Expr, scope: &[String]) -> Result<(), CompileError> {
        if scope.contains(&expr.root) || self.bound.contains(&expr.root) {
            return Ok(());
        }
        Err(CompileError::UnboundName {
            name: expr.root.clone(),
            offset: expr.offset,
        })
    }

    fn segment_names(&self, parts: &[Segment], scope: &[String]) -> Result<IndexSet<String>, CompileError> {
        let mut names = IndexSet::new();
        for part in parts {
            if let Segment::Expr(expr) = part {
                self.check(expr, scope)?;
                names.insert(expr.root.clone());
            }
        }
        Ok(names)
    }
}

fn literal(parts: &[Segment]) -> Option<String> {
    let mut out = String::new();
    for part in parts {
        match part {
            Segment::Literal(s) => out.push_str(s),
            Segment::Expr(_) => return None,
        }
    }
    Some(out)
}
