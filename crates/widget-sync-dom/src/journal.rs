use crate::NodeId;

/// One change applied to the tree, in the order it happened.
///
/// Only changes to nodes reachable from the root are recorded: building a
/// detached subtree is silent, attaching it is one `Insert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Insert { parent: NodeId, node: NodeId },
    Remove { parent: Option<NodeId>, node: NodeId },
    SetText { node: NodeId },
    SetAttribute { node: NodeId, name: String },
    RemoveAttribute { node: NodeId, name: String },
}

impl Mutation {
    /// The node whose own state changed (for inserts and removals, the moved node).
    pub fn target(&self) -> NodeId {
        match self {
            Mutation::Insert { node, .. }
            | Mutation::Remove { node, .. }
            | Mutation::SetText { node }
            | Mutation::SetAttribute { node, .. }
            | Mutation::RemoveAttribute { node, .. } => *node,
        }
    }
}
