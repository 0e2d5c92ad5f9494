use crate::types::{now_millis, TraceId};

use super::client::ClientAnnex;
use super::node::{NodeIndex, TimerNode};
use super::sql::{SqlEvent, SqlRecord};

/// Full timing record of one profiled request.
///
/// Owns every [`TimerNode`] in a flat arena; slot 0 is always the root.
#[derive(Clone, Debug, PartialEq)]
pub struct Trace {
    id: TraceId,
    name: String,
    machine_name: String,
    started_at_ms: u64,
    nodes: Vec<TimerNode>,
    has_been_viewed: bool,
    client: Option<ClientAnnex>,
}

impl Trace {
    const ROOT: NodeIndex = NodeIndex(0);

    /// Starts a trace now. `name` identifies the request (usually its path),
    /// `root_name` names the root timer.
    pub fn create(
        name: impl Into<String>,
        root_name: impl Into<String>,
        machine_name: impl Into<String>,
    ) -> Self {
        let started_at_ms = now_millis();
        Self {
            id: TraceId::generate(),
            name: name.into(),
            machine_name: machine_name.into(),
            started_at_ms,
            nodes: vec![TimerNode::new_root(root_name, started_at_ms)],
            has_been_viewed: false,
            client: None,
        }
    }

    /// Detached trace sharing this trace's clock origin, used to time work on
    /// another thread before grafting it back.
    pub fn fragment(&self, root_name: impl Into<String>) -> Self {
        Self {
            id: TraceId::generate(),
            name: self.name.clone(),
            machine_name: self.machine_name.clone(),
            started_at_ms: self.started_at_ms,
            nodes: vec![TimerNode::new_root(root_name, self.started_at_ms)],
            has_been_viewed: false,
            client: None,
        }
    }

    /// Generated id.
    pub fn id(&self) -> &TraceId {
        &self.id
    }

    /// Request name, usually its path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Machine that served the request.
    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    /// Wall-clock start in epoch milliseconds.
    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    /// Absolute start of the root timer in epoch milliseconds; used for eviction.
    pub fn absolute_start_ms(&self) -> u64 {
        let offset = self.root().start_offset_ms();
        if offset >= 0 {
            self.started_at_ms.saturating_add(offset as u64)
        } else {
            self.started_at_ms.saturating_sub(offset.unsigned_abs())
        }
    }

    /// Arena index of the root timer.
    pub fn root_index(&self) -> NodeIndex {
        Self::ROOT
    }

    /// Root timer.
    pub fn root(&self) -> &TimerNode {
        &self.nodes[Self::ROOT.0]
    }

    /// Node at `index`, if it exists.
    pub fn node(&self, index: NodeIndex) -> Option<&TimerNode> {
        self.nodes.get(index.0)
    }

    /// Mutable node at `index`, if it exists.
    pub fn node_mut(&mut self, index: NodeIndex) -> Option<&mut TimerNode> {
        self.nodes.get_mut(index.0)
    }

    /// All nodes in arena order, including unfinished ones.
    pub fn nodes(&self) -> impl Iterator<Item = &TimerNode> {
        self.nodes.iter()
    }

    /// Every SQL event in the trace, in arena then insertion order.
    pub fn sql_events(&self) -> impl Iterator<Item = &SqlEvent> {
        self.nodes.iter().flat_map(|node| node.sql_events())
    }

    /// Root duration, zero until [`finalize`](Self::finalize).
    pub fn duration_ms(&self) -> f64 {
        self.root().duration_ms()
    }

    /// Set by the first retrieval.
    pub fn has_been_viewed(&self) -> bool {
        self.has_been_viewed
    }

    /// Client timings attached on first view.
    pub fn client_annex(&self) -> Option<&ClientAnnex> {
        self.client.as_ref()
    }

    /// Allocates a node that will become a child of `parent` once closed.
    ///
    /// Parent link and depth are fixed now so nested nodes opened before this
    /// one closes get the right depth.
    pub fn open_node(&mut self, parent: NodeIndex, name: impl Into<String>) -> NodeIndex {
        let depth = self.node(parent).map(|p| p.depth() + 1).unwrap_or(1);
        let mut node = TimerNode::new(name, self.started_at_ms);
        node.attach_under(parent, depth);
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(node);
        index
    }

    /// Finishes `index` and appends it to its parent's children.
    ///
    /// Returns false for an unknown index, a node without a parent, or a node
    /// that is already closed.
    pub fn close_node(&mut self, index: NodeIndex, duration_ms: f64) -> bool {
        let Some(node) = self.node(index) else {
            return false;
        };
        if node.is_finished() {
            return false;
        }
        let Some(parent) = node.parent() else {
            return false;
        };
        let Some((parent_node, child)) = pair_mut(&mut self.nodes, parent.0, index.0) else {
            return false;
        };
        child.finish(duration_ms);
        parent_node.add_child(child, index);
        true
    }

    /// Attaches a sub-event to the node at `index`.
    pub fn add_sql_event(
        &mut self,
        index: NodeIndex,
        record: SqlRecord,
        stack_snippet: String,
    ) -> Option<&SqlEvent> {
        let started_at_ms = self.started_at_ms;
        let node = self.nodes.get_mut(index.0)?;
        Some(node.add_sql_event(record, started_at_ms, stack_snippet))
    }

    /// Records the total request time on the root. Called once, at completion.
    pub fn finalize(&mut self, total_duration_ms: f64) {
        self.nodes[Self::ROOT.0].finish(total_duration_ms);
    }

    /// Marks the trace as viewed and stores the client annex.
    ///
    /// Only the first call has any effect; it returns true.
    pub fn annotate(&mut self, annex: Option<ClientAnnex>) -> bool {
        if self.has_been_viewed {
            return false;
        }
        self.has_been_viewed = true;
        self.client = annex;
        true
    }

    /// Moves every node of `other` into this arena, hanging its root under
    /// `parent` as a closed child. `other` must already be finalized.
    pub fn graft(&mut self, parent: NodeIndex, other: Trace) -> Option<NodeIndex> {
        let parent_depth = self.node(parent)?.depth();
        let offset = self.nodes.len();
        let grafted_root = NodeIndex(offset);
        for (slot, mut node) in other.nodes.into_iter().enumerate() {
            node.rebase(offset, parent_depth + 1);
            if slot == Self::ROOT.0 {
                node.demote_root();
                node.attach_under(parent, parent_depth + 1);
            }
            self.nodes.push(node);
        }
        let (parent_node, child) = pair_mut(&mut self.nodes, parent.0, grafted_root.0)?;
        parent_node.add_child(child, grafted_root);
        Some(grafted_root)
    }
}

/// Disjoint mutable borrows of two arena slots.
fn pair_mut(
    nodes: &mut [TimerNode],
    first: usize,
    second: usize,
) -> Option<(&mut TimerNode, &mut TimerNode)> {
    if first == second || first >= nodes.len() || second >= nodes.len() {
        return None;
    }
    if first < second {
        let (head, tail) = nodes.split_at_mut(second);
        Some((&mut head[first], &mut tail[0]))
    } else {
        let (head, tail) = nodes.split_at_mut(first);
        Some((&mut tail[0], &mut head[second]))
    }
}
