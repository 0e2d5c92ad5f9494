use crate::types::{offset_from, SqlEventId, TimerId};

use super::sql::{ExecuteKind, SqlEvent, SqlRecord};

/// Position of a [`TimerNode`] inside its trace's node arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeIndex(pub(crate) usize);

impl NodeIndex {
    /// Raw arena slot.
    pub fn get(self) -> usize {
        self.0
    }
}

/// One named, timed unit of work.
///
/// Nodes live in their trace's arena. `children` holds the arena indices of the
/// nodes this one owns, in completion order; `parent` is a non-owning link back.
#[derive(Clone, Debug, PartialEq)]
pub struct TimerNode {
    id: TimerId,
    name: String,
    start_offset_ms: i64,
    duration_ms: f64,
    self_duration_ms: f64,
    children_duration_ms: f64,
    parent: Option<NodeIndex>,
    parent_id: Option<TimerId>,
    depth: u32,
    children: Vec<NodeIndex>,
    sql_events: Vec<SqlEvent>,
    sql_duration_ms: f64,
    is_root: bool,
    finished: bool,
    executed_readers: u32,
    executed_scalars: u32,
    executed_non_queries: u32,
}

impl TimerNode {
    /// New unattached node starting now, relative to a trace started at `trace_started_ms`.
    pub fn new(name: impl Into<String>, trace_started_ms: u64) -> Self {
        Self {
            id: TimerId::generate(),
            name: name.into(),
            start_offset_ms: offset_from(trace_started_ms),
            duration_ms: 0.0,
            self_duration_ms: 0.0,
            children_duration_ms: 0.0,
            parent: None,
            parent_id: None,
            depth: 0,
            children: Vec::new(),
            sql_events: Vec::new(),
            sql_duration_ms: 0.0,
            is_root: false,
            finished: false,
            executed_readers: 0,
            executed_scalars: 0,
            executed_non_queries: 0,
        }
    }

    /// Root node of a trace.
    pub fn new_root(name: impl Into<String>, trace_started_ms: u64) -> Self {
        let mut node = Self::new(name, trace_started_ms);
        node.is_root = true;
        node
    }

    /// Records `child` (stored at `child_index`) as the next child of this node.
    ///
    /// The child's duration is folded into the running total used by [`finish`](Self::finish),
    /// so the child must already be finished.
    pub fn add_child(&mut self, child: &mut TimerNode, child_index: NodeIndex) {
        child.parent_id = Some(self.id.clone());
        child.depth = self.depth + 1;
        self.children.push(child_index);
        self.children_duration_ms += child.duration_ms;
    }

    /// Appends a sub-event that starts now.
    pub fn add_sql_event(
        &mut self,
        record: SqlRecord,
        trace_started_ms: u64,
        stack_snippet: String,
    ) -> &SqlEvent {
        self.count_execution(record.kind);
        self.sql_duration_ms += record.duration_ms;
        let event = SqlEvent::new(
            record,
            offset_from(trace_started_ms),
            self.id.clone(),
            stack_snippet,
        );
        self.sql_events.push(event);
        &self.sql_events[self.sql_events.len() - 1]
    }

    /// Sets the final duration. Expected exactly once, after every child was added.
    pub fn finish(&mut self, duration_ms: f64) {
        self.duration_ms = duration_ms;
        self.self_duration_ms = duration_ms - self.children_duration_ms;
        self.finished = true;
    }

    /// Bumps the executed counter matching `kind`.
    pub fn count_execution(&mut self, kind: ExecuteKind) {
        match kind {
            ExecuteKind::Reader => self.executed_readers += 1,
            ExecuteKind::Scalar => self.executed_scalars += 1,
            ExecuteKind::NonQuery => self.executed_non_queries += 1,
            ExecuteKind::None => {}
        }
    }

    /// Flags one of this node's events as a duplicate. Returns false for an unknown id.
    pub fn mark_sql_duplicate(&mut self, id: &SqlEventId) -> bool {
        match self.sql_events.iter_mut().find(|event| event.id() == id) {
            Some(event) => {
                event.mark_duplicate();
                true
            }
            None => false,
        }
    }

    /// Sets the first-fetch duration of one of this node's events.
    pub fn set_sql_first_fetch(&mut self, id: &SqlEventId, duration_ms: f64) -> bool {
        match self.sql_events.iter_mut().find(|event| event.id() == id) {
            Some(event) => {
                event.set_first_fetch_duration(duration_ms);
                true
            }
            None => false,
        }
    }

    pub(crate) fn attach_under(&mut self, parent: NodeIndex, depth: u32) {
        self.parent = Some(parent);
        self.depth = depth;
    }

    pub(crate) fn rebase(&mut self, offset: usize, depth_shift: u32) {
        for child in &mut self.children {
            child.0 += offset;
        }
        if let Some(parent) = self.parent.as_mut() {
            parent.0 += offset;
        }
        self.depth += depth_shift;
    }

    pub(crate) fn demote_root(&mut self) {
        self.is_root = false;
    }

    /// Generated timer id.
    pub fn id(&self) -> &TimerId {
        &self.id
    }

    /// Timer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Milliseconds from the trace start to when this timer opened.
    pub fn start_offset_ms(&self) -> i64 {
        self.start_offset_ms
    }

    /// Zero until [`finish`](Self::finish) runs.
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// Duration minus the summed durations of direct children.
    pub fn self_duration_ms(&self) -> f64 {
        self.self_duration_ms
    }

    /// Arena index of the parent; `None` for the root.
    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    /// Id of the parent timer.
    pub fn parent_id(&self) -> Option<&TimerId> {
        self.parent_id.as_ref()
    }

    /// Zero for the root.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Closed children, in the order they finished.
    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    /// SQL events recorded directly on this timer.
    pub fn sql_events(&self) -> &[SqlEvent] {
        &self.sql_events
    }

    /// Summed duration of this node's own events.
    pub fn sql_duration_ms(&self) -> f64 {
        self.sql_duration_ms
    }

    /// True for the trace root.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// True once a duration has been recorded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True when at least one child has closed.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// True when any SQL event was recorded here.
    pub fn has_sql_events(&self) -> bool {
        !self.sql_events.is_empty()
    }

    /// True when the self time falls below `threshold_ms`.
    pub fn is_trivial(&self, threshold_ms: f64) -> bool {
        self.self_duration_ms < threshold_ms
    }

    /// Reader executions recorded on this timer.
    pub fn executed_readers(&self) -> u32 {
        self.executed_readers
    }

    /// Scalar executions recorded on this timer.
    pub fn executed_scalars(&self) -> u32 {
        self.executed_scalars
    }

    /// Non-query executions recorded on this timer.
    pub fn executed_non_queries(&self) -> u32 {
        self.executed_non_queries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_millis;

    #[test]
    fn finish_subtracts_children() {
        let started = now_millis();
        let mut parent = TimerNode::new_root("parent", started);
        let mut first = TimerNode::new("first", started);
        let mut second = TimerNode::new("second", started);
        first.finish(3.0);
        second.finish(4.5);
        parent.add_child(&mut first, NodeIndex(1));
        parent.add_child(&mut second, NodeIndex(2));
        parent.finish(10.0);

        assert!(parent.is_root());
        assert!(parent.has_children());
        assert_eq!(parent.children(), &[NodeIndex(1), NodeIndex(2)]);
        assert_eq!(parent.self_duration_ms(), 2.5);
        assert_eq!(first.parent_id(), Some(parent.id()));
        assert_eq!(second.depth(), 1);
    }

    #[test]
    fn unfinished_node_reads_zero() {
        let node = TimerNode::new("pending", now_millis());
        assert!(!node.is_finished());
        assert_eq!(node.duration_ms(), 0.0);
        assert!(!node.has_children());
        assert!(!node.has_sql_events());
    }

    #[test]
    fn sql_events_accumulate_and_count() {
        let started = now_millis();
        let mut node = TimerNode::new("queries", started);
        node.add_sql_event(SqlRecord::new("select a", 2.0), started, String::new());
        assert!(node.has_sql_events());
        node.add_sql_event(
            SqlRecord::new("insert b", 3.0).kind(ExecuteKind::NonQuery),
            started,
            String::new(),
        );
        assert_eq!(node.sql_events().len(), 2);
        assert_eq!(node.sql_duration_ms(), 5.0);
        assert_eq!(node.executed_readers(), 1);
        assert_eq!(node.executed_non_queries(), 1);
        assert_eq!(node.sql_events()[1].parent_timer_id(), node.id());
    }

    #[test]
    fn sql_event_setters_go_through_owner() {
        let started = now_millis();
        let mut node = TimerNode::new("queries", started);
        let id = node
            .add_sql_event(SqlRecord::new("select a", 2.0), started, String::new())
            .id()
            .clone();
        assert!(node.mark_sql_duplicate(&id));
        assert!(node.set_sql_first_fetch(&id, 0.5));
        assert!(!node.mark_sql_duplicate(&SqlEventId::from("missing")));
        assert!(node.sql_events()[0].is_duplicate());
        assert_eq!(node.sql_events()[0].first_fetch_duration_ms(), 0.5);
    }

    #[test]
    fn trivial_uses_self_time() {
        let mut node = TimerNode::new("fast", now_millis());
        node.finish(1.0);
        assert!(node.is_trivial(2.0));
        assert!(!node.is_trivial(1.0));
    }
}
