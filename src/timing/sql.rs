use serde::{Serialize, Serializer};

use crate::types::{SqlEventId, TimerId};

/// How a recorded command was executed.
///
/// Serialized as its numeric code for compatibility with existing viewers.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum ExecuteKind {
    /// Not a database command.
    None,
    /// Statement that returns no rows.
    NonQuery,
    /// Statement returning a single value.
    Scalar,
    /// Statement returning a row set.
    #[default]
    Reader,
}

impl ExecuteKind {
    /// Numeric code used in the serialized document.
    pub const fn code(self) -> u8 {
        match self {
            ExecuteKind::None => 0,
            ExecuteKind::NonQuery => 1,
            ExecuteKind::Scalar => 2,
            ExecuteKind::Reader => 3,
        }
    }
}

impl Serialize for ExecuteKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Caller-supplied description of a sub-operation to attach to the active timer.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlRecord {
    /// Formatted command text.
    pub text: String,
    /// Wall time the command took.
    pub duration_ms: f64,
    /// Execution kind; drives the owning node's executed counters.
    pub kind: ExecuteKind,
    /// Time until the first row arrived, when known.
    pub first_fetch_duration_ms: f64,
}

impl SqlRecord {
    /// Record with the default execution kind and no first-fetch timing.
    pub fn new(text: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            text: text.into(),
            duration_ms,
            kind: ExecuteKind::default(),
            first_fetch_duration_ms: 0.0,
        }
    }

    /// Sets the execution kind.
    pub fn kind(mut self, kind: ExecuteKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the first-fetch duration.
    pub fn first_fetch(mut self, duration_ms: f64) -> Self {
        self.first_fetch_duration_ms = duration_ms;
        self
    }
}

/// One timed sub-operation owned by a [`TimerNode`](super::TimerNode).
#[derive(Clone, Debug, PartialEq)]
pub struct SqlEvent {
    id: SqlEventId,
    text: String,
    start_offset_ms: i64,
    duration_ms: f64,
    parent_timer_id: TimerId,
    first_fetch_duration_ms: f64,
    is_duplicate: bool,
    execute_kind: ExecuteKind,
    stack_snippet: String,
}

impl SqlEvent {
    pub(crate) fn new(
        record: SqlRecord,
        start_offset_ms: i64,
        parent_timer_id: TimerId,
        stack_snippet: String,
    ) -> Self {
        Self {
            id: SqlEventId::generate(),
            text: record.text,
            start_offset_ms,
            duration_ms: record.duration_ms,
            parent_timer_id,
            first_fetch_duration_ms: record.first_fetch_duration_ms,
            is_duplicate: false,
            execute_kind: record.kind,
            stack_snippet,
        }
    }

    /// Generated id.
    pub fn id(&self) -> &SqlEventId {
        &self.id
    }

    /// Formatted command text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Start of the event relative to the trace start.
    pub fn start_offset_ms(&self) -> i64 {
        self.start_offset_ms
    }

    /// Measured duration in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// Id of the timer that owns this event.
    pub fn parent_timer_id(&self) -> &TimerId {
        &self.parent_timer_id
    }

    /// Time until the first row arrived; zero when unknown.
    pub fn first_fetch_duration_ms(&self) -> f64 {
        self.first_fetch_duration_ms
    }

    /// Explicit duplicate mark; the document also flags repeated text.
    pub fn is_duplicate(&self) -> bool {
        self.is_duplicate
    }

    /// Kind of execution.
    pub fn execute_kind(&self) -> ExecuteKind {
        self.execute_kind
    }

    /// Captured call stack, empty unless capture is enabled.
    pub fn stack_snippet(&self) -> &str {
        &self.stack_snippet
    }

    pub(crate) fn mark_duplicate(&mut self) {
        self.is_duplicate = true;
    }

    pub(crate) fn set_first_fetch_duration(&mut self, duration_ms: f64) {
        self.first_fetch_duration_ms = duration_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_defaults_to_reader() {
        let record = SqlRecord::new("select 1", 1.5);
        assert_eq!(record.kind, ExecuteKind::Reader);
        assert_eq!(record.kind.code(), 3);
        assert_eq!(record.first_fetch_duration_ms, 0.0);
    }

    #[test]
    fn execute_kind_serializes_as_code() {
        let encoded = serde_json::to_string(&ExecuteKind::Scalar).unwrap();
        assert_eq!(encoded, "2");
    }

    #[test]
    fn event_keeps_record_fields() {
        let parent = TimerId::from("parent");
        let record = SqlRecord::new("update t", 4.0)
            .kind(ExecuteKind::NonQuery)
            .first_fetch(1.0);
        let mut event = SqlEvent::new(record, 12, parent.clone(), String::new());
        assert_eq!(event.text(), "update t");
        assert_eq!(event.start_offset_ms(), 12);
        assert_eq!(event.parent_timer_id(), &parent);
        assert_eq!(event.execute_kind(), ExecuteKind::NonQuery);
        assert!(!event.is_duplicate());
        event.mark_duplicate();
        event.set_first_fetch_duration(2.0);
        assert!(event.is_duplicate());
        assert_eq!(event.first_fetch_duration_ms(), 2.0);
    }
}
