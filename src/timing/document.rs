//! Externally visible shape of a trace, as consumed by the results viewer.
//!
//! Field names are PascalCase and a few legacy quirks (`HasAllTrivialTimigs`,
//! the `/Date(ms)/` wrapper) are kept because existing viewers depend on them.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::types::{SqlEventId, TimerId, TraceId};

use super::client::{ClientAnnex, ClientTiming};
use super::node::TimerNode;
use super::sql::ExecuteKind;
use super::trace::Trace;

/// Presentation settings applied while building a document.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSettings {
    /// Nodes whose self time falls below this are flagged trivial.
    pub trivial_threshold_ms: f64,
    /// Value of the `User` field.
    pub user: String,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            trivial_threshold_ms: 2.0,
            user: "unknown user".to_owned(),
        }
    }
}

/// Top-level trace document.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TraceDocument {
    /// Trace id.
    pub id: TraceId,
    /// Request name.
    pub name: String,
    /// Start time as `/Date(<epoch ms>)/`.
    pub started: String,
    /// Machine that served the request.
    pub machine_name: String,
    /// Always 0.
    pub level: u8,
    /// Reported user.
    pub user: String,
    /// Set once the trace has been retrieved.
    pub has_user_viewed: bool,
    /// Browser timings attached on first view.
    pub client_timings: ClientTimingsDocument,
    /// Total request time.
    pub duration_milliseconds: f64,
    /// Any node is trivial.
    pub has_trivial_timings: bool,
    /// Every node is trivial. The key keeps the viewer's spelling.
    #[serde(rename = "HasAllTrivialTimigs")]
    pub has_all_trivial_timings: bool,
    /// Threshold used for the trivial flags.
    pub trivial_duration_threshold_milliseconds: f64,
    /// Always null.
    pub head: Option<Value>,
    /// SQL time summed over every node.
    pub duration_milliseconds_in_sql: f64,
    /// Any node has SQL events.
    pub has_sql_timings: bool,
    /// Any SQL event is a duplicate.
    pub has_duplicate_sql_timings: bool,
    /// Reader executions in the whole trace.
    pub executed_readers: u32,
    /// Scalar executions in the whole trace.
    pub executed_scalars: u32,
    /// Non-query executions in the whole trace.
    pub executed_non_queries: u32,
    /// Root timer with the full tree below it.
    pub root: TimingDocument,
}

/// Client annex as serialized; `{}` until the trace has been annotated.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientTimingsDocument {
    /// Redirects before the page loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_count: Option<i64>,
    /// Interval rows, then single-point rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<Vec<ClientTiming>>,
}

impl From<Option<&ClientAnnex>> for ClientTimingsDocument {
    fn from(annex: Option<&ClientAnnex>) -> Self {
        match annex {
            Some(annex) => Self {
                redirect_count: Some(annex.redirect_count),
                timings: Some(annex.timings.clone()),
            },
            None => Self::default(),
        }
    }
}

/// One timer node with its nested children.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimingDocument {
    /// Timer id.
    pub id: TimerId,
    /// Timer name.
    pub name: String,
    /// Total time including children.
    pub duration_milliseconds: f64,
    /// Self time.
    pub duration_without_children_milliseconds: f64,
    /// Offset from the trace start.
    pub start_milliseconds: i64,
    /// Parent timer id; null for the root.
    pub parent_timing_id: Option<TimerId>,
    /// Closed children in completion order.
    pub children: Vec<TimingDocument>,
    /// `Children` is non-empty.
    pub has_children: bool,
    /// Always null.
    pub key_values: Option<Value>,
    /// `SqlTimings` is non-empty.
    pub has_sql_timings: bool,
    /// Any own SQL event is a duplicate.
    pub has_duplicate_sql_timings: bool,
    /// SQL events recorded on this timer.
    pub sql_timings: Vec<SqlTimingDocument>,
    /// Time spent in this timer's own SQL events.
    pub sql_timings_duration_milliseconds: f64,
    /// Self time is below the threshold.
    pub is_trivial: bool,
    /// True only for the root.
    pub is_root: bool,
    /// Zero for the root.
    pub depth: u32,
    /// Reader executions on this timer.
    pub executed_readers: u32,
    /// Scalar executions on this timer.
    pub executed_scalars: u32,
    /// Non-query executions on this timer.
    pub executed_non_queries: u32,
}

/// One SQL event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SqlTimingDocument {
    /// Event id.
    pub id: SqlEventId,
    /// Numeric execute kind.
    pub execute_type: ExecuteKind,
    /// Command text.
    pub formatted_command_string: String,
    /// Captured stack, possibly empty.
    pub stack_trace_snippet: String,
    /// Offset from the trace start.
    pub start_milliseconds: i64,
    /// Execution time.
    pub duration_milliseconds: f64,
    /// Time to the first row.
    pub first_fetch_duration_milliseconds: f64,
    /// Always null.
    pub parameters: Option<Value>,
    /// Owning timer id.
    pub parent_timing_id: TimerId,
    /// Same text ran elsewhere in the trace, or marked explicitly.
    pub is_duplicate: bool,
}

#[derive(Default)]
struct Totals {
    sql_ms: f64,
    has_sql: bool,
    has_duplicate_sql: bool,
    any_trivial: bool,
    all_trivial: bool,
    readers: u32,
    scalars: u32,
    non_queries: u32,
}

struct Builder<'a> {
    trace: &'a Trace,
    settings: &'a DocumentSettings,
    text_counts: HashMap<&'a str, usize>,
    totals: Totals,
}

impl<'a> Builder<'a> {
    fn new(trace: &'a Trace, settings: &'a DocumentSettings) -> Self {
        let mut text_counts = HashMap::new();
        for event in trace.sql_events() {
            *text_counts.entry(event.text()).or_insert(0) += 1;
        }
        Self {
            trace,
            settings,
            text_counts,
            totals: Totals {
                all_trivial: true,
                ..Totals::default()
            },
        }
    }

    fn timing(&mut self, node: &'a TimerNode) -> TimingDocument {
        let sql_timings: Vec<SqlTimingDocument> = node
            .sql_events()
            .iter()
            .map(|event| SqlTimingDocument {
                id: event.id().clone(),
                execute_type: event.execute_kind(),
                formatted_command_string: event.text().to_owned(),
                stack_trace_snippet: event.stack_snippet().to_owned(),
                start_milliseconds: event.start_offset_ms(),
                duration_milliseconds: event.duration_ms(),
                first_fetch_duration_milliseconds: event.first_fetch_duration_ms(),
                parameters: None,
                parent_timing_id: event.parent_timer_id().clone(),
                is_duplicate: event.is_duplicate()
                    || self.text_counts.get(event.text()).copied().unwrap_or(0) > 1,
            })
            .collect();
        let has_duplicate_sql_timings = sql_timings.iter().any(|sql| sql.is_duplicate);
        let is_trivial = node.is_trivial(self.settings.trivial_threshold_ms);

        self.totals.sql_ms += node.sql_duration_ms();
        self.totals.has_sql |= node.has_sql_events();
        self.totals.has_duplicate_sql |= has_duplicate_sql_timings;
        self.totals.any_trivial |= is_trivial;
        self.totals.all_trivial &= is_trivial;
        self.totals.readers += node.executed_readers();
        self.totals.scalars += node.executed_scalars();
        self.totals.non_queries += node.executed_non_queries();

        let trace = self.trace;
        let child_nodes: Vec<&'a TimerNode> = node
            .children()
            .iter()
            .filter_map(|child| trace.node(*child))
            .collect();
        let children = child_nodes
            .into_iter()
            .map(|child| self.timing(child))
            .collect();

        TimingDocument {
            id: node.id().clone(),
            name: node.name().to_owned(),
            duration_milliseconds: node.duration_ms(),
            duration_without_children_milliseconds: node.self_duration_ms(),
            start_milliseconds: node.start_offset_ms(),
            parent_timing_id: node.parent_id().cloned(),
            children,
            has_children: node.has_children(),
            key_values: None,
            has_sql_timings: node.has_sql_events(),
            has_duplicate_sql_timings,
            sql_timings,
            sql_timings_duration_milliseconds: node.sql_duration_ms(),
            is_trivial,
            is_root: node.is_root(),
            depth: node.depth(),
            executed_readers: node.executed_readers(),
            executed_scalars: node.executed_scalars(),
            executed_non_queries: node.executed_non_queries(),
        }
    }
}

impl TraceDocument {
    /// Walks `trace` and computes the aggregate fields. Pure and read-only.
    pub fn build(trace: &Trace, settings: &DocumentSettings) -> Self {
        let mut builder = Builder::new(trace, settings);
        let root = builder.timing(trace.root());
        let totals = builder.totals;
        Self {
            id: trace.id().clone(),
            name: trace.name().to_owned(),
            started: format!("/Date({})/", trace.started_at_ms()),
            machine_name: trace.machine_name().to_owned(),
            level: 0,
            user: settings.user.clone(),
            has_user_viewed: trace.has_been_viewed(),
            client_timings: trace.client_annex().into(),
            duration_milliseconds: trace.duration_ms(),
            has_trivial_timings: totals.any_trivial,
            has_all_trivial_timings: totals.all_trivial,
            trivial_duration_threshold_milliseconds: settings.trivial_threshold_ms,
            head: None,
            duration_milliseconds_in_sql: totals.sql_ms,
            has_sql_timings: totals.has_sql,
            has_duplicate_sql_timings: totals.has_duplicate_sql,
            executed_readers: totals.readers,
            executed_scalars: totals.scalars,
            executed_non_queries: totals.non_queries,
            root,
        }
    }
}

impl Trace {
    /// Builds the viewer document for this trace.
    pub fn to_document(&self, settings: &DocumentSettings) -> TraceDocument {
        TraceDocument::build(self, settings)
    }

    /// Serializes the viewer document as JSON.
    pub fn serialize(&self, settings: &DocumentSettings) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.to_document(settings))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::SqlRecord;

    fn finished_trace() -> Trace {
        let mut trace = Trace::create("/orders", "GET http://shop:80/orders", "shop");
        let load = trace.open_node(trace.root_index(), "load");
        trace.add_sql_event(load, SqlRecord::new("select * from orders", 3.0), String::new());
        trace.add_sql_event(load, SqlRecord::new("select * from users", 4.0), String::new());
        trace.close_node(load, 10.0);
        let render = trace.open_node(trace.root_index(), "render");
        trace.add_sql_event(render, SqlRecord::new("select * from orders", 1.0), String::new());
        trace.close_node(render, 1.0);
        trace.finalize(20.0);
        trace
    }

    #[test]
    fn aggregates_walk_the_whole_tree() {
        let trace = finished_trace();
        let doc = trace.to_document(&DocumentSettings::default());
        assert_eq!(doc.duration_milliseconds, 20.0);
        assert_eq!(doc.duration_milliseconds_in_sql, 8.0);
        assert!(doc.has_sql_timings);
        assert!(doc.has_duplicate_sql_timings);
        assert_eq!(doc.executed_readers, 3);
        assert!(doc.has_trivial_timings);
        assert!(!doc.has_all_trivial_timings);
        assert_eq!(doc.root.children.len(), 2);
        assert_eq!(doc.root.children[0].name, "load");
        assert_eq!(doc.root.duration_without_children_milliseconds, 9.0);

        let load = &doc.root.children[0];
        assert!(load.sql_timings[0].is_duplicate);
        assert!(!load.sql_timings[1].is_duplicate);
        assert_eq!(load.sql_timings_duration_milliseconds, 7.0);
        assert_eq!(load.parent_timing_id.as_ref(), Some(&doc.root.id));
    }

    #[test]
    fn json_uses_viewer_field_names() {
        let trace = finished_trace();
        let value: Value =
            serde_json::from_str(&trace.serialize(&DocumentSettings::default()).unwrap())
                .unwrap();
        assert_eq!(
            value["Started"],
            Value::String(format!("/Date({})/", trace.started_at_ms()))
        );
        assert_eq!(value["ClientTimings"], serde_json::json!({}));
        assert_eq!(value["HasAllTrivialTimigs"], Value::Bool(false));
        assert_eq!(value["User"], "unknown user");
        assert!(value["Head"].is_null());
        let root = &value["Root"];
        assert_eq!(root["IsRoot"], Value::Bool(true));
        assert!(root["ParentTimingId"].is_null());
        let sql = &root["Children"][0]["SqlTimings"][0];
        assert_eq!(sql["ExecuteType"], 3);
        assert_eq!(sql["FormattedCommandString"], "select * from orders");
        assert!(sql["Parameters"].is_null());
    }

    #[test]
    fn serialization_is_stable() {
        let trace = finished_trace();
        let settings = DocumentSettings::default();
        assert_eq!(
            trace.serialize(&settings).unwrap(),
            trace.serialize(&settings).unwrap()
        );
    }

    #[test]
    fn annotated_trace_carries_client_timings() {
        let mut trace = finished_trace();
        trace.annotate(Some(ClientAnnex {
            redirect_count: 0,
            timings: vec![ClientTiming {
                name: "Dom Loading".into(),
                start: 50,
                duration: 50,
            }],
        }));
        let value = serde_json::to_value(trace.to_document(&DocumentSettings::default())).unwrap();
        assert_eq!(value["HasUserViewed"], Value::Bool(true));
        assert_eq!(
            value["ClientTimings"],
            serde_json::json!({
                "RedirectCount": 0,
                "Timings": [{"Name": "Dom Loading", "Start": 50, "Duration": 50}]
            })
        );
    }
}
