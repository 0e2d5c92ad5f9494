//! Timer-tree data model.
//!
//! A [`Trace`] owns an arena of [`TimerNode`]s rooted at slot 0; every node owns
//! its [`SqlEvent`]s. Aggregates (total SQL time, trivial and duplicate flags)
//! are computed when a [`TraceDocument`] is built, keeping the recording path
//! constant-time.

/// Client navigation timings.
pub mod client;
/// Viewer document.
pub mod document;
/// Timer nodes.
pub mod node;
/// SQL sub-events.
pub mod sql;
/// Trace container.
pub mod trace;

pub use client::{ClientAnnex, ClientPerformance, ClientTiming};
pub use document::{
    ClientTimingsDocument, DocumentSettings, SqlTimingDocument, TimingDocument, TraceDocument,
};
pub use node::{NodeIndex, TimerNode};
pub use sql::{ExecuteKind, SqlEvent, SqlRecord};
pub use trace::Trace;
