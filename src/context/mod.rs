//! Request-scoped profiling context.
//!
//! [`ProfilingContext`] is the explicit form: it owns the trace being built and
//! the index of the active timer, and can be passed down a call graph. The
//! [`ambient`] registry binds one context per thread so deeply nested code can
//! record steps and SQL events without threading a parameter through.

use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{debug, warn};

use crate::timing::{NodeIndex, SqlRecord, TimerNode, Trace};
use crate::types::TraceId;

/// Per-thread context registry.
pub mod ambient;

pub use ambient::{begin, end, enter, is_active, record_sql, record_sql_event, step, StepGuard};

/// One open step: the node being timed and the timer that was active before it.
#[derive(Debug)]
pub(crate) struct Frame {
    trace: TraceId,
    node: NodeIndex,
    previous: NodeIndex,
    started: Instant,
}

/// Trace under construction plus the timer currently accepting children.
#[derive(Debug)]
pub struct ProfilingContext {
    trace: Trace,
    active: NodeIndex,
    opened_at: Instant,
    capture_sql_stack: bool,
}

impl ProfilingContext {
    /// Context whose active timer is the trace root.
    pub fn begin(trace: Trace) -> Self {
        let active = trace.root_index();
        Self {
            trace,
            active,
            opened_at: Instant::now(),
            capture_sql_stack: false,
        }
    }

    /// Captures a backtrace into each recorded SQL event when enabled.
    pub fn with_sql_stack_capture(mut self, enabled: bool) -> Self {
        self.capture_sql_stack = enabled;
        self
    }

    /// Trace under construction.
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Arena index of the timer currently accepting children.
    pub fn active_index(&self) -> NodeIndex {
        self.active
    }

    /// The timer currently accepting children.
    pub fn active_timer(&self) -> &TimerNode {
        match self.trace.node(self.active) {
            Some(node) => node,
            None => self.trace.root(),
        }
    }

    /// Runs `body` as a named child of the active timer.
    ///
    /// The node is finished and the previous timer restored on every exit
    /// path; a panic in `body` is resumed unchanged afterwards.
    pub fn step<R>(&mut self, name: impl Into<String>, body: impl FnOnce(&mut Self) -> R) -> R {
        let frame = self.push(name);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(self)));
        self.pop(frame);
        match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Attaches a SQL event to the active timer.
    pub fn record_sql(&mut self, record: SqlRecord) {
        let stack = if self.capture_sql_stack {
            Backtrace::force_capture().to_string()
        } else {
            String::new()
        };
        self.trace.add_sql_event(self.active, record, stack);
    }

    /// Shorthand for [`record_sql`](Self::record_sql) with default kind.
    pub fn record_sql_event(&mut self, text: impl Into<String>, duration_ms: f64) {
        self.record_sql(SqlRecord::new(text, duration_ms));
    }

    /// Independent context for work that runs on another thread.
    ///
    /// Its root, named `name`, is timed from now until it is handed back to
    /// [`join`](Self::join).
    pub fn fork(&self, name: impl Into<String>) -> ProfilingContext {
        ProfilingContext::begin(self.trace.fragment(name))
            .with_sql_stack_capture(self.capture_sql_stack)
    }

    /// Grafts a forked context's tree under the active timer.
    pub fn join(&mut self, fork: ProfilingContext) {
        let elapsed = elapsed_ms(fork.opened_at);
        let mut fragment = fork.trace;
        fragment.finalize(elapsed);
        if self.trace.graft(self.active, fragment).is_none() {
            warn!(active = self.active.get(), "profiler.context.join_lost");
        }
    }

    /// Ends the context, handing back the trace.
    pub fn into_trace(self) -> Trace {
        self.trace
    }

    pub(crate) fn push(&mut self, name: impl Into<String>) -> Frame {
        let previous = self.active;
        let node = self.trace.open_node(previous, name);
        self.active = node;
        Frame {
            trace: self.trace.id().clone(),
            node,
            previous,
            started: Instant::now(),
        }
    }

    /// Closes the step opened by `frame`. Frames opened on another trace are
    /// ignored.
    pub(crate) fn pop(&mut self, frame: Frame) {
        if &frame.trace != self.trace.id() {
            debug!(
                frame_trace = %frame.trace,
                trace_id = %self.trace.id(),
                "profiler.context.foreign_frame"
            );
            return;
        }
        if self.active != frame.node {
            debug!(
                expected = frame.node.get(),
                active = self.active.get(),
                "profiler.context.out_of_order_pop"
            );
        }
        self.trace.close_node(frame.node, elapsed_ms(frame.started));
        self.active = frame.previous;
    }
}

pub(crate) fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
