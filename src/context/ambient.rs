use std::cell::RefCell;
use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::error::{ProfilerError, Result};
use crate::timing::SqlRecord;

use super::{Frame, ProfilingContext};

thread_local! {
    static CURRENT: RefCell<Option<ProfilingContext>> = const { RefCell::new(None) };
}

/// Installs `context` for the current thread.
///
/// Fails if the thread already has one; the rejected context is dropped.
pub fn begin(context: ProfilingContext) -> Result<()> {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            warn!("profiler.context.begin_conflict");
            return Err(ProfilerError::InvalidArgument(
                "a profiling context is already active on this thread".into(),
            ));
        }
        debug!(trace_id = %context.trace().id(), "profiler.context.begin");
        *slot = Some(context);
        Ok(())
    })
}

/// Removes and returns the current thread's context.
pub fn end() -> Option<ProfilingContext> {
    CURRENT
        .try_with(|slot| slot.borrow_mut().take())
        .ok()
        .flatten()
}

/// Whether a context is installed on this thread.
pub fn is_active() -> bool {
    CURRENT
        .try_with(|slot| slot.try_borrow().map(|c| c.is_some()).unwrap_or(false))
        .unwrap_or(false)
}

/// Runs `f` against the installed context, if any.
///
/// Returns `None` when there is no context. Calling back into this module from
/// `f` is not supported and yields `None` for the inner call.
pub fn with_current<R>(f: impl FnOnce(&mut ProfilingContext) -> R) -> Option<R> {
    CURRENT
        .try_with(|slot| {
            let mut slot = slot.try_borrow_mut().ok()?;
            slot.as_mut().map(f)
        })
        .ok()
        .flatten()
}

/// Splits off a context for a sub-task on another thread; see
/// [`ProfilingContext::fork`].
pub fn fork(name: impl Into<String>) -> Option<ProfilingContext> {
    with_current(|ctx| ctx.fork(name))
}

/// Grafts a finished fork under the current active timer. A no-op when
/// profiling is inactive.
pub fn join(fork: ProfilingContext) {
    with_current(|ctx| ctx.join(fork));
}

/// Times `body` as a child step of the active timer. Without an installed
/// context `body` simply runs.
pub fn step<R>(name: impl Into<String>, body: impl FnOnce() -> R) -> R {
    let _guard = enter(name);
    body()
}

/// Opens a step that closes when the returned guard drops, including during
/// unwinding. Guards must be dropped in reverse order of creation.
pub fn enter(name: impl Into<String>) -> StepGuard {
    StepGuard {
        frame: with_current(|ctx| ctx.push(name)),
        _thread_bound: PhantomData,
    }
}

/// Records a SQL event on the active timer; a no-op when inactive.
pub fn record_sql(record: SqlRecord) {
    with_current(|ctx| ctx.record_sql(record));
}

/// Shorthand for [`record_sql`] with the default execute kind.
pub fn record_sql_event(text: impl Into<String>, duration_ms: f64) {
    record_sql(SqlRecord::new(text, duration_ms));
}

/// Open step on the current thread's context.
#[must_use = "dropping the guard immediately closes the step"]
pub struct StepGuard {
    frame: Option<Frame>,
    _thread_bound: PhantomData<*const ()>,
}

impl StepGuard {
    /// False when profiling was inactive at creation.
    pub fn is_recording(&self) -> bool {
        self.frame.is_some()
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        if with_current(|ctx| ctx.pop(frame)).is_none() {
            debug!("profiler.context.step_after_end");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::Trace;
    use std::panic::{self, AssertUnwindSafe};

    fn install() {
        let trace = Trace::create("/", "GET http://localhost:80/", "localhost");
        begin(ProfilingContext::begin(trace)).unwrap();
    }

    #[test]
    fn inactive_calls_are_transparent() {
        assert!(!is_active());
        assert_eq!(step("noop", || 7), 7);
        record_sql_event("select 1", 1.0);
        let guard = enter("noop");
        assert!(!guard.is_recording());
        assert!(end().is_none());
    }

    #[test]
    fn begin_rejects_second_context() {
        install();
        let other = Trace::create("/other", "GET /other", "localhost");
        assert!(begin(ProfilingContext::begin(other)).is_err());
        assert!(end().is_some());
        assert!(!is_active());
    }

    #[test]
    fn steps_and_sql_attach_through_thread_slot() {
        install();
        step("outer", || {
            record_sql_event("select 1", 1.0);
            step("inner", || record_sql_event("select 2", 2.0));
            {
                let _guard = enter("guarded");
            }
        });
        let trace = end().unwrap().into_trace();
        let outer = trace.node(trace.root().children()[0]).unwrap();
        assert_eq!(outer.sql_events().len(), 1);
        let names: Vec<&str> = outer
            .children()
            .iter()
            .map(|i| trace.node(*i).unwrap().name())
            .collect();
        assert_eq!(names, vec!["inner", "guarded"]);
    }

    #[test]
    fn panic_inside_step_restores_active_timer() {
        install();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            step("failing", || -> () { panic!("boom") })
        }));
        assert!(result.is_err());
        let ctx = end().unwrap();
        assert_eq!(ctx.active_index(), ctx.trace().root_index());
        assert_eq!(ctx.trace().root().children().len(), 1);
    }

    #[test]
    fn guard_outliving_context_is_ignored() {
        install();
        let guard = enter("orphan");
        let ctx = end().unwrap();
        drop(guard);
        assert!(ctx.trace().root().children().is_empty());
    }

    #[test]
    fn guard_from_previous_request_leaves_next_trace_alone() {
        install();
        let stale = enter("from-request-a");
        assert!(end().is_some());

        install();
        step("b-step", || ());
        drop(stale);

        let trace = end().unwrap().into_trace();
        let names: Vec<&str> = trace
            .root()
            .children()
            .iter()
            .map(|i| trace.node(*i).unwrap().name())
            .collect();
        assert_eq!(names, vec!["b-step"]);
        assert_eq!(trace.nodes().count(), 2);
    }

    #[test]
    fn threads_do_not_share_contexts() {
        install();
        let seen = std::thread::spawn(is_active).join().unwrap();
        assert!(!seen);
        assert!(end().is_some());
    }
}
