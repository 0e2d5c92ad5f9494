//! Request lifecycle coordination.
//!
//! A [`Profiler`] is owned by the host application and shared with its request
//! handlers. For each profiled request it installs a [`ProfilingContext`] on
//! the handling thread, finalizes the root timing when the request completes,
//! and publishes the trace to its [`ResultStore`]. Viewer lookups go through
//! [`Profiler::retrieve`], which also attaches client timings on first view.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{RwLockUpgradableReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::config::ProfilerConfig;
use crate::context::{self, elapsed_ms, ProfilingContext};
use crate::error::{ProfilerError, Result};
use crate::store::{ResultStore, Sweeper};
use crate::timing::{ClientAnnex, ClientPerformance, Trace, TraceDocument};
use crate::types::TraceId;

/// Request identity.
pub mod request;

pub use request::RequestInfo;

/// Response header carrying the id of the published trace.
pub const PROFILER_ID_HEADER: &str = "X-MiniProfilerID";

/// Decides whether a request is profiled.
pub type ProfilePolicy = Arc<dyn Fn(&RequestInfo) -> bool + Send + Sync>;

/// Result of [`Profiler::profile`].
#[derive(Debug)]
pub struct Profiled<R> {
    /// Whatever the handler returned.
    pub value: R,
    /// Id of the published trace; `None` when the request was not profiled.
    pub trace_id: Option<TraceId>,
}

/// Result of [`Profiler::retrieve`].
#[derive(Debug, Clone)]
pub struct Retrieved {
    /// Viewer document, built after any annotation.
    pub document: TraceDocument,
    /// True for the one retrieval that marked the trace as viewed.
    pub first_view: bool,
}

/// Host-owned profiler instance.
pub struct Profiler {
    config: ProfilerConfig,
    store: Arc<ResultStore>,
    policy: ProfilePolicy,
    sweeper: Option<Sweeper>,
}

impl fmt::Debug for Profiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profiler")
            .field("config", &self.config)
            .field("stored", &self.store.len())
            .field("sweeper", &self.sweeper.is_some())
            .finish()
    }
}

impl Profiler {
    /// Profiler with a fresh store. Spawns the background sweeper unless the
    /// configured interval is zero.
    pub fn new(config: ProfilerConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(ResultStore::new()))
    }

    /// Profiler publishing into an existing store.
    pub fn with_store(config: ProfilerConfig, store: Arc<ResultStore>) -> Result<Self> {
        config.validate()?;
        let sweeper = match config.sweep_interval() {
            Some(interval) => Some(Sweeper::spawn(&store, interval, config.retention())?),
            None => None,
        };
        Ok(Self {
            config,
            store,
            policy: Arc::new(|_: &RequestInfo| true),
            sweeper,
        })
    }

    /// Replaces the profile-everything default policy.
    pub fn with_policy(
        mut self,
        policy: impl Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Active settings.
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Store that receives published traces.
    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// Background sweeper, if one is running.
    pub fn sweeper(&self) -> Option<&Sweeper> {
        self.sweeper.as_ref()
    }

    /// Applies the profiling policy to `request`.
    pub fn should_profile(&self, request: &RequestInfo) -> bool {
        (self.policy)(request)
    }

    /// Begins profiling `request` on the current thread.
    ///
    /// Returns `None` when the policy declines or the thread is already
    /// profiling another request.
    pub fn start(&self, request: &RequestInfo) -> Option<RequestScope<'_>> {
        if !self.should_profile(request) {
            return None;
        }
        let machine_name = self
            .config
            .machine_name
            .clone()
            .unwrap_or_else(|| request.host.clone());
        let trace = Trace::create(request.path.clone(), request.root_name(), machine_name);
        let trace_id = trace.id().clone();
        let ctx = ProfilingContext::begin(trace).with_sql_stack_capture(self.config.capture_sql_stack);
        if let Err(err) = context::begin(ctx) {
            warn!(error = %err, path = %request.path, "profiler.request.not_started");
            return None;
        }
        debug!(trace_id = %trace_id, path = %request.path, "profiler.request.begin");
        Some(RequestScope {
            profiler: self,
            trace_id,
            started: Instant::now(),
            open: true,
            _thread_bound: PhantomData,
        })
    }

    /// Runs `handler` as one profiled request and publishes its trace.
    ///
    /// If `handler` panics, the trace is discarded and the panic continues.
    pub fn profile<R>(&self, request: &RequestInfo, handler: impl FnOnce() -> R) -> Profiled<R> {
        let Some(scope) = self.start(request) else {
            return Profiled {
                value: handler(),
                trace_id: None,
            };
        };
        let value = handler();
        let trace_id = match scope.finish() {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(error = %err, "profiler.request.publish_failed");
                None
            }
        };
        Profiled { value, trace_id }
    }

    /// Looks up a published trace and builds its document.
    ///
    /// The first retrieval marks the trace viewed and attaches whatever client
    /// timings `client` yields; later ones leave the trace untouched.
    pub fn retrieve(&self, id: &str, client: Option<&ClientPerformance>) -> Result<Retrieved> {
        let shared = self
            .store
            .get(id)
            .ok_or_else(|| ProfilerError::NotFound(TraceId::from(id)))?;
        let guard = shared.upgradable_read();
        let (trace, first_view) = if guard.has_been_viewed() {
            (RwLockUpgradableReadGuard::downgrade(guard), false)
        } else {
            let mut trace = RwLockUpgradableReadGuard::upgrade(guard);
            let annex = client.and_then(ClientAnnex::parse);
            debug!(trace_id = %id, client_timings = annex.is_some(), "profiler.retrieve.first_view");
            trace.annotate(annex);
            (RwLockWriteGuard::downgrade(trace), true)
        };
        Ok(Retrieved {
            document: trace.to_document(&self.config.document_settings()),
            first_view,
        })
    }

    /// [`retrieve`](Self::retrieve) serialized as JSON.
    pub fn retrieve_json(&self, id: &str, client: Option<&ClientPerformance>) -> Result<String> {
        let retrieved = self.retrieve(id, client)?;
        Ok(serde_json::to_string(&retrieved.document)?)
    }

    /// Runs an eviction pass on the calling thread.
    pub fn sweep_now(&self) -> usize {
        self.store.sweep_expired(self.config.retention())
    }
}

/// A request being profiled on the current thread.
///
/// Dropping the scope without [`finish`](Self::finish) discards the trace.
#[must_use = "an unfinished scope discards its trace"]
pub struct RequestScope<'a> {
    profiler: &'a Profiler,
    trace_id: TraceId,
    started: Instant,
    open: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl RequestScope<'_> {
    /// Id the trace will be published under.
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// Records the total elapsed time on the root, publishes the trace and
    /// clears the thread's context.
    pub fn finish(mut self) -> Result<TraceId> {
        self.open = false;
        let Some(ctx) = context::end() else {
            return Err(ProfilerError::InvalidArgument(
                "profiling context ended before the request finished".into(),
            ));
        };
        if ctx.trace().id() != &self.trace_id {
            let foreign = ctx.trace().id().clone();
            if let Err(err) = context::begin(ctx) {
                warn!(error = %err, trace_id = %foreign, "profiler.request.reinstall_failed");
            }
            return Err(ProfilerError::InvalidArgument(format!(
                "thread is profiling {foreign}, not {}",
                self.trace_id
            )));
        }
        let mut trace = ctx.into_trace();
        trace.finalize(elapsed_ms(self.started));
        let duration_ms = trace.duration_ms();
        let id = self.profiler.store.put(trace);
        info!(trace_id = %id, duration_ms, "profiler.request.published");
        Ok(id)
    }

    /// Drops the trace without publishing it.
    pub fn discard(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if context::end().is_some() {
            debug!(trace_id = %self.trace_id, "profiler.request.discarded");
        }
    }
}

impl Drop for RequestScope<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
