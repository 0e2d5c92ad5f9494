//! In-process request profiler.
//!
//! Each profiled request builds a tree of named timers with SQL events hanging
//! off them. Finished traces are kept in a shared, time-bounded
//! [`ResultStore`] and rendered as viewer documents on demand.
//!
//! ```no_run
//! use reqprof::{context, Profiler, ProfilerConfig, RequestInfo};
//!
//! # fn main() -> reqprof::Result<()> {
//! let profiler = Profiler::new(ProfilerConfig::default())?;
//! let request = RequestInfo::new("GET", "localhost", "/orders");
//! let profiled = profiler.profile(&request, || {
//!     context::step("load orders", || {
//!         context::record_sql_event("select * from orders", 3.2);
//!     })
//! });
//! if let Some(id) = profiled.trace_id {
//!     println!("{}", profiler.retrieve_json(id.as_str(), None)?);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Profiler settings.
pub mod config;
pub mod context;
/// Error type.
pub mod error;
pub mod instrument;
pub mod logging;
pub mod profiler;
pub mod store;
pub mod timing;
pub mod types;

pub use config::ProfilerConfig;
pub use context::ProfilingContext;
pub use error::{ProfilerError, Result};
pub use instrument::{instrument, instrument_with, Instrumented, InstrumentedWith, Step};
pub use profiler::{Profiled, Profiler, RequestInfo, RequestScope, Retrieved, PROFILER_ID_HEADER};
pub use store::{ResultStore, SharedTrace, Sweeper};
pub use timing::{
    ClientAnnex, ClientPerformance, ExecuteKind, SqlRecord, TimerNode, Trace, TraceDocument,
};
pub use types::{SqlEventId, TimerId, TraceId};
