//! Subscriber setup for hosts that do not install their own.
//!
//! Every profiler event is emitted under the `reqprof` target with a dotted
//! name such as `store.sweep.complete`.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ProfilerError, Result};

/// Directive used when the caller passes an empty filter.
pub const DEFAULT_FILTER: &str = "reqprof=info";

/// Installs a global fmt subscriber filtered by `filter` (for example
/// `"reqprof=debug"`).
///
/// Fails with [`ProfilerError::Config`] for an unparsable filter and with
/// [`ProfilerError::InvalidArgument`] when a global subscriber already exists.
pub fn init_logging(filter: &str) -> Result<()> {
    let directives = if filter.trim().is_empty() {
        DEFAULT_FILTER
    } else {
        filter
    };
    let env_filter = EnvFilter::try_new(directives)
        .map_err(|err| ProfilerError::Config(format!("log filter {directives:?}: {err}")))?;
    fmt()
        .with_env_filter(env_filter)
        .with_thread_names(true)
        .try_init()
        .map_err(|err| {
            ProfilerError::InvalidArgument(format!("tracing subscriber already installed: {err}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_filter_is_a_config_error() {
        let err = init_logging("reqprof=loudest").unwrap_err();
        assert!(matches!(err, ProfilerError::Config(_)));
    }
}
