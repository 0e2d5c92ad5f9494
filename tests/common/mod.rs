use std::sync::Once;

static TRACING: Once = Once::new();

/// Installs a quiet subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        reqprof::logging::init_logging("reqprof=warn").expect("first subscriber install");
    });
}
