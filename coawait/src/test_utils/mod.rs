use std::sync::Once;

pub(crate) mod mocks;
pub(crate) use mocks::{FakeService, WakeCount, counting_waker};

/// Installs a `tracing` subscriber honouring `RUST_LOG`, once per process.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
