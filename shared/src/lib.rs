pub mod config;
pub mod tracing;

/// Install the global tracing subscriber for the calling binary.
#[macro_export]
macro_rules! init_tracing {
    () => {
        $crate::tracing::init(env!("CARGO_PKG_NAME"))
    };
}
