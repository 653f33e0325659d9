//! Utility functions: image loading and logging setup.

pub mod image;

pub use self::image::{decode, is_supported_extension, load_image};

/// Initializes the tracing subscriber for logging.
///
/// Installs an environment filter (`RUST_LOG`) and a formatting layer. Call once at
/// application start; library code never installs a subscriber itself.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
