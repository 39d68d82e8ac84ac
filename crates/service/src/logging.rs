use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install a compact stdout subscriber filtered at `level`, overridable
/// through `RUST_LOG`. Safe to call more than once; only the first call wins.
pub fn init(level: tracing::Level) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stdout)
        .with_filter(env_filter);

    let _ = tracing_subscriber::registry().with(stdout_layer).try_init();
}
