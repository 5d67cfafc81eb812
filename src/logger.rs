use tracing::{metadata::LevelFilter, Subscriber};
use tracing_subscriber::{
    prelude::__tracing_subscriber_SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Installs the global subscriber. `RUST_LOG` overrides `default_level`.
pub fn init(default_level: LevelFilter) {
    tracing_subscriber::registry()
        .with(stdout_layer(default_level))
        .init();
}

fn stdout_layer<S>(default_level: LevelFilter) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    // circuit evaluation fans out over rayon workers
    tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_target(true)
        .with_thread_names(true)
        .with_filter(env_filter)
}

#[cfg(test)]
pub fn test_init(default_level: LevelFilter) {
    use std::sync::OnceLock;
    static INITIALIZED: OnceLock<()> = OnceLock::new();

    INITIALIZED.get_or_init(|| {
        let _ = tracing_subscriber::registry()
            .with(stdout_layer(default_level))
            .try_init();
    });
}
