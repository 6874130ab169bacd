use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Level logged by default for a count of `-v` flags.
#[must_use]
pub fn verbosity_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Filter taken from `RUST_LOG`, falling back to `default` if unset or invalid.
#[must_use]
pub fn env_filter(default: LevelFilter) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy()
}

/// Installs a compact subscriber on stderr, keeping stdout free for tool output.
///
/// `RUST_LOG` takes precedence over `verbose`.
pub fn init(verbose: u8) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(env_filter(verbosity_level(verbose)))
        .init();
}
