use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "FLOWSCOPE_LOG";

/// Installs the global tracing subscriber.
///
/// `json` switches stdout to one JSON record per event. The filter comes from
/// `FLOWSCOPE_LOG`, then `RUST_LOG`, then a default tuned by `verbose`.
/// Panics if a global subscriber is already set; see [`try_init`].
pub fn init(verbose: bool, json: bool) {
    build(verbose, json).init();
}

/// Like [`init`] but leaves an existing subscriber in place.
pub fn try_init(verbose: bool, json: bool) -> bool {
    build(verbose, json).try_init().is_ok()
}

fn build(verbose: bool, json: bool) -> impl SubscriberInitExt {
    let filter = env_filter(verbose);
    let stdout_layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        Box::new(
            fmt::layer()
                .json()
                .with_writer(std::io::stdout)
                .with_filter(filter),
        )
    } else if verbose {
        Box::new(fmt::layer().with_writer(std::io::stdout).with_filter(filter))
    } else {
        Box::new(
            fmt::layer()
                .with_writer(std::io::stdout)
                .without_time()
                .with_target(false)
                .with_level(true)
                .with_filter(filter),
        )
    };
    tracing_subscriber::registry().with(stdout_layer)
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| default_env_filter(verbose))
}

fn default_env_filter(verbose: bool) -> EnvFilter {
    let spec = if verbose {
        "flowscope=debug,info"
    } else {
        "flowscope=info,warn"
    };
    EnvFilter::new(spec)
}
