use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

/// Filter directives: `RUST_LOG` when set, otherwise the configured level.
pub fn filter_directives(cfg: &pqfetch_config::LoggingConfig) -> String {
    std::env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| cfg.level.clone())
}

/// Initialize the global subscriber from configuration.
///
/// JSON output carries RFC 3339 timestamps; the plain format is meant for
/// terminals. Calling this twice keeps the first subscriber.
pub fn install_tracing_from_config(cfg: &pqfetch_config::LoggingConfig) {
    let directives = filter_directives(cfg);
    let env_filter = EnvFilter::try_new(&directives).unwrap_or_else(|err| {
        eprintln!("invalid log filter {directives:?} ({err}), falling back to info");
        EnvFilter::new("info")
    });

    let result = if cfg.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    };

    if let Err(err) = result {
        eprintln!("tracing already initialized: {err}");
    }
}
