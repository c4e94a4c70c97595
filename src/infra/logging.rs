use tracing_subscriber::EnvFilter;

pub fn init_logging(level: &str) {
    // Base level from config, still overridable via RUST_LOG.
    let level = level.to_ascii_lowercase();
    let default = format!("{level},feedrelay={level},reqwest=warn,hyper=warn");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}
