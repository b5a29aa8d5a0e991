use color_eyre::Result;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

pub use meet_recorder_browser::record;
pub use meet_recorder_config::{
    Args,
    Config,
    SessionConfig,
};

pub fn init_errors() -> Result<()> {
    color_eyre::install()
}

/// Logs to stderr, `info` and up unless `RUST_LOG` says otherwise.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(filter))
        .with(tracing_error::ErrorLayer::default())
        .try_init()?;
    Ok(())
}
