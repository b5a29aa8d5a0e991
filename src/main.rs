use clap::Parser;
use color_eyre::Result;
use meet_recorder::{
    init_errors,
    init_logging,
    record,
    Args,
    Config,
    SessionConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_errors()?;
    init_logging()?;

    let config = Config::new(Args::parse())?;
    let session = SessionConfig::new(&config)?;

    record(session).await
}
