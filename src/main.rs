use anyhow::Result;
use clap::Parser;

mod cli;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_pipeline", log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    ffmpeg_pipeline::init()?;
    cli::Args::parse().run().await
}
