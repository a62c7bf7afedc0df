use clap::Parser;
use dotenv::dotenv;
use knoll_bot::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    log::info!("Starting Knoll bot with webhook support...");

    knoll_bot::server::run(config).await
}
