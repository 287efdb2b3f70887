use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;

use memcached::config::{Cli, Config};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // install global collector configured based on RUST_LOG env var.
    tracing_subscriber::fmt::init();

    let config = Config::from_cli(Cli::parse());
    let listener = TcpListener::bind(&format!("0.0.0.0:{}", config.port)).await?;
    memcached::server::run(listener, config, signal::ctrl_c()).await;
    Ok(())
}
