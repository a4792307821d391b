use clap::Parser;
use clinord::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = clinord::config::Config::from_env()?;

    let exit_code = clinord::cli::run(cli, &config).await;
    std::process::exit(exit_code);
}
