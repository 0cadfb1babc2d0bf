use clap::Parser;
use tracing_subscriber::EnvFilter;

use studentloan::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let engine = cli::load_engine(&args)?;

    match &args.command {
        Command::Serve { port } => {
            tracing::info!("studentloan v{}", env!("CARGO_PKG_VERSION"));
            studentloan::api::run_http_server(*port, engine).await?;
        }
        command => println!("{}", cli::execute(&engine, command)?),
    }
    Ok(())
}
