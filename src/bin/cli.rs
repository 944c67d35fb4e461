use clap::Parser;
use eth_tx_watcher::api::{Cli, CliHandler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Less verbose than the watcher itself
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let handler = CliHandler::new(&cli.server, cli.timeout)?;

    if let Err(e) = handler.execute_command(&cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
