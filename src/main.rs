use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use picaterpillar_runtime::config::{Config, KEY_UART_BAUDRATE, KEY_UART_PORT};

/// Serial motor link runtime for the Picaterpillar robot
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON file with robot parameters, merged over the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device (overrides `uart_port`)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (overrides `uart_baudrate`)
    #[arg(short, long)]
    baud: Option<u32>,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error ({}): {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.set(KEY_UART_PORT, port);
    }
    if let Some(baud) = args.baud {
        config.set(KEY_UART_BAUDRATE, baud);
    }

    if let Err(e) = picaterpillar_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
