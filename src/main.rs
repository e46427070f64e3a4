use clap::Parser;

use ananke::config::Cli;
use ananke::{app, logging};

#[tokio::main]
async fn main() {
    if let Err(err) = logging::init() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    let cli = Cli::parse();
    if let Err(err) = app::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
