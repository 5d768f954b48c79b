use clap::Parser;
use std::sync::Arc;
use tracing::error;

use xlsx_consolidator::cli::{self, Cli, EXIT_SERVER_ERROR};
use xlsx_consolidator::{logging, AppState, Config};

#[tokio::main]
async fn main() {
    logging::init();

    let args = Cli::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            std::process::exit(EXIT_SERVER_ERROR);
        }
    };

    let state = match AppState::new(config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(EXIT_SERVER_ERROR);
        }
    };

    let code = cli::run(state, args.command).await;
    std::process::exit(code);
}
