// src/main.rs

use workdag::cli;
use workdag::logging::init_logging;

#[tokio::main]
async fn main() {
    let args = cli::parse();

    if let Err(e) = init_logging(args.log_level) {
        eprintln!("failed to initialise logging: {e}");
        std::process::exit(2);
    }

    match workdag::run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("workdag: {e}");
            std::process::exit(2);
        }
    }
}
