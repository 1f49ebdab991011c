use clap::Parser;
use padbridge_lib::Cli;

#[tokio::main]
async fn main() {
    if let Err(e) = padbridge_lib::run(Cli::parse()).await {
        log::error!("{}", e);
        eprintln!("padbridge: {}", e);
        std::process::exit(1);
    }
}
