use clap::Parser;

use openbrowser_cli::cli::{self, Cli};
use openbrowser_cli::telemetry;

#[tokio::main]
async fn main() {
    let parsed = Cli::parse();
    telemetry::init(parsed.verbose);
    let code = cli::dispatch(parsed).await;
    std::process::exit(code);
}
