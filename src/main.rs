use clap::Parser;

use asterisk_fixture::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli::init_tracing(cli.log_json);
    cli::execute(cli).await
}
