use anyhow::Context;
use clap::Parser;

use pulsechain::cli::{self, Args};
use pulsechain::logging;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.verbose, args.log_format);

    let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;
    let code = match runtime.block_on(cli::run(args)) {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(error = %e, "command failed");
            eprintln!("pulsechain: {}", e.user_message());
            1
        }
    };
    drop(runtime);

    std::process::exit(code)
}
