use anyhow::Result;
use clap::Parser;
use waverun_cli::cli::{self, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::init_tracing(args.verbose);

    let mut stdout = std::io::stdout();
    let code = cli::execute(&args, &mut stdout).await?;
    std::process::exit(code);
}
