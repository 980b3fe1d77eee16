use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rangedl::cli::Args;
use rangedl::commands;

fn main() -> Result<()> {
    let mut args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    // Resolve relative to the current dir so messages show where files land.
    if args.dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.dir = cwd.join(&args.dir);
        }
    }

    let rt = tokio::runtime::Runtime::new()?;

    if args.list {
        return rt.block_on(commands::list_downloads(args.dir));
    }

    let config = args.download_config();
    config.validate()?;
    let concurrency = args.concurrency.unwrap_or_else(num_cpus::get);

    rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, saving progress...");
                on_interrupt.cancel();
            }
        });

        commands::run_downloads(args.urls, args.dir, config, concurrency, cancel).await
    })
}
