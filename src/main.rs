use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use scanfs::{report, CliArgs, ScanConfig, Scanner};

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    let config = ScanConfig::from_args(&args).context("invalid arguments")?;
    let quiet = config.quiet;
    let show_users = config.show_users;

    let scanner = Scanner::new(config).context("scan target unusable")?;

    let terminate = scanner.terminate_flag();
    ctrlc::set_handler(move || {
        error!("interrupt received, stopping scan");
        terminate.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    let spinner = (!quiet).then(|| report::scan_spinner(scanner.target()));
    let result = scanner.scan();
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let result = result.context("scan failed")?;
    if quiet {
        info!(
            target = %result.root_path().display(),
            total_bytes = result.root().total(),
            files = result.root().file_count(),
            directories = result.root().dir_count(),
            "scan complete"
        );
    } else {
        report::print_report(&result, show_users);
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "scanfs=warn",
        1 => "scanfs=info",
        2 => "scanfs=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
