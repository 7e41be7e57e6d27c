mod cli;
mod context;
mod prompt;
mod report;
mod service;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let _guard = init_logging(&cli)?;

    match cli.command {
        cli::Command::Check(args) => service::check(&cli.app_name, args).await,
        cli::Command::Service(args) => service::run(&cli.app_name, args).await,
    }
}

/// Logs go to stderr, and with `--log-to-file` also to a daily file in the
/// cache directory. The returned guard flushes the file on drop.
fn init_logging(cli: &cli::Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = if cli.log_to_file {
        let dir = keepup_core::config::log_dir(&cli.app_name)?;
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(&dir, format!("{}.log", cli.app_name));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}
