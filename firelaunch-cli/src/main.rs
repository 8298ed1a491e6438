//! Entry point for the `firelaunch` binary.

use clap::Parser;
use firelaunch_cli::{cli::Cli, commands, logging};
use firelaunch_executor::CancelToken;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let cancel = CancelToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    if let Err(e) = commands::run(&cli, &cancel).await {
        if e.is_cancelled() {
            tracing::warn!("interrupted");
            std::process::exit(130);
        }
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

/// Fire `cancel` on the first SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancelToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            _ = term.recv() => tracing::info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("received SIGINT");
    }
    cancel.cancel();
}
