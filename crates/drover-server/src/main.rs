use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use drover_ecdysis::{InheritError, ListenerSet, Signal, Signals};
use drover_pool::{Pool, PoolError, PoolHandle};
use tracing::{error, info, warn};

mod apps;
mod cli;
mod settings;
mod telemetry;

use apps::AppFactory;
use cli::Cli;
use settings::{Settings, SettingsError};

/// Name of the inherited listener served by the pool.
const HTTP_LISTENER: &str = "http";

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init(cli.log_format) {
        eprintln!("Failed to init telemetry: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("drover-supervisor")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "Drover exiting");
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Drover starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(&cli)?;
    settings.log_config();
    let config = settings.to_pool_config()?;

    let mut pool = Pool::new(config, AppFactory::new(settings.app.clone()));

    // Adopt the listener from systemd socket activation when one was passed.
    if let Some(mut inherited) = ListenerSet::from_env()? {
        let listener = inherited.take(HTTP_LISTENER)?;
        inherited.ensure_empty()?;
        info!(
            addr = ?listener.local_addr().ok(),
            "Serving on inherited listener"
        );
        pool = pool.inherit_listener(listener);
    }

    let mut signals = Signals::new().context("failed to install signal handlers")?;
    let pool = pool.start().await?;
    let handle = pool.handle();
    info!(
        addr = %pool.local_addr(),
        app = %settings.app,
        workers = handle.ready_count(),
        "Drover ready"
    );

    let wait = pool.wait();
    tokio::pin!(wait);

    let report = loop {
        tokio::select! {
            result = &mut wait => break result?,
            signal = signals.recv() => on_signal(signal, &cli, &settings.app, &handle),
        }
    };

    info!(
        drained = report.drained,
        forced = report.forced,
        aborted_requests = report.aborted_requests,
        "Drover stopped"
    );
    Ok(())
}

fn on_signal(signal: Signal, cli: &Cli, app: &str, handle: &PoolHandle) {
    match signal {
        Signal::Terminate => {
            let deadline = handle.config().graceful_timeout;
            if !handle.request_shutdown(deadline) {
                info!("Shutdown already in progress");
            }
        }
        Signal::Quit => {
            handle.request_shutdown(Duration::ZERO);
        }
        Signal::Reload => {
            if handle.is_shutting_down() {
                warn!("Ignoring reload during shutdown");
                return;
            }
            let cli = cli.clone();
            let app = app.to_string();
            let handle = handle.clone();
            tokio::spawn(async move {
                if let Err(e) = reload(&cli, &app, &handle).await {
                    warn!(error = ?e, "Reload failed; previous workers keep serving");
                }
            });
        }
    }
}

/// Re-read the settings and roll the worker generation onto them.
async fn reload(cli: &Cli, app: &str, handle: &PoolHandle) -> Result<()> {
    let settings = Settings::load(cli)?;
    if settings.app != app {
        // The factory is fixed when the pool starts.
        warn!(
            running = %app,
            requested = %settings.app,
            "Application changes take effect on restart only"
        );
    }
    handle.reload_with(settings.to_pool_config()?).await?;
    info!(workers = handle.ready_count(), "Reload complete");
    Ok(())
}

/// Process exit code for a fatal error.
///
/// - `1` bind failure (or any other runtime failure)
/// - `2` configuration error
/// - `3` the application handler failed to load
/// - `4` a worker slot crash-looped
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<SettingsError>().is_some() {
        return 2;
    }
    if err.downcast_ref::<InheritError>().is_some() {
        return 1;
    }
    match err.downcast_ref::<PoolError>() {
        Some(PoolError::Config(_)) => 2,
        Some(PoolError::Bind(_)) => 1,
        Some(PoolError::HandlerLoad { .. }) => 3,
        Some(PoolError::CrashLoop { .. }) => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let config_err: anyhow::Error =
            SettingsError::from(drover_pool::ConfigError::Missing("graceful_timeout")).into();
        assert_eq!(exit_code(&config_err), 2);

        let crash_loop: anyhow::Error = PoolError::CrashLoop {
            slot: 0,
            restarts: 5,
        }
        .into();
        assert_eq!(exit_code(&crash_loop), 4);

        let bind: anyhow::Error = PoolError::Bind(drover_pool::BindError::Inherited(
            std::io::ErrorKind::InvalidInput.into(),
        ))
        .into();
        assert_eq!(exit_code(&bind), 1);

        let other = anyhow::anyhow!("signal handlers unavailable");
        assert_eq!(exit_code(&other), 1);
    }
}
