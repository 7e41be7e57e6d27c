use keepup_core::{
    ErrorKind, FileConfig, ProcessEnumerator, Program, SupervisorEvent, UpdateError, UpdaterConfig,
    config,
};
use keepup_supervisor::{Watchdog, create_enumerator};
use keepup_updater::{
    LocalUpdateSource, QueryUpdateSource, RemoteUpdateSource, UpdateChecker, UpdateSource, Updater,
    applier_for_platform,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::{ServiceArgs, SourceKind, UpdateArgs};
use crate::context::ServiceContext;

struct Service {
    updater: Arc<Updater>,
    ctx: Arc<ServiceContext>,
    enumerator: Arc<dyn ProcessEnumerator>,
}

async fn build(app_name: &str, args: &UpdateArgs) -> anyhow::Result<Service> {
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path(app_name)
            .map_err(|e| UpdateError::new(ErrorKind::Config, e))?,
    };
    let config = Arc::new(FileConfig::load_or_default(config_path).await);
    let enumerator = create_enumerator();

    let source = create_source(args, config.clone())?;
    info!("Using update source: {}", source.description());

    let applier = applier_for_platform(&args.platform, enumerator.clone());
    let download_dir = match &args.download_dir {
        Some(dir) => dir.clone(),
        None => config::log_dir(app_name)
            .map_err(|e| UpdateError::new(ErrorKind::Config, e))?
            .join("downloads"),
    };
    let updater = Updater::new(source, config.clone(), applier)?.with_download_dir(download_dir);
    let ctx = ServiceContext::new(args.clone(), app_name, config, enumerator.clone())?;

    Ok(Service {
        updater: Arc::new(updater),
        ctx: Arc::new(ctx),
        enumerator,
    })
}

fn create_source(
    args: &UpdateArgs,
    config: Arc<dyn UpdaterConfig>,
) -> anyhow::Result<Arc<dyn UpdateSource>> {
    let url = args.url.clone().unwrap_or_default();
    let source: Arc<dyn UpdateSource> = match args.source {
        SourceKind::Remote => Arc::new(RemoteUpdateSource::new(url)?),
        SourceKind::Query => {
            if url.is_empty() {
                anyhow::bail!("The query source needs --url");
            }
            Arc::new(QueryUpdateSource::new(url, config)?)
        }
        SourceKind::Local => {
            let Some(json_path) = &args.local_update_json else {
                anyhow::bail!("The local source needs --local-update-json");
            };
            Arc::new(LocalUpdateSource::new(json_path, args.local_asset.clone()))
        }
    };
    Ok(source)
}

/// Runs a single update check. A cancelled update is not a failure.
pub async fn check(app_name: &str, args: UpdateArgs) -> anyhow::Result<()> {
    let service = build(app_name, &args).await?;
    match service.updater.update(service.ctx.as_ref()).await {
        Ok(Some(update)) => info!("Update {} done", update),
        Ok(None) => {}
        Err(e) if e.is_cancel() => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Checks for updates on an interval and keeps the watched programs running
/// until SIGTERM or SIGINT.
pub async fn run(app_name: &str, args: ServiceArgs) -> anyhow::Result<()> {
    info!("Keepup service starting...");

    let service = build(app_name, &args.update).await?;
    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let checker = Arc::new(UpdateChecker::with_tick(
        service.updater.clone(),
        service.ctx.clone(),
        Duration::from_secs(args.update.check_interval),
    ));
    let initial = {
        let checker = checker.clone();
        tokio::spawn(async move {
            let _ = checker.check().await;
        })
    };
    checker.start();

    let programs: Vec<Program> = args
        .watch
        .iter()
        .map(|spec| Program::new(&spec.path).exit_on(spec.exit_on))
        .collect();
    let watchdog = Watchdog::new(
        programs,
        Duration::from_millis(args.restart_delay),
        service.enumerator.clone(),
    )
    .exclusive(true);
    let mut events = watchdog.events();
    let handles = if args.watch.is_empty() {
        info!("No programs to watch");
        Vec::new()
    } else {
        watchdog.watch(shutdown.clone()).await?
    };

    loop {
        tokio::select! {
            Some(event) = events.recv() => handle_supervisor_event(event),

            _ = shutdown.cancelled() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // an update that is already installing is allowed to finish
    checker.shutdown().await;
    if let Err(e) = initial.await {
        warn!("Initial update check failed: {}", e);
    }
    for handle in handles {
        if let Err(e) = handle.await
            && !e.is_cancelled()
        {
            warn!("Supervision task failed: {}", e);
        }
    }

    for supervised in watchdog.registry().list() {
        let state = supervised.get_state();
        if state.is_running() {
            warn!(
                "{} is still running with PID {:?}",
                supervised.program,
                supervised.get_pid()
            );
        } else {
            info!(
                "{} {:?}, restarted {} time(s), last exit {}",
                supervised.program,
                state,
                supervised.get_restart_count(),
                supervised
                    .get_last_exit()
                    .map_or_else(|| "none".to_string(), |status| status.to_string())
            );
        }
    }
    info!("Keepup service stopped");
    Ok(())
}

fn handle_supervisor_event(event: SupervisorEvent) {
    match event {
        SupervisorEvent::ProcessStarted { program, pid } => {
            info!("{} started with PID {}", program.display(), pid);
        }
        SupervisorEvent::ProcessExited {
            program,
            pid,
            status,
            uptime,
        } => {
            info!(
                "{} (PID {}) exited with {} after {:?}",
                program.display(),
                pid,
                status,
                uptime
            );
        }
        SupervisorEvent::SpawnFailed { program, reason } => {
            error!("Unable to start {}: {}", program.display(), reason);
        }
        SupervisorEvent::ProcessRestarting {
            program,
            attempt,
            delay,
        } => {
            info!("Restarting {} (attempt {}) after {:?}", program.display(), attempt, delay);
        }
        SupervisorEvent::ProgramStopped { program } => {
            info!("{} will not be restarted", program.display());
        }
    }
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Unable to install signal handlers: {}", e);
                    return;
                }
            };
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
            shutdown.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl-C");
                    shutdown.cancel();
                }
                Err(e) => error!("Unable to listen for Ctrl-C: {}", e),
            }
        });
    }
}
