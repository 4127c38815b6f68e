//! `ccrelay daemon`: wire the tasks together and run until a signal.

use std::sync::Arc;

use anyhow::Context;
use ccrelay_engine::SessionRegistry;
use ccrelay_feed::FeedTailer;
use ccrelay_tmux::TmuxController;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, DaemonOpts};
use crate::config::{RuntimeConfig, build_executor};
use crate::coordinator::Coordinator;
use crate::feed_task::run_feed_tailer;
use crate::handle::EngineHandle;
use crate::notifier::{Notifier, StdoutNotifier, run_delivery};

const DELIVERY_CAPACITY: usize = 256;
const CONTROL_CAPACITY: usize = 32;
const FEED_CAPACITY: usize = 4;

pub async fn run_daemon(cli: &Cli, opts: &DaemonOpts) -> anyhow::Result<()> {
    let config = RuntimeConfig::from_cli(cli, opts)?;
    std::fs::create_dir_all(&config.paths.dir)
        .with_context(|| format!("creating {}", config.paths.dir.display()))?;

    let executor = build_executor(config.tmux_socket.as_deref());
    let controller = Arc::new(TmuxController::new(executor, config.tmux_session.clone()));
    {
        let controller = Arc::clone(&controller);
        tokio::task::spawn_blocking(move || controller.ensure_session())
            .await
            .context("tmux session task")?
            .context("creating tmux session")?;
    }

    let registry = SessionRegistry::load(config.paths.state_file(), config.roots.clone())
        .context("loading state")?;
    tracing::info!(
        state = %config.paths.state_file().display(),
        session = %config.tmux_session,
        windows = registry.window_ids().count(),
        "ccrelay daemon starting"
    );

    let cancel = CancellationToken::new();

    let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_CAPACITY);
    let notifier: Arc<dyn Notifier> = Arc::new(StdoutNotifier::stdout());
    let delivery_handle = tokio::spawn(run_delivery(notifier, delivery_rx, cancel.clone()));

    let (feed_tx, feed_rx) = mpsc::channel(FEED_CAPACITY);
    let tailer = FeedTailer::open(config.paths.feed_file(), config.paths.feed_cursor());
    let feed_handle = tokio::spawn(run_feed_tailer(
        tailer,
        feed_tx,
        config.poll_interval,
        cancel.clone(),
    ));

    // Kept alive so the control channel stays open for library callers.
    let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
    let _handle = EngineHandle::new(control_tx);

    let coordinator = Coordinator::new(controller, config, registry, delivery_tx);
    let mut coordinator_handle = tokio::spawn(coordinator.run(control_rx, feed_rx, cancel.clone()));

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    let coordinator_done = tokio::select! {
        () = shutdown => false,
        _ = &mut coordinator_handle => {
            tracing::error!("coordinator exited unexpectedly");
            true
        }
    };

    cancel.cancel();
    if !coordinator_done {
        coordinator_handle.await.context("coordinator task")?;
    }
    feed_handle.await.context("feed task")?;
    delivery_handle.await.context("delivery task")?;
    tracing::info!("daemon stopped");
    Ok(())
}
