mod alarm;
mod api;
mod error;
mod event;
mod paths;
mod player;
mod scheduler;
mod settings;
mod status;
mod store;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::player::{Playback, StreamPlayer};
use crate::store::ConfigStore;

#[tokio::main]
async fn main() {
    // ── Logging ───────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        error!(dir = %app_dir.display(), error = %e, "Failed to create app data directory");
        std::process::exit(1);
    }

    // ── Settings ──────────────────────────────────────────────────────────────
    let settings = settings::load_or_default(&paths::settings_file_path(&app_dir))
        .unwrap_or_else(|e| {
            warn!(error = ?e, "Settings unusable, using defaults");
            settings::Settings::default()
        });

    // ── Radio config document ─────────────────────────────────────────────────
    let store = match ConfigStore::open(paths::document_file_path(&app_dir)) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to open radio config");
            std::process::exit(1);
        }
    };

    // ── Player ────────────────────────────────────────────────────────────────
    let stream_player = Arc::new(StreamPlayer::from_settings(&settings.player));
    match scheduler::restore_playback(&store, stream_player.as_ref()) {
        Ok(true) => info!(pid = ?stream_player.pid(), "Radio was on before restart, resumed"),
        Ok(false) => {}
        Err(e) => error!(error = %e, "Failed to resume radio"),
    }
    let player: Arc<dyn Playback> = stream_player;

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = paths::status_file_path(&app_dir);
    let mut current_status = status::RadioStatus::new(player.is_active());
    status::write_status(&status_path, &current_status);

    let (event_tx, mut event_rx) = mpsc::channel::<event::DaemonEvent>(32);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ──────────────────────────────────────────────────────
    let scheduler_handle = tokio::spawn(scheduler::run(
        Arc::clone(&store),
        Arc::clone(&player),
        settings.scheduler.clone(),
        event_tx.clone(),
        shutdown_rx.clone(),
    ));

    let app = api::router(api::AppState {
        store: Arc::clone(&store),
        player: Arc::clone(&player),
        events: Some(event_tx.clone()),
        window_minutes: settings.scheduler.effective_window_minutes(),
    });
    let bind_addr = settings.http.bind_addr();
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %bind_addr, error = %e, "Failed to bind HTTP listener");
            player.teardown();
            std::process::exit(1);
        }
    };
    let server_handle = {
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "HTTP server stopped");
            }
        })
    };

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(event::DaemonEvent::Shutdown).await;
            }
        });
    }
    drop(event_tx);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %bind_addr,
        config = %store.path().display(),
        "radio-alarm-daemon started"
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        let shutting_down = matches!(evt, event::DaemonEvent::Shutdown);
        match &evt {
            event::DaemonEvent::AlarmStarted { alarm } => info!(alarm = %alarm, "Alarm playing"),
            event::DaemonEvent::AlarmEnded => info!("Alarm finished"),
            event::DaemonEvent::PlaybackRestarted => warn!("Radio restarted after it died"),
            event::DaemonEvent::PlaybackFailed(reason) => error!(reason = %reason, "Radio failed"),
            event::DaemonEvent::PlaybackSwitched(on) => info!(on, "Radio switched manually"),
            event::DaemonEvent::Shutdown => info!("Shutting down"),
        }
        current_status.apply(&evt);
        status::write_status(&status_path, &current_status);
        if shutting_down {
            break;
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    drop(event_rx);
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Alarm scheduler task failed");
    }
    if let Err(e) = server_handle.await {
        error!(error = %e, "HTTP server task failed");
    }
    player.teardown();
    info!("Stopped");
}
