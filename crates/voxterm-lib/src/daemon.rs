//! Daemon wiring: speech queue, override store, lifecycle, assistant and the
//! HTTP API, torn down and rebuilt on every reload.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{error, info};

use crate::assistant::Assistant;
use crate::config::AssistantConfig;
use crate::lifecycle::{Exit, Lifecycle, wait_for_exit};
use crate::server::{AppState, router};
use crate::speech::SpeechQueue;
use crate::store::JsonFileStore;

/// Serve until shutdown, rebuilding everything from a fresh config on reload.
pub async fn run(load: impl Fn() -> Result<AssistantConfig, String>) -> Result<(), String> {
    loop {
        let config = load()?;
        match serve(config).await? {
            Exit::Reload => info!("reloading"),
            _ => return Ok(()),
        }
    }
}

/// One daemon lifetime. Overrides are saved on the way out.
pub async fn serve(config: AssistantConfig) -> Result<Exit, String> {
    let speech = SpeechQueue::new(config.voice_backend(), config.pause_cap());
    let lifecycle = Lifecycle::new(Handle::current());
    let store = Arc::new(JsonFileStore::new(&config.overrides_path));

    let assistant = Assistant::start(
        &config,
        Arc::new(speech.clone()),
        Arc::new(lifecycle.clone()),
        store,
    )
    .map_err(|e| format!("failed to start assistant: {e}"))?;
    let assistant = Arc::new(assistant);

    let app = router(AppState {
        assistant: assistant.clone(),
        lifecycle: Some(lifecycle.clone()),
        speech: Some(speech),
    });

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", config.listen))?;
    info!("voxterm listening on {}", config.listen);

    let exit_rx = lifecycle.subscribe();
    let on_signal = lifecycle.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = wait_for_exit(exit_rx) => {}
                _ = tokio::signal::ctrl_c() => on_signal.exit_now(Exit::Shutdown),
            }
        })
        .await;

    if let Err(e) = assistant.persist() {
        error!("failed to save overrides: {e}");
    }
    served.map_err(|e| format!("server error: {e}"))?;

    Ok(match lifecycle.state() {
        Exit::Running => Exit::Shutdown,
        exit => exit,
    })
}
