//! Process exit / reload scheduling.
//!
//! Handlers ask for termination from inside a blocking dispatch call, so the
//! timer is spawned on a stored runtime handle. The daemon loop awaits the
//! `watch` receiver and shuts down gracefully once it leaves `Running`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use voxterm_core::collab::Terminator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exit {
    #[default]
    Running,
    Shutdown,
    Reload,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    handle: Handle,
    tx: watch::Sender<Exit>,
}

impl Lifecycle {
    pub fn new(handle: Handle) -> Self {
        let (tx, _) = watch::channel(Exit::Running);
        Self { handle, tx }
    }

    /// Bind to the runtime the caller is running on.
    pub fn current() -> Result<Self, String> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| format!("lifecycle needs a tokio runtime: {e}"))
    }

    pub fn state(&self) -> Exit {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Exit> {
        self.tx.subscribe()
    }

    /// Request exit right away. Only the first request counts.
    pub fn exit_now(&self, exit: Exit) {
        request(&self.tx, exit);
    }
}

impl Terminator for Lifecycle {
    fn die_in(&self, delay: Duration, reload: bool) {
        let exit = if reload { Exit::Reload } else { Exit::Shutdown };
        debug!("lifecycle: {exit:?} in {delay:?}");
        let tx = self.tx.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            request(&tx, exit);
        });
    }
}

fn request(tx: &watch::Sender<Exit>, exit: Exit) {
    let changed = tx.send_if_modified(|state| {
        if *state == Exit::Running && exit != Exit::Running {
            *state = exit;
            true
        } else {
            false
        }
    });
    if changed {
        info!("lifecycle: {exit:?} requested");
    }
}

/// Resolve once an exit has been requested.
pub async fn wait_for_exit(mut rx: watch::Receiver<Exit>) -> Exit {
    loop {
        let state = *rx.borrow_and_update();
        if state != Exit::Running {
            return state;
        }
        if rx.changed().await.is_err() {
            return Exit::Shutdown;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn die_in_fires_after_delay() {
        let lifecycle = Lifecycle::current().unwrap();
        let rx = lifecycle.subscribe();
        lifecycle.die_in(Duration::from_millis(20), true);
        assert_eq!(lifecycle.state(), Exit::Running);
        assert_eq!(wait_for_exit(rx).await, Exit::Reload);
    }

    #[tokio::test]
    async fn first_request_wins() {
        let lifecycle = Lifecycle::current().unwrap();
        lifecycle.exit_now(Exit::Shutdown);
        lifecycle.exit_now(Exit::Reload);
        assert_eq!(lifecycle.state(), Exit::Shutdown);
        assert_eq!(wait_for_exit(lifecycle.subscribe()).await, Exit::Shutdown);
    }

    #[test]
    fn needs_a_runtime() {
        assert!(Lifecycle::current().is_err());
    }
}
