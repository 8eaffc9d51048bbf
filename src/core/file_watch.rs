use std::time::Duration;

use log::{debug, info};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::core::host::HostApi;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The binary now hashes to something other than the last known value.
    Changed(String),
    Cancelled,
}

/// Waits until `path` hashes differently from `last_known_md5`.
///
/// Uses the host file watch when there is one, each event triggers a rehash.
/// Without it (or once the watch stream ends) the file is rehashed every
/// `interval`. Dropping or firing `cancel` ends the wait.
pub async fn wait_for_binary_change(
    host: &dyn HostApi,
    path: &str,
    last_known_md5: &str,
    interval: Duration,
    mut cancel: oneshot::Receiver<()>,
) -> WaitOutcome {
    let mut watch = host.start_file_watch(path).await;
    if watch.is_some() {
        info!("Vigilando cambios en {path}");
    } else {
        info!("Sondeando {path} cada {}s", interval.as_secs_f32());
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let watch_closed = match watch.as_mut() {
            Some(active) => tokio::select! {
                _ = &mut cancel => return WaitOutcome::Cancelled,
                event = active.events.recv() => event.is_none(),
            },
            None => tokio::select! {
                _ = &mut cancel => return WaitOutcome::Cancelled,
                _ = ticker.tick() => false,
            },
        };
        if watch_closed {
            debug!("La vigilancia de {path} terminó, se continúa por sondeo");
            watch = None;
            continue;
        }

        if let Some(current) = host.compute_md5(path).await {
            if !current.eq_ignore_ascii_case(last_known_md5) {
                info!("Cambio detectado en {path}");
                return WaitOutcome::Changed(current);
            }
        }
    }
}
