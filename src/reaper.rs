//! Background reaper task — destroys running sandboxes that sit idle past
//! the configured timeout. Paused sandboxes are never reaped; their snapshot
//! is the whole point.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::sandbox::manager::SandboxManager;

const REAPER_INTERVAL: Duration = Duration::from_secs(10);

/// Spawn the reaper as a tokio background task. A zero idle timeout disables
/// it entirely.
pub fn spawn(manager: Arc<SandboxManager>, config: Arc<Config>) {
    if config.idle_timeout_s == 0 {
        debug!("idle reaper disabled");
        return;
    }
    let idle_timeout = Duration::from_secs(config.idle_timeout_s);

    tokio::spawn(async move {
        loop {
            manager.reap_idle(idle_timeout).await;
            tokio::time::sleep(REAPER_INTERVAL).await;
        }
    });
}
