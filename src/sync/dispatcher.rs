use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{SubmitOutcome, SyncGateway, SyncRequest};

/// Fire-and-forget submission queue in front of a sync gateway.
///
/// A single worker task drains the queue in order, so the analysis path only
/// ever does a non-blocking `try_send`. While the gateway is offline the
/// worker tries to reconnect it every `reconnect_interval`, which replays
/// anything the gateway buffered.
pub struct SyncDispatcher {
    tx: mpsc::Sender<SyncRequest>,
    handle: JoinHandle<()>,
}

impl SyncDispatcher {
    /// Spawn the worker; must be called from within a tokio runtime
    pub fn spawn(gateway: Arc<dyn SyncGateway>, capacity: usize, reconnect_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(sync_worker(gateway, rx, reconnect_interval));
        Self { tx, handle }
    }

    /// Queue a submission; returns false when it had to be dropped
    pub fn dispatch(&self, request: SyncRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Sync queue full, dropping submission");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Sync worker stopped, dropping submission");
                false
            }
        }
    }

    /// Stop accepting submissions and wait for the queue to drain
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            warn!("Sync worker failed to join: {}", e);
        }
    }
}

/// Rate limit for reconnect attempts
struct Reconnector {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl Reconnector {
    async fn reconnect_if_due(&mut self, gateway: &dyn SyncGateway) {
        if !gateway.needs_reconnect() {
            return;
        }
        let now = Instant::now();
        if matches!(self.last_attempt, Some(last) if now.duration_since(last) < self.interval) {
            return;
        }
        self.last_attempt = Some(now);
        if gateway.reconnect().await {
            info!("🌐 Sync gateway back online");
        }
    }
}

async fn sync_worker(gateway: Arc<dyn SyncGateway>, mut rx: mpsc::Receiver<SyncRequest>, reconnect_interval: Duration) {
    let mut reconnector = Reconnector {
        interval: reconnect_interval,
        last_attempt: None,
    };
    let mut ticker = time::interval(reconnect_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            request = rx.recv() => {
                let Some(request) = request else { break };
                reconnector.reconnect_if_due(gateway.as_ref()).await;
                match gateway.submit(&request).await {
                    SubmitOutcome::Accepted => debug!("📤 Sync submission accepted"),
                    SubmitOutcome::Buffered => debug!("📦 Sync submission buffered for replay"),
                    SubmitOutcome::Failed => warn!("Sync submission dropped"),
                }
            }
            _ = ticker.tick() => reconnector.reconnect_if_due(gateway.as_ref()).await,
        }
    }

    // Last chance to hand buffered submissions over before stopping
    if gateway.needs_reconnect() && !gateway.reconnect().await {
        warn!("Sync worker stopped with submissions still buffered");
    }
    debug!("Sync worker stopped");
}
