//! Fixed-duration windows over the raw change stream

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::action::OrderedAction;
use crate::event::ChangeEvent;
use crate::merge::EventMerger;

/// Buffers raw events into contiguous windows of `period` and forwards the
/// merged actions of each window once it closes.
///
/// Window boundaries come from tokio's clock, so tests running with a paused
/// clock see deterministic windows.
#[derive(Debug, Clone)]
pub struct WindowedAggregator {
    period: Duration,
    merger: EventMerger,
}

impl WindowedAggregator {
    pub fn new(period: Duration, merger: EventMerger) -> Self {
        Self { period, merger }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run until `shutdown` fires or either channel closes.
    ///
    /// When the raw stream ends the partially filled window is flushed
    /// before returning. Returns the number of non-empty windows flushed.
    #[instrument(skip_all, fields(period = ?self.period))]
    pub async fn run(
        self,
        mut raw_rx: mpsc::Receiver<ChangeEvent>,
        action_tx: mpsc::Sender<OrderedAction>,
        shutdown: CancellationToken,
    ) -> u64 {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        // A slow flush must not shift later boundaries off the grid
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut window: Vec<ChangeEvent> = Vec::new();
        let mut flushed = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(pending = window.len(), "Aggregator shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if window.is_empty() {
                        trace!("Empty window");
                        continue;
                    }
                    flushed += 1;
                    if !self.flush(&mut window, &action_tx).await {
                        break;
                    }
                }
                event = raw_rx.recv() => match event {
                    Some(event) => window.push(event),
                    None => {
                        info!("Change source closed");
                        if !window.is_empty() {
                            flushed += 1;
                            self.flush(&mut window, &action_tx).await;
                        }
                        break;
                    }
                },
            }
        }

        flushed
    }

    /// Merge and forward the current window. Returns `false` once nobody
    /// listens for actions any more.
    async fn flush(&self, window: &mut Vec<ChangeEvent>, action_tx: &mpsc::Sender<OrderedAction>) -> bool {
        let events = std::mem::take(window);
        let event_count = events.len();

        // The merge probes the disk
        let merger = self.merger.clone();
        let actions = match tokio::task::spawn_blocking(move || merger.merge(events)).await {
            Ok(actions) => actions,
            Err(e) => {
                warn!("Window merge failed, dropping {} events: {}", event_count, e);
                return true;
            }
        };

        debug!(events = event_count, actions = actions.len(), "Window closed");

        for action in actions {
            if action_tx.send(action).await.is_err() {
                debug!("Action channel closed");
                return false;
            }
        }
        true
    }
}
