//! Long-poll server
//!
//! Pulls updates from Telegram, translates each into an engine event, and
//! dispatches it on its own task so one requester's slow render never delays
//! another's dialogue. In-flight tasks are tracked so shutdown can drain
//! them gracefully and abort whatever remains past the grace period.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use gifwright_core::telegram::{TelegramApi, Update};
use gifwright_core::{Engine, FfmpegPipeline, WorkDir};

/// Delay before retrying after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);
/// How long shutdown waits for in-flight events before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// The production engine type: ffmpeg renders, Telegram responds.
type BotEngine = Engine<FfmpegPipeline, TelegramApi>;

/// The getUpdates dispatch loop.
pub struct PollServer {
    /// Telegram client used for polling and media downloads.
    api: TelegramApi,
    /// The conversation engine.
    engine: Arc<BotEngine>,
    /// Work directory media downloads stage into.
    work: WorkDir,
    /// Long-poll timeout in seconds.
    poll_timeout_secs: u64,
    /// In-flight event tasks, keyed by update id.
    in_flight: Arc<DashMap<i64, AbortHandle>>,
}

impl PollServer {
    /// Create a server.
    pub fn new(
        api: TelegramApi,
        engine: Arc<BotEngine>,
        work: WorkDir,
        poll_timeout_secs: u64,
    ) -> Self {
        Self {
            api,
            engine,
            work,
            poll_timeout_secs,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Run the poll loop until `shutdown` resolves.
    pub async fn run(&self, mut shutdown: Pin<Box<dyn Future<Output = ()> + Send>>) -> anyhow::Result<()> {
        info!(poll_timeout_secs = self.poll_timeout_secs, "Polling for updates");
        let mut offset = 0i64;

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping poll loop");
                    break;
                }
                result = self.api.get_updates(offset, self.poll_timeout_secs) => {
                    match result {
                        Ok(updates) => {
                            for update in updates {
                                offset = next_offset(offset, update.update_id);
                                self.dispatch(update).await;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Poll failed, retrying");
                            tokio::time::sleep(POLL_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }

        self.drain_in_flight().await;
        Ok(())
    }

    /// Translate one update and hand it to the engine on its own task.
    async fn dispatch(&self, update: Update) {
        let update_id = update.update_id;
        let event = match self.api.event_from_update(update, &self.work).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(update_id, "Ignoring unhandled update");
                return;
            }
            Err(e) => {
                warn!(update_id, error = %e, "Failed to translate update");
                return;
            }
        };

        let engine = Arc::clone(&self.engine);
        let in_flight = Arc::clone(&self.in_flight);
        let task = tokio::spawn(async move {
            if let Err(e) = engine.handle_event(event).await {
                error!(update_id, error = %e, "Event handling failed");
            }
            in_flight.remove(&update_id);
        });
        self.in_flight.insert(update_id, task.abort_handle());
    }

    /// Wait for in-flight events to finish, aborting stragglers.
    async fn drain_in_flight(&self) {
        if self.in_flight.is_empty() {
            return;
        }
        info!(count = self.in_flight.len(), "Draining in-flight events");

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while !self.in_flight.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let stragglers = self.in_flight.len();
        if stragglers > 0 {
            warn!(count = stragglers, "Aborting events still in flight");
            for entry in self.in_flight.iter() {
                entry.value().abort();
            }
        }
    }
}

/// Advance the poll offset past a seen update.
fn next_offset(current: i64, update_id: i64) -> i64 {
    current.max(update_id + 1)
}
