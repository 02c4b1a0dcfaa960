// On-demand scan trigger — runs the orchestrator on a background task.
//
// Only one run can be active at a time; `try_launch` returns AlreadyRunning
// while one is. The `watch` loop goes through the same trigger, so a timer
// tick that lands during a long run is dropped instead of stacking up.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::budget::TimeBudget;
use super::orchestrator::{RunSummary, ScanOrchestrator};

/// Live status of the background scan.
#[derive(Debug, Clone, Default)]
pub struct ScanStatus {
    /// True while a scan is in progress.
    pub running: bool,
    /// RFC 3339 timestamp of when the current/last scan started.
    pub started_at: Option<String>,
    /// Human-readable progress message updated as phases complete.
    pub progress_message: String,
    /// Error message from the last scan, if it failed.
    pub last_error: Option<String>,
    pub last_summary: Option<RunSummary>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("a scan is already running")]
    AlreadyRunning,
}

pub struct ScanTrigger {
    orchestrator: Arc<ScanOrchestrator>,
    status: Arc<RwLock<ScanStatus>>,
}

impl ScanTrigger {
    pub fn new(orchestrator: ScanOrchestrator) -> Self {
        let status = Arc::new(RwLock::new(ScanStatus::default()));

        // Progress is best-effort: a message is dropped if a reader holds the lock.
        let sink_status = status.clone();
        let orchestrator = orchestrator.with_progress_sink(Arc::new(move |message: &str| {
            if let Ok(mut s) = sink_status.try_write() {
                s.progress_message = message.to_string();
            }
        }));

        Self {
            orchestrator: Arc::new(orchestrator),
            status,
        }
    }

    pub async fn status(&self) -> ScanStatus {
        self.status.read().await.clone()
    }

    /// Start a run in the background with a fresh budget from the settings.
    pub async fn try_launch(&self) -> Result<JoinHandle<()>, TriggerError> {
        let budget = TimeBudget::from_settings(self.orchestrator.settings());
        self.try_launch_with(budget).await
    }

    pub async fn try_launch_with(&self, budget: TimeBudget) -> Result<JoinHandle<()>, TriggerError> {
        {
            let mut s = self.status.write().await;
            if s.running {
                return Err(TriggerError::AlreadyRunning);
            }
            s.running = true;
            s.started_at = Some(Utc::now().to_rfc3339());
            s.last_error = None;
            s.progress_message = "Starting scan…".to_string();
        }

        let orchestrator = self.orchestrator.clone();
        let status = self.status.clone();
        Ok(tokio::spawn(async move {
            let result = orchestrator.run(budget).await;

            let mut s = status.write().await;
            s.running = false;
            match result {
                Ok(summary) => {
                    s.last_summary = Some(summary);
                }
                Err(e) => {
                    error!(error = %e, "Background scan failed");
                    s.last_error = Some(format!("{e:#}"));
                    s.progress_message = "Scan failed, see logs".to_string();
                }
            }
        }))
    }

    /// Trigger a run every `every` until the task is cancelled.
    ///
    /// `on_finished` is called with the status after each run this loop started.
    pub async fn watch<F>(&self, every: Duration, on_finished: F)
    where
        F: Fn(&ScanStatus),
    {
        info!(interval_secs = every.as_secs(), "Starting scan scheduler");

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.try_launch().await {
                Ok(handle) => {
                    if let Err(e) = handle.await {
                        error!(error = %e, "Scan task panicked");
                    }
                    on_finished(&self.status().await);
                }
                Err(TriggerError::AlreadyRunning) => {
                    info!("Previous scan still running, skipping tick");
                }
            }
        }
    }
}
