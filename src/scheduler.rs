//! Background loop that re-runs every enabled source on an interval.
//!
//! ```text
//! Idle ──start()──▶ Waiting(interval) ──▶ Running ──▶ Waiting(interval) ──▶ …
//! ```
//!
//! A scheduler without an interval (ingestion disabled, no schedule, or an
//! unsupported schedule string) never leaves `Idle`. Failed passes are
//! logged and the loop keeps going; it stops only with the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ragbox_core::schedule::parse_schedule;

use crate::config::IngestionConfig;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Waiting,
    Running,
}

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Option<Duration>,
    state: Arc<watch::Sender<SchedulerState>>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Option<Duration>) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            orchestrator,
            interval,
            state: Arc::new(state),
        }
    }

    /// Build from the `[ingestion]` section.
    pub fn from_config(orchestrator: Arc<Orchestrator>, config: &IngestionConfig) -> Self {
        let interval = if !config.enabled {
            None
        } else {
            config.schedule.as_deref().and_then(|s| match parse_schedule(s) {
                Ok(interval) => Some(interval),
                Err(e) => {
                    error!(schedule = s, error = %e, "unsupported schedule; scheduler stays idle");
                    None
                }
            })
        };
        Self::new(orchestrator, interval)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Spawn the loop. Returns `None`, leaving the scheduler idle, when
    /// there is no interval.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let Some(interval) = self.interval else {
            info!("no ingestion schedule; scheduler idle");
            return None;
        };

        let orchestrator = self.orchestrator.clone();
        let state = self.state.clone();
        info!(interval_secs = interval.as_secs(), "scheduler started");

        Some(tokio::spawn(async move {
            loop {
                let next = chrono::Duration::from_std(interval)
                    .ok()
                    .and_then(|d| chrono::Utc::now().checked_add_signed(d));
                orchestrator.set_next_run(next).await;
                state.send_replace(SchedulerState::Waiting);

                tokio::time::sleep(interval).await;

                state.send_replace(SchedulerState::Running);
                let results = orchestrator.run_all().await;
                let failed = results.iter().filter(|r| !r.is_success()).count();
                if failed > 0 {
                    warn!(failed, total = results.len(), "scheduled pass had failing sources");
                } else {
                    info!(total = results.len(), "scheduled pass complete");
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use ragbox_core::index::memory::MemoryIndexer;
    use ragbox_core::registry::memory::InMemoryRegistry;
    use ragbox_core::SyncEngine;

    use super::*;

    fn orchestrator() -> Arc<Orchestrator> {
        let engine = SyncEngine::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(MemoryIndexer::new()),
        );
        Arc::new(Orchestrator::new(Arc::new(engine), Vec::new()))
    }

    fn ingestion(enabled: bool, schedule: Option<&str>) -> IngestionConfig {
        IngestionConfig {
            enabled,
            schedule: schedule.map(str::to_string),
            on_startup: false,
        }
    }

    #[tokio::test]
    async fn stays_idle_without_usable_schedule() {
        for config in [
            ingestion(true, None),
            ingestion(false, Some("5m")),
            ingestion(true, Some("*/7 * * * *")),
        ] {
            let scheduler = Scheduler::from_config(orchestrator(), &config);
            assert!(scheduler.start().is_none());
            assert_eq!(scheduler.state(), SchedulerState::Idle);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loop_runs_after_each_interval() {
        let orch = orchestrator();
        let scheduler = Scheduler::from_config(orch.clone(), &ingestion(true, Some("1m")));
        assert_eq!(scheduler.interval(), Some(Duration::from_secs(60)));

        let mut states = scheduler.subscribe();
        let handle = scheduler.start().unwrap();
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), SchedulerState::Waiting);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.state(), SchedulerState::Waiting);
        assert!(orch.status().await.next_scheduled_run.is_some());
        assert!(orch.status().await.last_run.is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(orch.status().await.last_run.is_some());
        assert_eq!(scheduler.state(), SchedulerState::Waiting);

        handle.abort();
    }
}
