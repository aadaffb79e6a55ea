// mysqlbackup/src/schedule/trigger.rs
use chrono::Local;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::errors::{AppError, Result};

/// When scheduled backups fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Six-field cron expression (seconds first), evaluated in local time so
    /// it agrees with the date stamped into backup file names.
    Cron(String),
    /// Fixed period between triggers.
    Every(Duration),
}

impl Schedule {
    /// Accepts `every N <unit>`, `hourly`/`daily`/`weekly`, or a cron
    /// expression with 5 or 6 fields.
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = expression.trim().to_ascii_lowercase();
        let invalid = |why: &str| {
            AppError::config(format!("Invalid schedule expression '{}': {}", expression.trim(), why))
        };

        match normalized.as_str() {
            "" => return Err(invalid("expression is empty")),
            "hourly" => return Ok(Schedule::Cron("0 0 * * * *".to_string())),
            "daily" => return Ok(Schedule::Cron("0 0 0 * * *".to_string())),
            "weekly" => return Ok(Schedule::Cron("0 0 0 * * SUN".to_string())),
            _ => {}
        }

        if let Some(rest) = normalized.strip_prefix("every ") {
            let words: Vec<&str> = rest.split_whitespace().collect();
            let (count, unit) = match words.as_slice() {
                [unit] => (1, *unit),
                [count, unit] => (
                    count
                        .parse::<u64>()
                        .map_err(|_| invalid("interval count must be a positive integer"))?,
                    *unit,
                ),
                _ => return Err(invalid("expected 'every [N] <unit>'")),
            };
            if count == 0 {
                return Err(invalid("interval count must be at least 1"));
            }
            let unit_secs = match unit.trim_end_matches('s') {
                "second" => 1,
                "minute" => 60,
                "hour" => 60 * 60,
                "day" => 24 * 60 * 60,
                _ => return Err(invalid("unit must be seconds, minutes, hours or days")),
            };
            let secs = count
                .checked_mul(unit_secs)
                .ok_or_else(|| invalid("interval is too large"))?;
            return Ok(Schedule::Every(Duration::from_secs(secs)));
        }

        let fields: Vec<&str> = expression.split_whitespace().collect();
        let cron = match fields.len() {
            6 => fields.join(" "),
            5 => format!("0 {}", fields.join(" ")),
            n => return Err(invalid(&format!("cron expression needs 5 or 6 fields, got {}", n))),
        };
        // Same parser the scheduler uses.
        Job::new_tz(cron.as_str(), Local, |_uuid, _lock| {})
            .map_err(|e| invalid(&format!("not a valid cron expression ({})", e)))?;
        Ok(Schedule::Cron(cron))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Cron(expr) => write!(f, "cron '{}'", expr),
            Schedule::Every(period) => write!(f, "every {}s", period.as_secs()),
        }
    }
}

/// Hands out at most one pending trigger; firings while one is already
/// queued are dropped.
#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<()>,
}

/// Creates a trigger channel with a queue depth of one.
pub fn trigger_channel() -> (TriggerSender, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (TriggerSender { tx }, rx)
}

impl TriggerSender {
    /// Returns `true` if the trigger was queued.
    pub fn fire(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => {
                tracing::debug!("Backup trigger queued");
                true
            }
            Err(TrySendError::Full(())) => {
                tracing::debug!("Backup still running with a trigger pending, skipping this one");
                false
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}

/// Cron scheduler producing backup triggers.
pub struct CronTrigger {
    scheduler: JobScheduler,
}

impl fmt::Debug for CronTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronTrigger").finish()
    }
}

impl CronTrigger {
    /// Registers the schedule and starts firing into the returned receiver.
    pub async fn start(schedule: &Schedule) -> Result<(Self, mpsc::Receiver<()>)> {
        let (sender, triggers) = trigger_channel();

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::config(format!("Failed to create scheduler: {}", e)))?;

        let job = match schedule {
            Schedule::Cron(expr) => Job::new_async_tz(expr.as_str(), Local, move |_uuid, _lock| {
                let sender = sender.clone();
                Box::pin(async move {
                    sender.fire();
                })
            }),
            Schedule::Every(period) => Job::new_repeated_async(*period, move |_uuid, _lock| {
                let sender = sender.clone();
                Box::pin(async move {
                    sender.fire();
                })
            }),
        }
        .map_err(|e| AppError::config(format!("Invalid backup schedule {}: {}", schedule, e)))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::config(format!("Failed to add backup schedule: {}", e)))?;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::config(format!("Failed to start scheduler: {}", e)))?;

        tracing::info!(%schedule, "Backup schedule registered");
        Ok((CronTrigger { scheduler }, triggers))
    }

    pub async fn shutdown(mut self) {
        match self.scheduler.shutdown().await {
            Ok(()) => tracing::info!("Cron scheduler shut down"),
            Err(e) => tracing::warn!(error = %e, "Failed to shut down cron scheduler"),
        }
    }
}
