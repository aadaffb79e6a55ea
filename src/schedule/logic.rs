// mysqlbackup/src/schedule/logic.rs
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backup::BackupPipeline;
use crate::backup::db_dump::Dumper;
use crate::backup::s3_upload::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Terminated,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub runs: usize,
    pub succeeded: usize,
    pub failed: usize,
}

fn transition(state: &mut LoopState, next: LoopState) {
    tracing::debug!(from = ?*state, to = ?next, "Scheduler state change");
    *state = next;
}

/// Runs one backup per trigger until `shutdown` fires or the trigger source
/// goes away. Runs never overlap, and a failed run is logged and the loop
/// carries on. Shutdown during a run cancels that run; its temporary files
/// are still removed.
pub async fn run_scheduled<D: Dumper, S: ObjectStore>(
    pipeline: &BackupPipeline<D, S>,
    mut triggers: mpsc::Receiver<()>,
    shutdown: CancellationToken,
) -> LoopSummary {
    let database = pipeline.config().db.name.as_str();
    let mut state = LoopState::Idle;
    let mut summary = LoopSummary::default();
    tracing::info!(database, "Waiting for scheduled backups");

    loop {
        let trigger = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            trigger = triggers.recv() => trigger,
        };
        if trigger.is_none() {
            break;
        }

        transition(&mut state, LoopState::Running);
        summary.runs += 1;
        match pipeline.run(&shutdown).await {
            Ok(_) => summary.succeeded += 1,
            Err(_) => {
                // Already logged by the pipeline with stage and cause.
                summary.failed += 1;
                if !shutdown.is_cancelled() {
                    tracing::warn!(database, run = summary.runs, "Scheduled backup failed, waiting for next trigger");
                }
            }
        }
        transition(&mut state, LoopState::Idle);
    }

    transition(&mut state, LoopState::Terminated);
    tracing::info!(
        database,
        runs = summary.runs,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Scheduler stopped"
    );
    summary
}
