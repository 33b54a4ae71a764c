//! Snapshot job handoff.
//!
//! A cold project load hands the project to the out-of-band snapshot
//! job, which repopulates the snapshot-class caches (location context,
//! linked entities, document structure). The job itself runs in the
//! wider workspace service; this process only needs the handoff to
//! never block or fail a turn.

use stratagem_core::ontology::SnapshotScheduler;
use tracing::info;

/// Scheduler that records the handoff and returns immediately.
#[derive(Default)]
pub struct LoggingSnapshotScheduler;

impl LoggingSnapshotScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl SnapshotScheduler for LoggingSnapshotScheduler {
    fn schedule_project_snapshot(&self, project_id: &str) {
        info!(project_id, "project snapshot scheduled");
    }
}
