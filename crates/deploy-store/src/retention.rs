use crate::backup::{BackupStatus, BackupStore};
use crate::layout::StateLayout;
use crate::StoreError;
use tracing::debug;

/// Age/count retention limits for backup artifacts.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Records older than this many days are pruned. 0 means prune all
    /// finalized records.
    pub max_age_days: u32,
    /// At most this many records are kept, oldest pruned first.
    pub max_count: u32,
}

#[derive(Debug, Default)]
pub struct PruneReport {
    pub expired: Vec<String>,
    pub over_cap: Vec<String>,
    pub removed: usize,
    pub skipped_pending: usize,
}

/// Sweeps backup records against a retention policy.
///
/// Pending records are never touched: an in-flight dump owns its record
/// until it is finalized. Everything else is fair game once it falls outside
/// the age threshold or the count cap, oldest first.
pub struct RetentionSweeper {
    layout: StateLayout,
}

impl RetentionSweeper {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn sweep(
        &self,
        instance: &str,
        policy: RetentionPolicy,
        dry_run: bool,
    ) -> Result<PruneReport, StoreError> {
        self.sweep_with_cancel(instance, policy, dry_run, || false)
    }

    pub fn sweep_with_cancel(
        &self,
        instance: &str,
        policy: RetentionPolicy,
        dry_run: bool,
        should_stop: impl Fn() -> bool,
    ) -> Result<PruneReport, StoreError> {
        let store = BackupStore::new(self.layout.clone());
        let records = store.list_for(instance)?;

        let mut report = PruneReport::default();
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(policy.max_age_days));

        // list_for returns oldest first; survivors counted from the newest end.
        let finalized: Vec<_> = records
            .iter()
            .filter(|r| r.status != BackupStatus::Pending)
            .collect();
        report.skipped_pending = records.len() - finalized.len();

        let keep_from = finalized.len().saturating_sub(policy.max_count as usize);

        for (i, record) in finalized.iter().enumerate() {
            // Unparseable timestamps are kept rather than silently deleted.
            let expired = chrono::DateTime::parse_from_rfc3339(&record.created_at)
                .map(|t| t.with_timezone(&chrono::Utc) < cutoff)
                .unwrap_or(false);
            if expired {
                report.expired.push(record.id.clone());
            } else if i < keep_from {
                report.over_cap.push(record.id.clone());
            }
        }

        if !dry_run {
            for id in report.expired.iter().chain(report.over_cap.iter()) {
                if should_stop() {
                    break;
                }
                debug!("pruning backup record {id}");
                store.remove(id)?;
                report.removed += 1;
            }
        }

        Ok(report)
    }
}
