pub mod orchestrator;
pub mod planner;
pub mod rate_limit;

use chrono::NaiveDate;
use serde::Serialize;

/// Lifecycle of a sync run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => RunStatus::Running,
            "success" => RunStatus::Success,
            _ => RunStatus::Error,
        }
    }
}

/// Tunable window constants. The upstream platform finalizes same-day and
/// previous-day numbers with delay, hence the trailing backfill overlap.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Cap on the very first fetch for a workspace.
    pub first_sync_days: u32,
    /// Days before today re-fetched on every incremental run.
    pub backfill_days: u32,
    /// Hard cap on the winners-only lookback.
    pub winners_max_days: u32,
    /// Winners-only lookback when the caller gives none.
    pub winners_default_days: u32,
    /// Cap on an explicit `campaign_days` backfill.
    pub backfill_cap_days: u32,
    /// Epoch for forced-full syncs.
    pub full_since: NaiveDate,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            first_sync_days: 30,
            backfill_days: 2,
            winners_max_days: 60,
            winners_default_days: 30,
            backfill_cap_days: 90,
            full_since: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        }
    }
}

/// Row filters applied to the ads stage before persistence.
#[derive(Debug, Clone, Default)]
pub struct WinnersFilters {
    pub min_spend: Option<f64>,
    pub min_roas: Option<f64>,
    /// Market allow-list (codes, case-insensitive).
    pub markets: Option<Vec<String>>,
    /// Product allow-list (matched on the normalized product key).
    pub products: Option<Vec<String>>,
}

/// Options controlling one sync invocation.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Re-fetch from the configured epoch instead of incrementally.
    pub force_full: bool,
    pub skip_ads: bool,
    pub skip_budgets: bool,
    /// Only refresh ad-level winners data, over a bounded window.
    pub winners_only: bool,
    pub winners_days: Option<u32>,
    /// Explicit campaign backfill of the last N days.
    pub campaign_days: Option<u32>,
    /// Restrict every stage to these account ids.
    pub accounts: Option<Vec<String>>,
    pub winners_filters: Option<WinnersFilters>,
    /// Override "today" (reporting timezone). Tests inject this; the CLI
    /// leaves it unset.
    pub today: Option<NaiveDate>,
    pub config: SyncConfig,
}

/// Summary returned to the caller after a completed sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub campaigns_count: usize,
    pub budgets_count: usize,
    pub ads_count: usize,
    pub incremental: bool,
    pub already_up_to_date: bool,
    pub since: NaiveDate,
    pub until: NaiveDate,
}

/// Progress callbacks for long-running syncs.
pub trait SyncProgress {
    fn on_accounts(&self, _count: usize) {}
    fn on_stage(&self, _stage: &str, _account: &str, _index: usize, _total: usize) {}
    fn on_account_skipped(&self, _stage: &str, _account: &str, _reason: &str) {}
    fn on_persisted(&self, _kind: &str, _rows: usize) {}
}

/// Progress reporter that does nothing.
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_round_trip() {
        for status in [RunStatus::Running, RunStatus::Success, RunStatus::Error] {
            assert_eq!(RunStatus::parse(status.as_str()), status);
        }
        // Unknown strings degrade to Error, never panic
        assert_eq!(RunStatus::parse("partial"), RunStatus::Error);
    }
}
