use chrono::{Duration, NaiveDate};

use crate::storage::repository::SyncRun;
use crate::sync::{SyncConfig, SyncOptions};

/// The window a sync invocation should fetch, and how to persist it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePlan {
    pub since: NaiveDate,
    pub until: NaiveDate,
    /// Delete-then-insert for the window only; otherwise replace-all.
    pub incremental: bool,
    /// No new days since the last successful run; the trailing window is
    /// still re-fetched because upstream finalizes recent days late.
    pub already_up_to_date: bool,
}

/// Decide the [since, until] window for a sync invocation.
///
/// `until` is always today (date-only, reporting timezone; the caller
/// injects it). Priority: winners-only > explicit backfill > forced full >
/// first sync > incremental continuation.
pub fn plan_range(
    today: NaiveDate,
    last_success: Option<&SyncRun>,
    options: &SyncOptions,
    config: &SyncConfig,
) -> RangePlan {
    let until = today;

    if options.winners_only {
        let requested = options.winners_days.unwrap_or(config.winners_default_days);
        let days = requested.min(config.winners_max_days);
        return RangePlan {
            since: until - Duration::days(days as i64),
            until,
            incremental: false,
            already_up_to_date: false,
        };
    }

    if let Some(days) = options.campaign_days {
        let days = days.clamp(1, config.backfill_cap_days);
        return RangePlan {
            since: until - Duration::days(days as i64 - 1),
            until,
            incremental: true,
            already_up_to_date: false,
        };
    }

    if options.force_full {
        return RangePlan {
            since: config.full_since,
            until,
            incremental: false,
            already_up_to_date: false,
        };
    }

    let last_until = match last_success {
        Some(run) => run.date_until,
        // First sync for this workspace: bounded, replace-all
        None => {
            return RangePlan {
                since: until - Duration::days(config.first_sync_days as i64),
                until,
                incremental: false,
                already_up_to_date: false,
            }
        }
    };

    let next_since = last_until + Duration::days(1);
    let backfill_start = until - Duration::days(config.backfill_days as i64);

    if next_since > until {
        // Nothing new, but re-fetch the trailing window anyway
        return RangePlan {
            since: backfill_start,
            until,
            incremental: true,
            already_up_to_date: true,
        };
    }

    RangePlan {
        since: next_since.min(backfill_start),
        until,
        incremental: true,
        already_up_to_date: false,
    }
}

/// The bounded window used when escalating out of an already-up-to-date
/// plan because storage turned out to be empty (table cleared externally),
/// and for the resync after a workspace reset.
pub fn first_sync_plan(today: NaiveDate, config: &SyncConfig) -> RangePlan {
    RangePlan {
        since: today - Duration::days(config.first_sync_days as i64),
        until: today,
        incremental: false,
        already_up_to_date: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::RunStatus;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn success_run(since: NaiveDate, until: NaiveDate) -> SyncRun {
        SyncRun {
            id: 1,
            workspace_id: 1,
            synced_at: "2025-06-10 08:00:00".to_string(),
            date_since: since,
            date_until: until,
            status: RunStatus::Success,
            campaigns_count: 10,
            error_message: None,
        }
    }

    #[test]
    fn test_first_sync_is_bounded_replace_all() {
        let plan = plan_range(d(2025, 6, 12), None, &SyncOptions::default(), &SyncConfig::default());
        assert_eq!(plan.since, d(2025, 5, 13)); // today - 30
        assert_eq!(plan.until, d(2025, 6, 12));
        assert!(!plan.incremental);
        assert!(!plan.already_up_to_date);
    }

    #[test]
    fn test_steady_incremental_overlaps_trailing_window() {
        let last = success_run(d(2025, 6, 1), d(2025, 6, 10));
        let plan = plan_range(
            d(2025, 6, 12),
            Some(&last),
            &SyncOptions::default(),
            &SyncConfig::default(),
        );
        // next_since would be 06-11 but the 2-day trailing backfill pulls
        // the start back to 06-10
        assert_eq!(plan.since, d(2025, 6, 10));
        assert_eq!(plan.until, d(2025, 6, 12));
        assert!(plan.incremental);
        assert!(!plan.already_up_to_date);
    }

    #[test]
    fn test_range_monotonicity_without_backfill() {
        let config = SyncConfig {
            backfill_days: 0,
            ..SyncConfig::default()
        };
        let last = success_run(d(2025, 6, 1), d(2025, 6, 10));
        let plan = plan_range(d(2025, 6, 12), Some(&last), &SyncOptions::default(), &config);
        // Exactly last until + 1 day
        assert_eq!(plan.since, d(2025, 6, 11));
        assert!(plan.incremental);
    }

    #[test]
    fn test_up_to_date_still_refetches_trailing_window() {
        let last = success_run(d(2025, 6, 1), d(2025, 6, 12));
        let plan = plan_range(
            d(2025, 6, 12),
            Some(&last),
            &SyncOptions::default(),
            &SyncConfig::default(),
        );
        assert!(plan.already_up_to_date);
        assert!(plan.incremental);
        assert_eq!(plan.since, d(2025, 6, 10));
        assert_eq!(plan.until, d(2025, 6, 12));
    }

    #[test]
    fn test_winners_days_capped() {
        let options = SyncOptions {
            winners_only: true,
            winners_days: Some(90),
            ..SyncOptions::default()
        };
        let plan = plan_range(d(2025, 6, 12), None, &options, &SyncConfig::default());
        // Requested 90, platform capped at 60
        assert_eq!(plan.since, d(2025, 6, 12) - Duration::days(60));
        assert!(!plan.incremental);
    }

    #[test]
    fn test_winners_default_days() {
        let options = SyncOptions {
            winners_only: true,
            ..SyncOptions::default()
        };
        let last = success_run(d(2025, 6, 1), d(2025, 6, 10));
        let plan = plan_range(d(2025, 6, 12), Some(&last), &options, &SyncConfig::default());
        // Winners mode ignores the campaign history entirely
        assert_eq!(plan.since, d(2025, 6, 12) - Duration::days(30));
        assert!(!plan.incremental);
        assert!(!plan.already_up_to_date);
    }

    #[test]
    fn test_explicit_backfill_capped_and_incremental() {
        let options = SyncOptions {
            campaign_days: Some(365),
            ..SyncOptions::default()
        };
        // Even with a prior run, explicit backfill wins and stays incremental
        let last = success_run(d(2025, 6, 1), d(2025, 6, 10));
        let plan = plan_range(d(2025, 6, 12), Some(&last), &options, &SyncConfig::default());
        assert_eq!(plan.since, d(2025, 6, 12) - Duration::days(89)); // 90 days inclusive
        assert!(plan.incremental);
    }

    #[test]
    fn test_explicit_backfill_small_window() {
        let options = SyncOptions {
            campaign_days: Some(7),
            ..SyncOptions::default()
        };
        let plan = plan_range(d(2025, 6, 12), None, &options, &SyncConfig::default());
        assert_eq!(plan.since, d(2025, 6, 6));
        assert_eq!(plan.until, d(2025, 6, 12));
        assert!(plan.incremental);
    }

    #[test]
    fn test_forced_full_uses_epoch() {
        let options = SyncOptions {
            force_full: true,
            ..SyncOptions::default()
        };
        let last = success_run(d(2025, 6, 1), d(2025, 6, 10));
        let plan = plan_range(d(2025, 6, 12), Some(&last), &options, &SyncConfig::default());
        assert_eq!(plan.since, d(2025, 1, 1));
        assert!(!plan.incremental);
    }

    #[test]
    fn test_first_sync_plan_escalation_window() {
        let plan = first_sync_plan(d(2025, 6, 12), &SyncConfig::default());
        assert_eq!(plan.since, d(2025, 5, 13));
        assert!(!plan.incremental);
        assert!(!plan.already_up_to_date);
    }

    #[test]
    fn test_sequential_runs_never_regress() {
        // Simulate a run every day; each plan starts at most backfill_days
        // before the previous until and never re-requests a window entirely
        // before it.
        let config = SyncConfig::default();
        let mut last = success_run(d(2025, 6, 1), d(2025, 6, 10));
        for offset in 1..5 {
            let today = d(2025, 6, 10) + Duration::days(offset);
            let plan = plan_range(today, Some(&last), &SyncOptions::default(), &config);
            assert!(plan.since >= last.date_until - Duration::days(config.backfill_days as i64));
            assert_eq!(plan.until, today);
            last = success_run(plan.since, plan.until);
        }
    }
}
