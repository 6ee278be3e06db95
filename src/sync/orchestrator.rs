use crate::client::{Account, AdInsight, UpstreamClient};
use crate::error::{Error, Result};
use crate::naming::{self, parse_ad_name, parse_campaign_name};
use crate::storage::repository::{self, AdFact, BudgetRow, CampaignFact};
use crate::storage::Database;
use crate::sync::planner::{self, RangePlan};
use crate::sync::rate_limit::retry_api;
use crate::sync::{RunStatus, SyncOptions, SyncOutcome, SyncProgress, WinnersFilters};

/// Drive one end-to-end synchronization for a workspace: plan the window,
/// fetch accounts, fetch campaign/budget/ad data per account, persist, and
/// record the outcome on a sync-run row.
///
/// A single account's upstream failure is logged and skipped; an expired
/// credential or any failure of the account-list call aborts the run. The
/// run record is finalized to success or error in every case.
pub async fn run_sync(
    db: &Database,
    client: &UpstreamClient,
    token: &str,
    workspace_id: i64,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncOutcome> {
    let today = options
        .today
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let last_success = db
        .reader()
        .call(move |conn| repository::latest_successful_run(conn, workspace_id))
        .await?;

    let mut plan = planner::plan_range(today, last_success.as_ref(), options, &options.config);

    // An up-to-date plan assumes the trailing window is already in storage.
    // If today's rows are gone (table cleared externally), fall back to a
    // bounded first-sync window instead of patching a hole.
    if plan.already_up_to_date && !options.winners_only {
        let today_rows = db
            .reader()
            .call(move |conn| repository::count_campaign_facts_on(conn, workspace_id, today))
            .await?;
        if today_rows == 0 {
            log::info!(
                "workspace {workspace_id}: no stored rows for {today}, escalating to a full first-sync window"
            );
            plan = planner::first_sync_plan(today, &options.config);
        }
    }

    let run_id = {
        let (since, until) = (plan.since, plan.until);
        db.writer()
            .call(move |conn| repository::create_sync_run(conn, workspace_id, since, until))
            .await?
    };

    match sync_stages(db, client, token, workspace_id, run_id, &plan, options, progress).await {
        Ok(outcome) => {
            let count = outcome.campaigns_count as i64;
            db.writer()
                .call(move |conn| {
                    repository::update_sync_run(conn, run_id, RunStatus::Success, count, None)
                })
                .await?;
            Ok(outcome)
        }
        Err(e) => {
            let message = e.to_string();
            let finalize = db
                .writer()
                .call(move |conn| {
                    repository::update_sync_run(conn, run_id, RunStatus::Error, 0, Some(&message))
                })
                .await;
            if let Err(update_err) = finalize {
                log::error!("failed to record sync error on run {run_id}: {update_err}");
            }
            Err(e)
        }
    }
}

/// Purge all facts, budgets and sync runs for the workspace, then run a
/// fresh bounded non-incremental sync. Recovery path for corrupted or
/// cross-tenant-contaminated history.
pub async fn reset_and_resync(
    db: &Database,
    client: &UpstreamClient,
    token: &str,
    workspace_id: i64,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncOutcome> {
    db.writer()
        .call(move |conn| repository::purge_workspace(conn, workspace_id))
        .await?;
    log::info!("workspace {workspace_id}: purged, starting resync");

    // With the sync history gone the planner falls back to the bounded
    // first-sync window on its own.
    let mut fresh = options.clone();
    fresh.force_full = false;
    fresh.campaign_days = None;
    fresh.winners_only = false;
    run_sync(db, client, token, workspace_id, &fresh, progress).await
}

#[allow(clippy::too_many_arguments)]
async fn sync_stages(
    db: &Database,
    client: &UpstreamClient,
    token: &str,
    workspace_id: i64,
    run_id: i64,
    plan: &RangePlan,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncOutcome> {
    // The account list is resolved once and held fixed for all stages.
    // Any failure here aborts: nothing else can proceed without it.
    let accounts = client.ad_accounts_cached(token, workspace_id).await?;
    let accounts = filter_accounts(accounts, options.accounts.as_deref());
    progress.on_accounts(accounts.len());

    let mut campaigns_count = 0;
    let mut budgets_count = 0;
    let mut ads_count = 0;

    if !options.winners_only {
        let facts = fetch_campaign_facts(client, token, &accounts, plan, progress).await?;
        campaigns_count = facts.len();
        persist_campaign_facts(db, workspace_id, run_id, plan, options, facts).await?;
        progress.on_persisted("campaigns", campaigns_count);
    }

    if !options.winners_only && !options.skip_budgets {
        let rows = fetch_budgets(client, token, &accounts, progress).await?;
        budgets_count = rows.len();
        db.writer()
            .call(move |conn| repository::upsert_budgets(conn, workspace_id, &rows))
            .await?;
        progress.on_persisted("budgets", budgets_count);
    }

    if options.winners_only || !options.skip_ads {
        let facts = fetch_ad_facts(client, token, &accounts, plan, options, progress).await?;
        ads_count = facts.len();
        persist_ad_facts(db, workspace_id, run_id, plan, options, facts).await?;
        progress.on_persisted("ads", ads_count);
    }

    Ok(SyncOutcome {
        success: true,
        campaigns_count,
        budgets_count,
        ads_count,
        incremental: plan.incremental,
        already_up_to_date: plan.already_up_to_date,
        since: plan.since,
        until: plan.until,
    })
}

fn filter_accounts(accounts: Vec<Account>, filter: Option<&[String]>) -> Vec<Account> {
    match filter {
        None => accounts,
        Some([]) => accounts,
        Some(wanted) => accounts
            .into_iter()
            .filter(|a| {
                wanted
                    .iter()
                    .any(|w| w == &a.id || w.eq_ignore_ascii_case(&a.name))
            })
            .collect(),
    }
}

/// Decide per-account failure handling: an expired credential makes every
/// further call fail, so it aborts; anything else skips the account.
fn account_failure(stage: &str, account: &Account, e: Error) -> Result<()> {
    match e {
        Error::AuthExpired => Err(Error::AuthExpired),
        other => {
            log::warn!("{stage}: skipping account {} ({}): {other}", account.name, account.id);
            Ok(())
        }
    }
}

async fn fetch_campaign_facts(
    client: &UpstreamClient,
    token: &str,
    accounts: &[Account],
    plan: &RangePlan,
    progress: &dyn SyncProgress,
) -> Result<Vec<CampaignFact>> {
    let mut facts = Vec::new();
    let total = accounts.len();
    for (i, acc) in accounts.iter().enumerate() {
        progress.on_stage("campaigns", &acc.name, i, total);
        let insights =
            match retry_api!(client.campaign_insights(token, &acc.id, plan.since, plan.until)) {
                Ok(rows) => rows,
                Err(e) => {
                    progress.on_account_skipped("campaigns", &acc.name, &e.to_string());
                    account_failure("campaigns", acc, e)?;
                    continue;
                }
            };
        for row in insights {
            let date = match row.day() {
                Some(d) => d,
                None => continue,
            };
            let name = row.campaign_name.clone().unwrap_or_default();
            let parsed = parse_campaign_name(&name);
            let market = if parsed.market.is_empty() {
                naming::market_from_account(&acc.name)
            } else {
                parsed.market.clone()
            };
            facts.push(CampaignFact {
                account_id: acc.id.clone(),
                account_name: acc.name.clone(),
                campaign_id: row.campaign_id.unwrap_or_default(),
                campaign_name: name,
                date,
                spend: row.spend,
                impressions: row.impressions,
                clicks: row.clicks,
                market,
                product: parsed.product,
                product_variant: parsed.product_variant,
                variant: parsed.variant,
                creative_type: parsed.creative_type,
                raw_name: parsed.raw,
                naming_date: parsed.naming_date,
            });
        }
    }
    Ok(facts)
}

async fn persist_campaign_facts(
    db: &Database,
    workspace_id: i64,
    run_id: i64,
    plan: &RangePlan,
    options: &SyncOptions,
    facts: Vec<CampaignFact>,
) -> Result<()> {
    let incremental = plan.incremental;
    let since = plan.since;
    let account_filter = options.accounts.clone();
    db.writer()
        .call(move |conn| {
            if incremental {
                // Empty fetches do not clear the window
                if !facts.is_empty() {
                    repository::delete_campaign_facts_from(
                        conn,
                        workspace_id,
                        since,
                        account_filter.as_deref(),
                    )?;
                    repository::insert_campaign_facts(conn, run_id, workspace_id, &facts)?;
                }
            } else {
                repository::replace_campaign_facts(conn, run_id, workspace_id, &facts)?;
            }
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
    Ok(())
}

async fn fetch_budgets(
    client: &UpstreamClient,
    token: &str,
    accounts: &[Account],
    progress: &dyn SyncProgress,
) -> Result<Vec<BudgetRow>> {
    let mut rows = Vec::new();
    let total = accounts.len();
    for (i, acc) in accounts.iter().enumerate() {
        progress.on_stage("budgets", &acc.name, i, total);
        let metadata = match retry_api!(client.campaign_metadata(token, &acc.id)) {
            Ok(rows) => rows,
            Err(e) => {
                progress.on_account_skipped("budgets", &acc.name, &e.to_string());
                account_failure("budgets", acc, e)?;
                continue;
            }
        };

        // Non-fatal annotation: which campaigns currently have a serving ad
        let active = match client.active_ad_campaigns(token, &acc.id).await {
            Ok(set) => Some(set),
            Err(Error::AuthExpired) => return Err(Error::AuthExpired),
            Err(e) => {
                log::warn!(
                    "budgets: active-ads lookup failed for {}, leaving annotation empty: {e}",
                    acc.name
                );
                None
            }
        };

        for meta in metadata {
            rows.push(BudgetRow {
                account_id: acc.id.clone(),
                account_name: acc.name.clone(),
                campaign_name: meta.name.clone().unwrap_or_else(|| meta.id.clone()),
                daily_budget: meta.daily_budget / 100.0,
                lifetime_budget: meta.lifetime_budget / 100.0,
                effective_status: meta.effective_status.clone(),
                has_active_ads: active.as_ref().map(|set| set.contains(&meta.id)),
                campaign_id: meta.id,
            });
        }
    }
    Ok(rows)
}

async fn fetch_ad_facts(
    client: &UpstreamClient,
    token: &str,
    accounts: &[Account],
    plan: &RangePlan,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<Vec<AdFact>> {
    let mut facts = Vec::new();
    let total = accounts.len();
    for (i, acc) in accounts.iter().enumerate() {
        progress.on_stage("ads", &acc.name, i, total);
        let insights = match retry_api!(client.ad_insights(token, &acc.id, plan.since, plan.until))
        {
            Ok(rows) => rows,
            Err(e) => {
                progress.on_account_skipped("ads", &acc.name, &e.to_string());
                account_failure("ads", acc, e)?;
                continue;
            }
        };
        for row in insights {
            if let Some(fact) = ad_fact_from_insight(acc, row) {
                facts.push(fact);
            }
        }
    }

    if let Some(filters) = &options.winners_filters {
        let before = facts.len();
        facts.retain(|f| passes_winners_filters(f, filters));
        log::debug!("winners filters kept {}/{before} ad rows", facts.len());
    }
    Ok(facts)
}

fn ad_fact_from_insight(acc: &Account, row: AdInsight) -> Option<AdFact> {
    let date = row.day()?;
    let ad_id = row.ad_id.clone().unwrap_or_default();
    let ad_name = row
        .ad_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| if ad_id.is_empty() { "-".to_string() } else { ad_id.clone() });
    Some(AdFact {
        purchase_count: row.purchase_count(),
        purchase_value: row.purchase_value(),
        ad_id,
        ad_name,
        account_id: acc.id.clone(),
        account_name: acc.name.clone(),
        campaign_id: row.campaign_id,
        date,
        spend: row.spend,
        impressions: row.impressions,
        clicks: row.clicks,
    })
}

/// Row-level winners filters, applied before persistence to cut write
/// volume. ROAS is undefined when spend is zero; such rows fail a minimum
/// ROAS requirement.
fn passes_winners_filters(fact: &AdFact, filters: &WinnersFilters) -> bool {
    if let Some(min_spend) = filters.min_spend {
        if fact.spend < min_spend {
            return false;
        }
    }
    if let Some(min_roas) = filters.min_roas {
        match roas(fact.spend, fact.purchase_value) {
            Some(r) if r >= min_roas => {}
            _ => return false,
        }
    }
    if let Some(markets) = &filters.markets {
        let market = parse_ad_name(&fact.ad_name).market;
        let market = if market.is_empty() {
            naming::market_from_account(&fact.account_name)
        } else {
            market
        };
        if !markets.iter().any(|m| m.eq_ignore_ascii_case(&market)) {
            return false;
        }
    }
    if let Some(products) = &filters.products {
        let product = naming::normalize_product_key(&parse_ad_name(&fact.ad_name).product);
        if !products
            .iter()
            .any(|p| naming::normalize_product_key(p) == product)
        {
            return false;
        }
    }
    true
}

/// Return on ad spend; undefined when spend is zero.
pub fn roas(spend: f64, purchase_value: f64) -> Option<f64> {
    if spend > 0.0 {
        Some(purchase_value / spend)
    } else {
        None
    }
}

async fn persist_ad_facts(
    db: &Database,
    workspace_id: i64,
    run_id: i64,
    plan: &RangePlan,
    options: &SyncOptions,
    facts: Vec<AdFact>,
) -> Result<()> {
    let incremental = plan.incremental;
    let since = plan.since;
    let account_filter = options.accounts.clone();
    db.writer()
        .call(move |conn| {
            if incremental {
                if !facts.is_empty() {
                    repository::delete_ad_facts_from(
                        conn,
                        workspace_id,
                        since,
                        account_filter.as_deref(),
                    )?;
                    repository::insert_ad_facts(conn, run_id, workspace_id, &facts)?;
                }
            } else {
                repository::replace_ad_facts(conn, run_id, workspace_id, &facts)?;
            }
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn account(id: &str, name: &str) -> Account {
        Account {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    fn fact(ad_name: &str, spend: f64, purchase_value: f64) -> AdFact {
        AdFact {
            ad_id: "a1".to_string(),
            ad_name: ad_name.to_string(),
            account_id: "act_1".to_string(),
            account_name: "VELUNAPETS SI COD $".to_string(),
            campaign_id: None,
            date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            spend,
            impressions: 1000,
            clicks: 50,
            purchase_count: 1,
            purchase_value,
        }
    }

    #[test]
    fn test_roas_undefined_without_spend() {
        assert_eq!(roas(50.0, 150.0), Some(3.0));
        assert_eq!(roas(0.0, 150.0), None);
    }

    #[test]
    fn test_filter_accounts_by_id_or_name() {
        let accounts = vec![
            account("act_1", "VELUNAPETS SI COD $"),
            account("act_2", "VELUNAPETS SK COD $"),
            account("act_3", "VELUNAPETS HU COD $"),
        ];
        let filter = vec!["act_1".to_string(), "velunapets sk cod $".to_string()];
        let kept = filter_accounts(accounts.clone(), Some(filter.as_slice()));
        assert_eq!(kept.len(), 2);

        assert_eq!(filter_accounts(accounts.clone(), None).len(), 3);
        assert_eq!(filter_accounts(accounts, Some(&[][..])).len(), 3);
    }

    #[test]
    fn test_winners_filter_min_spend_and_roas() {
        let filters = WinnersFilters {
            min_spend: Some(20.0),
            min_roas: Some(2.0),
            ..WinnersFilters::default()
        };
        assert!(passes_winners_filters(
            &fact("1_SI_SMART_BALL_BASIC_VIDEO_4x5", 50.0, 150.0),
            &filters
        ));
        // Below spend floor
        assert!(!passes_winners_filters(
            &fact("1_SI_SMART_BALL_BASIC_VIDEO_4x5", 10.0, 100.0),
            &filters
        ));
        // ROAS too low
        assert!(!passes_winners_filters(
            &fact("1_SI_SMART_BALL_BASIC_VIDEO_4x5", 50.0, 60.0),
            &filters
        ));
        // Zero spend → ROAS undefined → fails a min-ROAS requirement
        assert!(!passes_winners_filters(
            &fact("1_SI_SMART_BALL_BASIC_VIDEO_4x5", 0.0, 60.0),
            &filters
        ));
    }

    #[test]
    fn test_winners_filter_market_allow_list() {
        let filters = WinnersFilters {
            markets: Some(vec!["si".to_string()]),
            ..WinnersFilters::default()
        };
        assert!(passes_winners_filters(
            &fact("1_SI_SMART_BALL_BASIC_VIDEO_4x5", 5.0, 0.0),
            &filters
        ));
        assert!(!passes_winners_filters(
            &fact("1_SK_SMART_BALL_BASIC_VIDEO_4x5", 5.0, 0.0),
            &filters
        ));
        // Unparseable ad name falls back to the account-name market (SI)
        assert!(passes_winners_filters(&fact("retarget", 5.0, 0.0), &filters));
    }

    #[test]
    fn test_winners_filter_product_allow_list_normalizes() {
        let filters = WinnersFilters {
            products: Some(vec!["smartball".to_string()]),
            ..WinnersFilters::default()
        };
        assert!(passes_winners_filters(
            &fact("1_SI_SMART_BALL_BASIC_VIDEO_4x5", 5.0, 0.0),
            &filters
        ));
        assert!(!passes_winners_filters(
            &fact("1_SI_PAW_TRIMMER_BASIC_VIDEO_4x5", 5.0, 0.0),
            &filters
        ));
    }

    #[test]
    fn test_ad_fact_from_insight_requires_date() {
        let acc = account("act_1", "VELUNAPETS SI COD $");
        let row: AdInsight = serde_json::from_str(r#"{"ad_id": "a1", "spend": "5"}"#).unwrap();
        assert!(ad_fact_from_insight(&acc, row).is_none());

        let row: AdInsight =
            serde_json::from_str(r#"{"ad_id": "a1", "spend": "5", "date_start": "2025-06-10"}"#)
                .unwrap();
        let fact = ad_fact_from_insight(&acc, row).unwrap();
        // Missing name falls back to the ad id
        assert_eq!(fact.ad_name, "a1");
        assert_eq!(fact.spend, 5.0);
    }
}
