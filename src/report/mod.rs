use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::date_util::days_in_range;
use crate::error::Result;
use crate::naming::parse_ad_name;
use crate::storage::repository::{self, CampaignFact};
use crate::storage::Database;
use crate::sync::orchestrator::roas;

/// Spend aggregated per account, with the budget context needed to compare
/// actual spend against plan.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSpend {
    pub account_id: String,
    pub account_name: String,
    pub spend: f64,
    pub impressions: i64,
    pub daily_budget: f64,
    /// Daily budget scaled to the reporting window.
    pub budget_period: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductSpend {
    pub product: String,
    pub spend: f64,
    pub impressions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketSpend {
    pub market: String,
    pub spend: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpendReport {
    pub campaigns: Vec<CampaignFact>,
    pub by_account: Vec<AccountSpend>,
    pub by_product: Vec<ProductSpend>,
    pub by_market: Vec<MarketSpend>,
    /// Every account name seen in the warehouse, filters included or not.
    pub accounts: Vec<String>,
    pub total_spend: f64,
    pub days_in_range: i64,
    pub total_daily_budget: f64,
    pub total_budget_period: f64,
}

/// Build the spend report for a window from stored (deduplicated) facts.
pub async fn spend_report(
    db: &Database,
    workspace_id: i64,
    since: NaiveDate,
    until: NaiveDate,
    market: Option<&str>,
) -> Result<SpendReport> {
    let market_owned = market.map(|s| s.to_uppercase());
    let (campaigns, budgets, accounts) = db
        .reader()
        .call(move |conn| {
            let campaigns = repository::campaign_facts_in_range(
                conn,
                workspace_id,
                since,
                until,
                market_owned.as_deref(),
            )?;
            let budgets = repository::budgets_by_account(conn, workspace_id)?;
            let accounts = repository::distinct_account_names(conn, workspace_id)?;
            Ok::<_, rusqlite::Error>((campaigns, budgets, accounts))
        })
        .await?;

    let days = days_in_range(since, until);

    let mut by_account: HashMap<String, AccountSpend> = HashMap::new();
    let mut by_product: HashMap<String, ProductSpend> = HashMap::new();
    let mut by_market: HashMap<String, MarketSpend> = HashMap::new();
    let mut total_spend = 0.0;

    for row in &campaigns {
        total_spend += row.spend;

        let acc_key = if row.account_name.is_empty() {
            row.account_id.clone()
        } else {
            row.account_name.clone()
        };
        let daily_budget = budgets.get(&acc_key).copied().unwrap_or(0.0);
        let acc = by_account.entry(acc_key).or_insert_with(|| AccountSpend {
            account_id: row.account_id.clone(),
            account_name: row.account_name.clone(),
            spend: 0.0,
            impressions: 0,
            daily_budget,
            budget_period: round2(daily_budget * days as f64),
        });
        acc.spend += row.spend;
        acc.impressions += row.impressions;

        let prod_key = if row.product_variant.is_empty() {
            row.product.clone()
        } else {
            row.product_variant.clone()
        };
        let prod = by_product.entry(prod_key.clone()).or_insert(ProductSpend {
            product: prod_key,
            spend: 0.0,
            impressions: 0,
        });
        prod.spend += row.spend;
        prod.impressions += row.impressions;

        let market_key = if row.market.is_empty() {
            "Unknown".to_string()
        } else {
            row.market.clone()
        };
        let mkt = by_market.entry(market_key.clone()).or_insert(MarketSpend {
            market: market_key,
            spend: 0.0,
        });
        mkt.spend += row.spend;
    }

    let mut by_account: Vec<AccountSpend> = by_account.into_values().collect();
    by_account.sort_by(|a, b| b.spend.total_cmp(&a.spend));
    let mut by_product: Vec<ProductSpend> = by_product.into_values().collect();
    by_product.sort_by(|a, b| b.spend.total_cmp(&a.spend));
    let mut by_market: Vec<MarketSpend> = by_market.into_values().collect();
    by_market.sort_by(|a, b| b.spend.total_cmp(&a.spend));

    let total_daily_budget: f64 = by_account.iter().map(|a| a.daily_budget).sum();

    Ok(SpendReport {
        campaigns,
        by_account,
        by_product,
        by_market,
        accounts,
        total_spend: round2(total_spend),
        days_in_range: days,
        total_daily_budget: round2(total_daily_budget),
        total_budget_period: round2(total_daily_budget * days as f64),
    })
}

/// One ad in the winners ranking.
#[derive(Debug, Clone, Serialize)]
pub struct WinnerRow {
    pub rank: usize,
    pub ad_id: String,
    pub ad_name: String,
    pub market: String,
    pub product: String,
    pub format: String,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub purchase_count: i64,
    pub purchase_value: f64,
    /// Purchase value ÷ spend; None when spend is zero.
    pub roas: Option<f64>,
    /// Clicks ÷ impressions as a percentage; None without impressions.
    pub ctr: Option<f64>,
}

/// Rank ads by spend over a window, aggregating the per-day rows per ad and
/// deriving ROAS/CTR at read time.
pub async fn winners(
    db: &Database,
    workspace_id: i64,
    since: NaiveDate,
    until: NaiveDate,
    market: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<WinnerRow>> {
    let rows = db
        .reader()
        .call(move |conn| repository::ad_facts_in_range(conn, workspace_id, since, until))
        .await?;

    struct Acc {
        ad_name: String,
        spend: f64,
        impressions: i64,
        clicks: i64,
        purchase_count: i64,
        purchase_value: f64,
    }

    let mut by_ad: HashMap<String, Acc> = HashMap::new();
    for row in rows {
        let key = if row.ad_id.is_empty() {
            row.ad_name.clone()
        } else {
            row.ad_id.clone()
        };
        let acc = by_ad.entry(key).or_insert(Acc {
            ad_name: row.ad_name.clone(),
            spend: 0.0,
            impressions: 0,
            clicks: 0,
            purchase_count: 0,
            purchase_value: 0.0,
        });
        acc.spend += row.spend;
        acc.impressions += row.impressions;
        acc.clicks += row.clicks;
        acc.purchase_count += row.purchase_count;
        acc.purchase_value += row.purchase_value;
    }

    let target_market = market.map(|m| m.to_uppercase());
    let mut ranked: Vec<WinnerRow> = by_ad
        .into_iter()
        .map(|(ad_id, acc)| {
            let parsed = parse_ad_name(&acc.ad_name);
            WinnerRow {
                rank: 0,
                ad_id,
                market: parsed.market.to_uppercase(),
                product: if parsed.product.is_empty() {
                    "Other".to_string()
                } else {
                    parsed.product
                },
                format: parsed.format,
                ad_name: acc.ad_name,
                spend: round2(acc.spend),
                impressions: acc.impressions,
                clicks: acc.clicks,
                purchase_count: acc.purchase_count,
                purchase_value: round2(acc.purchase_value),
                roas: roas(acc.spend, acc.purchase_value).map(round2),
                ctr: if acc.impressions > 0 {
                    Some(round2(acc.clicks as f64 / acc.impressions as f64 * 100.0))
                } else {
                    None
                },
            }
        })
        .filter(|w| match &target_market {
            Some(m) => &w.market == m,
            None => true,
        })
        .collect();

    ranked.sort_by(|a, b| b.spend.total_cmp(&a.spend));
    if let Some(limit) = limit {
        ranked.truncate(limit);
    }
    for (i, w) in ranked.iter_mut().enumerate() {
        w.rank = i + 1;
    }
    Ok(ranked)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
