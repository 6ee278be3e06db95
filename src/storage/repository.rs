use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Serialize;

use crate::sync::RunStatus;

const CREDENTIAL_KEY: &str = "meta_access_token";

// ── Sync runs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub id: i64,
    pub workspace_id: i64,
    pub synced_at: String,
    pub date_since: NaiveDate,
    pub date_until: NaiveDate,
    pub status: RunStatus,
    pub campaigns_count: i64,
    pub error_message: Option<String>,
}

pub fn create_sync_run(
    conn: &Connection,
    workspace_id: i64,
    since: NaiveDate,
    until: NaiveDate,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_runs (workspace_id, date_since, date_until, status, campaigns_count)
         VALUES (?1, ?2, ?3, 'running', 0)",
        params![workspace_id, since, until],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_sync_run(
    conn: &Connection,
    run_id: i64,
    status: RunStatus,
    campaigns_count: i64,
    error_message: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_runs SET
            status = ?2, campaigns_count = ?3, error_message = ?4,
            synced_at = datetime('now')
         WHERE id = ?1",
        params![run_id, status.as_str(), campaigns_count, error_message],
    )?;
    Ok(())
}

fn map_sync_run(row: &rusqlite::Row<'_>) -> Result<SyncRun, rusqlite::Error> {
    let status: String = row.get(5)?;
    Ok(SyncRun {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        synced_at: row.get(2)?,
        date_since: row.get(3)?,
        date_until: row.get(4)?,
        status: RunStatus::parse(&status),
        campaigns_count: row.get(6)?,
        error_message: row.get(7)?,
    })
}

const SYNC_RUN_COLS: &str =
    "id, workspace_id, synced_at, date_since, date_until, status, campaigns_count, error_message";

/// The most recent successful run; source of truth for "what window was
/// already synced".
pub fn latest_successful_run(
    conn: &Connection,
    workspace_id: i64,
) -> Result<Option<SyncRun>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {SYNC_RUN_COLS} FROM sync_runs
             WHERE workspace_id = ?1 AND status = 'success'
             ORDER BY synced_at DESC, id DESC LIMIT 1"
        ),
        params![workspace_id],
        map_sync_run,
    )
    .optional()
}

pub fn list_sync_runs(
    conn: &Connection,
    workspace_id: i64,
    limit: u32,
) -> Result<Vec<SyncRun>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SYNC_RUN_COLS} FROM sync_runs
         WHERE workspace_id = ?1
         ORDER BY synced_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![workspace_id, limit], map_sync_run)?;
    rows.collect()
}

// ── Campaign facts ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CampaignFact {
    pub account_id: String,
    pub account_name: String,
    pub campaign_id: String,
    pub campaign_name: String,
    pub date: NaiveDate,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub market: String,
    pub product: String,
    pub product_variant: String,
    pub variant: String,
    pub creative_type: String,
    pub raw_name: String,
    pub naming_date: String,
}

pub fn insert_campaign_facts(
    conn: &Connection,
    run_id: i64,
    workspace_id: i64,
    rows: &[CampaignFact],
) -> Result<(), rusqlite::Error> {
    let mut stmt = conn.prepare(
        "INSERT INTO campaign_facts (
            sync_run_id, workspace_id, account_id, account_name,
            campaign_id, campaign_name, date, spend, impressions, clicks,
            market, product, product_variant, variant, creative_type,
            raw_name, naming_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
    )?;
    for r in rows {
        stmt.execute(params![
            run_id,
            workspace_id,
            r.account_id,
            r.account_name,
            r.campaign_id,
            r.campaign_name,
            r.date,
            r.spend,
            r.impressions,
            r.clicks,
            r.market,
            r.product,
            r.product_variant,
            r.variant,
            r.creative_type,
            r.raw_name,
            r.naming_date,
        ])?;
    }
    Ok(())
}

/// Delete campaign facts from `since` onward, optionally limited to an
/// account subset so a targeted backfill cannot clobber other accounts'
/// history.
pub fn delete_campaign_facts_from(
    conn: &Connection,
    workspace_id: i64,
    since: NaiveDate,
    accounts: Option<&[String]>,
) -> Result<usize, rusqlite::Error> {
    delete_facts_from(conn, "campaign_facts", workspace_id, since, accounts)
}

/// Full truncate-and-insert for non-incremental runs.
pub fn replace_campaign_facts(
    conn: &Connection,
    run_id: i64,
    workspace_id: i64,
    rows: &[CampaignFact],
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "DELETE FROM campaign_facts WHERE workspace_id = ?1",
        params![workspace_id],
    )?;
    insert_campaign_facts(conn, run_id, workspace_id, rows)
}

fn map_campaign_fact(row: &rusqlite::Row<'_>) -> Result<CampaignFact, rusqlite::Error> {
    Ok(CampaignFact {
        account_id: row.get(0)?,
        account_name: row.get(1)?,
        campaign_id: row.get(2)?,
        campaign_name: row.get(3)?,
        date: row.get(4)?,
        spend: row.get(5)?,
        impressions: row.get(6)?,
        clicks: row.get(7)?,
        market: row.get(8)?,
        product: row.get(9)?,
        product_variant: row.get(10)?,
        variant: row.get(11)?,
        creative_type: row.get(12)?,
        raw_name: row.get(13)?,
        naming_date: row.get(14)?,
    })
}

const CAMPAIGN_FACT_COLS: &str = "account_id, account_name, campaign_id, campaign_name, date, \
     spend, impressions, clicks, market, product, product_variant, variant, creative_type, \
     raw_name, naming_date";

/// Campaign facts in [since, until], de-duplicated to the most recently
/// written row per (account, campaign, day). Incremental writes are
/// insert-only, so duplicates can exist transiently.
pub fn campaign_facts_in_range(
    conn: &Connection,
    workspace_id: i64,
    since: NaiveDate,
    until: NaiveDate,
    market: Option<&str>,
) -> Result<Vec<CampaignFact>, rusqlite::Error> {
    let base = format!(
        "SELECT {CAMPAIGN_FACT_COLS} FROM campaign_facts
         WHERE workspace_id = ?1 AND date >= ?2 AND date <= ?3
           AND id IN (
               SELECT MAX(id) FROM campaign_facts WHERE workspace_id = ?1
               GROUP BY account_id, campaign_id, date
           )"
    );
    if let Some(market) = market {
        let mut stmt = conn.prepare(&format!(
            "{base} AND market = ?4 ORDER BY campaign_name, date DESC, spend DESC"
        ))?;
        let rows = stmt.query_map(
            params![workspace_id, since, until, market],
            map_campaign_fact,
        )?;
        rows.collect()
    } else {
        let mut stmt =
            conn.prepare(&format!("{base} ORDER BY campaign_name, date DESC, spend DESC"))?;
        let rows = stmt.query_map(params![workspace_id, since, until], map_campaign_fact)?;
        rows.collect()
    }
}

pub fn count_campaign_facts_on(
    conn: &Connection,
    workspace_id: i64,
    date: NaiveDate,
) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM campaign_facts WHERE workspace_id = ?1 AND date = ?2",
        params![workspace_id, date],
        |row| row.get(0),
    )
}

pub fn distinct_account_names(
    conn: &Connection,
    workspace_id: i64,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT account_name FROM campaign_facts
         WHERE workspace_id = ?1 AND account_name IS NOT NULL AND account_name != ''
         ORDER BY account_name",
    )?;
    let rows = stmt.query_map(params![workspace_id], |row| row.get(0))?;
    rows.collect()
}

// ── Ad facts ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AdFact {
    pub ad_id: String,
    pub ad_name: String,
    pub account_id: String,
    pub account_name: String,
    pub campaign_id: Option<String>,
    pub date: NaiveDate,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    pub purchase_count: i64,
    pub purchase_value: f64,
}

pub fn insert_ad_facts(
    conn: &Connection,
    run_id: i64,
    workspace_id: i64,
    rows: &[AdFact],
) -> Result<(), rusqlite::Error> {
    let mut stmt = conn.prepare(
        "INSERT INTO ad_facts (
            sync_run_id, workspace_id, ad_id, ad_name, account_id, account_name,
            campaign_id, date, spend, impressions, clicks, purchase_count, purchase_value
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    for r in rows {
        stmt.execute(params![
            run_id,
            workspace_id,
            r.ad_id,
            r.ad_name,
            r.account_id,
            r.account_name,
            r.campaign_id,
            r.date,
            r.spend,
            r.impressions,
            r.clicks,
            r.purchase_count,
            r.purchase_value,
        ])?;
    }
    Ok(())
}

pub fn delete_ad_facts_from(
    conn: &Connection,
    workspace_id: i64,
    since: NaiveDate,
    accounts: Option<&[String]>,
) -> Result<usize, rusqlite::Error> {
    delete_facts_from(conn, "ad_facts", workspace_id, since, accounts)
}

pub fn replace_ad_facts(
    conn: &Connection,
    run_id: i64,
    workspace_id: i64,
    rows: &[AdFact],
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "DELETE FROM ad_facts WHERE workspace_id = ?1",
        params![workspace_id],
    )?;
    insert_ad_facts(conn, run_id, workspace_id, rows)
}

/// Ad facts in [since, until], de-duplicated to the most recently written
/// row per (account, ad, day).
pub fn ad_facts_in_range(
    conn: &Connection,
    workspace_id: i64,
    since: NaiveDate,
    until: NaiveDate,
) -> Result<Vec<AdFact>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT ad_id, ad_name, account_id, account_name, campaign_id, date,
                spend, impressions, clicks, purchase_count, purchase_value
         FROM ad_facts
         WHERE workspace_id = ?1 AND date >= ?2 AND date <= ?3
           AND id IN (
               SELECT MAX(id) FROM ad_facts WHERE workspace_id = ?1
               GROUP BY account_id, ad_id, date
           )
         ORDER BY spend DESC",
    )?;
    let rows = stmt.query_map(params![workspace_id, since, until], |row| {
        Ok(AdFact {
            ad_id: row.get(0)?,
            ad_name: row.get(1)?,
            account_id: row.get(2)?,
            account_name: row.get(3)?,
            campaign_id: row.get(4)?,
            date: row.get(5)?,
            spend: row.get(6)?,
            impressions: row.get(7)?,
            clicks: row.get(8)?,
            purchase_count: row.get(9)?,
            purchase_value: row.get(10)?,
        })
    })?;
    rows.collect()
}

fn delete_facts_from(
    conn: &Connection,
    table: &str,
    workspace_id: i64,
    since: NaiveDate,
    accounts: Option<&[String]>,
) -> Result<usize, rusqlite::Error> {
    match accounts {
        None | Some([]) => conn.execute(
            &format!("DELETE FROM {table} WHERE workspace_id = ?1 AND date >= ?2"),
            params![workspace_id, since],
        ),
        Some(ids) => {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "DELETE FROM {table} WHERE workspace_id = ?1 AND date >= ?2
                 AND account_id IN ({placeholders})"
            );
            let mut args: Vec<&dyn ToSql> = vec![&workspace_id, &since];
            for id in ids {
                args.push(id);
            }
            conn.execute(&sql, args.as_slice())
        }
    }
}

// ── Campaign budgets ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct BudgetRow {
    pub account_id: String,
    pub account_name: String,
    pub campaign_id: String,
    pub campaign_name: String,
    pub daily_budget: f64,
    pub lifetime_budget: f64,
    pub effective_status: Option<String>,
    pub has_active_ads: Option<bool>,
}

/// Replace the budget row for each (workspace, account, campaign) key.
///
/// Delete-then-insert rather than ON CONFLICT: the uniqueness constraint is
/// not assumed to exist on every installation's schema. Safe to call
/// repeatedly with identical input.
pub fn upsert_budgets(
    conn: &Connection,
    workspace_id: i64,
    rows: &[BudgetRow],
) -> Result<(), rusqlite::Error> {
    let mut delete = conn.prepare(
        "DELETE FROM campaign_budgets
         WHERE workspace_id = ?1 AND account_id = ?2 AND campaign_id = ?3",
    )?;
    let mut insert = conn.prepare(
        "INSERT INTO campaign_budgets (
            workspace_id, account_id, account_name, campaign_id, campaign_name,
            daily_budget, lifetime_budget, effective_status, has_active_ads, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))",
    )?;
    for r in rows {
        delete.execute(params![workspace_id, r.account_id, r.campaign_id])?;
        insert.execute(params![
            workspace_id,
            r.account_id,
            r.account_name,
            r.campaign_id,
            r.campaign_name,
            r.daily_budget,
            r.lifetime_budget,
            r.effective_status,
            r.has_active_ads.map(|b| b as i64),
        ])?;
    }
    Ok(())
}

pub fn list_budgets(
    conn: &Connection,
    workspace_id: i64,
    account_name: Option<&str>,
) -> Result<Vec<BudgetRow>, rusqlite::Error> {
    let base = "SELECT account_id, account_name, campaign_id, campaign_name,
                daily_budget, lifetime_budget, effective_status, has_active_ads
         FROM campaign_budgets
         WHERE workspace_id = ?1 AND (effective_status = 'ACTIVE' OR effective_status IS NULL)";
    let map = |row: &rusqlite::Row<'_>| {
        Ok(BudgetRow {
            account_id: row.get(0)?,
            account_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            campaign_id: row.get(2)?,
            campaign_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            daily_budget: row.get(4)?,
            lifetime_budget: row.get(5)?,
            effective_status: row.get(6)?,
            has_active_ads: row.get::<_, Option<i64>>(7)?.map(|v| v != 0),
        })
    };
    if let Some(account) = account_name {
        let mut stmt =
            conn.prepare(&format!("{base} AND account_name = ?2 ORDER BY campaign_name"))?;
        let rows = stmt.query_map(params![workspace_id, account], map)?;
        rows.collect()
    } else {
        let mut stmt = conn.prepare(&format!("{base} ORDER BY account_name, campaign_name"))?;
        let rows = stmt.query_map(params![workspace_id], map)?;
        rows.collect()
    }
}

/// Daily-budget-equivalent per account, keyed by both account name and id.
/// Lifetime-budgeted campaigns contribute `lifetime / 30` per day so totals
/// stay comparable across campaigns.
pub fn budgets_by_account(
    conn: &Connection,
    workspace_id: i64,
) -> Result<HashMap<String, f64>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT account_id, account_name,
                SUM(CASE WHEN daily_budget > 0 THEN daily_budget
                         ELSE lifetime_budget / 30.0 END) AS budget
         FROM campaign_budgets
         WHERE workspace_id = ?1 AND (effective_status = 'ACTIVE' OR effective_status IS NULL)
         GROUP BY account_id, account_name",
    )?;
    let rows = stmt.query_map(params![workspace_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, f64>(2)?,
        ))
    })?;
    let mut map = HashMap::new();
    for row in rows {
        let (account_id, account_name, budget) = row?;
        if let Some(name) = account_name.filter(|n| !n.is_empty()) {
            map.insert(name, budget);
        }
        map.insert(account_id, budget);
    }
    Ok(map)
}

// ── Workspaces & members ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    LastOwner,
}

pub fn create_workspace(conn: &Connection, name: &str) -> Result<Workspace, rusqlite::Error> {
    conn.execute("INSERT INTO workspaces (name) VALUES (?1)", params![name])?;
    Ok(Workspace {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
    })
}

pub fn list_workspaces(conn: &Connection) -> Result<Vec<Workspace>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT id, name FROM workspaces ORDER BY created_at, id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Workspace {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    rows.collect()
}

pub fn workspace_name(conn: &Connection, id: i64) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT name FROM workspaces WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()
}

fn normalize_role(role: &str) -> &'static str {
    match role {
        "owner" => "owner",
        "admin" => "admin",
        _ => "member",
    }
}

pub fn add_member(
    conn: &Connection,
    workspace_id: i64,
    user_id: &str,
    role: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO workspace_members (workspace_id, user_id, role)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(workspace_id, user_id) DO UPDATE SET role = excluded.role",
        params![workspace_id, user_id, normalize_role(role)],
    )?;
    Ok(())
}

pub fn member_role(
    conn: &Connection,
    workspace_id: i64,
    user_id: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT role FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
        params![workspace_id, user_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn list_members(
    conn: &Connection,
    workspace_id: i64,
) -> Result<Vec<Member>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT user_id, role FROM workspace_members
         WHERE workspace_id = ?1
         ORDER BY role = 'owner' DESC, user_id",
    )?;
    let rows = stmt.query_map(params![workspace_id], |row| {
        Ok(Member {
            user_id: row.get(0)?,
            role: row.get(1)?,
        })
    })?;
    rows.collect()
}

/// Remove a member, refusing to remove the workspace's last owner.
pub fn remove_member(
    conn: &Connection,
    workspace_id: i64,
    user_id: &str,
) -> Result<RemoveOutcome, rusqlite::Error> {
    let owners: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT user_id FROM workspace_members WHERE workspace_id = ?1 AND role = 'owner'",
        )?;
        let rows = stmt.query_map(params![workspace_id], |row| row.get(0))?;
        rows.collect::<Result<_, _>>()?
    };
    if owners.len() == 1 && owners[0] == user_id {
        return Ok(RemoveOutcome::LastOwner);
    }
    let n = conn.execute(
        "DELETE FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
        params![workspace_id, user_id],
    )?;
    Ok(if n > 0 {
        RemoveOutcome::Removed
    } else {
        RemoveOutcome::NotFound
    })
}

/// Delete all facts, budgets and sync runs for a workspace. Credentials
/// and membership are kept so a resync can follow immediately.
pub fn purge_workspace(conn: &Connection, workspace_id: i64) -> Result<(), rusqlite::Error> {
    for table in ["campaign_facts", "ad_facts", "campaign_budgets", "sync_runs"] {
        conn.execute(
            &format!("DELETE FROM {table} WHERE workspace_id = ?1"),
            params![workspace_id],
        )?;
    }
    Ok(())
}

// ── Credentials ────────────────────────────────────────────────────

pub fn get_credential(
    conn: &Connection,
    workspace_id: i64,
) -> Result<Option<String>, rusqlite::Error> {
    let value: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM settings WHERE workspace_id = ?1 AND key = ?2",
            params![workspace_id, CREDENTIAL_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value
        .flatten()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

/// Store the workspace credential; `None` clears it. Rotation is a plain
/// overwrite, no versioning.
pub fn set_credential(
    conn: &Connection,
    workspace_id: i64,
    token: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO settings (workspace_id, key, value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(workspace_id, key) DO UPDATE SET
           value = excluded.value, updated_at = excluded.updated_at",
        params![workspace_id, CREDENTIAL_KEY, token.map(str::trim)],
    )?;
    Ok(())
}
