use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};

use metadw::{MetaDw, SyncOptions, SyncOutcome, WinnersFilters};

#[derive(Parser)]
#[command(name = "metadw", about = "Meta Ads data warehouse CLI")]
struct Cli {
    /// Database path (default: ~/.metadw/metadw.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl metadw::SyncProgress for StderrProgress {
    fn on_accounts(&self, count: usize) {
        eprintln!("Found {count} ad accounts");
    }

    fn on_stage(&self, stage: &str, account: &str, index: usize, total: usize) {
        eprintln!("[{}/{}] Fetching {stage} for {account}...", index + 1, total);
    }

    fn on_account_skipped(&self, stage: &str, account: &str, reason: &str) {
        eprintln!("  Skipped {account} ({stage}): {reason}");
    }

    fn on_persisted(&self, kind: &str, rows: usize) {
        eprintln!("  Stored {rows} {kind} rows");
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sync campaign, budget and ad data from the Meta API
    Sync {
        /// Workspace id (default: 1)
        #[arg(long, default_value = "1")]
        workspace: i64,
        /// Access token (default: META_ACCESS_TOKEN or the stored credential)
        #[arg(long)]
        token: Option<String>,
        /// Re-fetch everything from the configured epoch
        #[arg(long)]
        full: bool,
        /// Skip the ad-level (winners) stage
        #[arg(long)]
        skip_ads: bool,
        /// Skip the budget stage
        #[arg(long)]
        skip_budgets: bool,
        /// Only refresh ad-level winners data
        #[arg(long)]
        winners_only: bool,
        /// Winners lookback in days (bounded by the platform cap)
        #[arg(long)]
        winners_days: Option<u32>,
        /// Explicit campaign backfill of the last N days
        #[arg(long)]
        days: Option<u32>,
        /// Restrict the sync to these account ids or names (repeatable)
        #[arg(long)]
        account: Vec<String>,
        /// Minimum ad spend kept by the winners stage
        #[arg(long)]
        min_spend: Option<f64>,
        /// Minimum ad ROAS kept by the winners stage
        #[arg(long)]
        min_roas: Option<f64>,
        /// Market allow-list for the winners stage (repeatable)
        #[arg(long)]
        market: Vec<String>,
        /// Product allow-list for the winners stage (repeatable)
        #[arg(long)]
        product: Vec<String>,
        /// Output the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Purge all synced data for a workspace and re-sync a bounded window
    Reset {
        #[arg(long, default_value = "1")]
        workspace: i64,
        #[arg(long)]
        token: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show recent sync runs
    Runs {
        #[arg(long, default_value = "1")]
        workspace: i64,
        #[arg(long, default_value = "5")]
        limit: u32,
        #[arg(long)]
        json: bool,
    },
    /// Show current campaign budgets
    Budgets {
        #[arg(long, default_value = "1")]
        workspace: i64,
        /// Filter by account name
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Aggregated reports from the local warehouse
    Report {
        #[command(subcommand)]
        target: ReportTarget,
    },
    /// Decode campaign/ad naming conventions
    Parse {
        #[command(subcommand)]
        target: ParseTarget,
    },
    /// Manage the stored Meta access token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Manage workspaces and members
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },
    /// Show warehouse status
    Status,
}

#[derive(Subcommand)]
enum ReportTarget {
    /// Spend by account, product and market over a window
    Spend {
        #[arg(long, default_value = "1")]
        workspace: i64,
        /// Window start (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// Window end (YYYY-MM-DD, default today)
        #[arg(long)]
        until: Option<String>,
        /// Window of the last N days (alternative to --since/--until)
        #[arg(long, default_value = "7")]
        days: u32,
        /// Filter by market code
        #[arg(long)]
        market: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Ads ranked by spend with derived ROAS/CTR
    Winners {
        #[arg(long, default_value = "1")]
        workspace: i64,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long, default_value = "7")]
        days: u32,
        #[arg(long)]
        market: Option<String>,
        /// Maximum rows shown
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ParseTarget {
    /// Parse a campaign name
    Campaign { name: String },
    /// Parse an ad name
    Ad { name: String },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store the access token for a workspace
    Set {
        #[arg(long, default_value = "1")]
        workspace: i64,
        token: String,
    },
    /// Clear the stored token
    Clear {
        #[arg(long, default_value = "1")]
        workspace: i64,
    },
    /// Show whether a token is stored
    Status {
        #[arg(long, default_value = "1")]
        workspace: i64,
    },
    /// Probe the Meta API with the resolved token
    Test {
        #[arg(long, default_value = "1")]
        workspace: i64,
        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkspaceAction {
    /// Create a workspace with an owning user
    Create {
        name: String,
        /// Owner user id
        #[arg(long)]
        owner: String,
    },
    /// List workspaces
    List,
    /// List members of a workspace
    Members {
        #[arg(long, default_value = "1")]
        workspace: i64,
    },
    /// Add or update a member (roles: owner, admin, member)
    AddMember {
        #[arg(long, default_value = "1")]
        workspace: i64,
        user: String,
        #[arg(long, default_value = "member")]
        role: String,
    },
    /// Remove a member (the last owner cannot be removed)
    RemoveMember {
        #[arg(long, default_value = "1")]
        workspace: i64,
        user: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        if let Some(app_err) = e.downcast_ref::<metadw::Error>() {
            if let Some(hint) = app_err.hint() {
                eprintln!("Hint: {hint}");
            }
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let db = match &cli.db {
        Some(path) => metadw::Database::open_at(path).await?,
        None => metadw::Database::open().await?,
    };
    let dw = MetaDw::new(db, metadw::UpstreamClient::new()?);

    match cli.command {
        Commands::Sync {
            workspace,
            token,
            full,
            skip_ads,
            skip_budgets,
            winners_only,
            winners_days,
            days,
            account,
            min_spend,
            min_roas,
            market,
            product,
            json,
        } => {
            let winners_filters =
                if min_spend.is_some() || min_roas.is_some() || !market.is_empty() || !product.is_empty() {
                    Some(WinnersFilters {
                        min_spend,
                        min_roas,
                        markets: if market.is_empty() { None } else { Some(market) },
                        products: if product.is_empty() { None } else { Some(product) },
                    })
                } else {
                    None
                };
            let options = SyncOptions {
                force_full: full,
                skip_ads,
                skip_budgets,
                winners_only,
                winners_days,
                campaign_days: days,
                accounts: if account.is_empty() { None } else { Some(account) },
                winners_filters,
                ..SyncOptions::default()
            };
            let outcome = dw
                .sync(workspace, token.as_deref(), &options, &StderrProgress)
                .await?;
            print_outcome(&outcome, json)?;
        }
        Commands::Reset { workspace, token, yes } => {
            if !yes {
                anyhow::bail!(
                    "reset deletes all synced data for workspace {workspace}; re-run with --yes to confirm"
                );
            }
            let outcome = dw
                .reset(workspace, token.as_deref(), &SyncOptions::default(), &StderrProgress)
                .await?;
            print_outcome(&outcome, false)?;
        }
        Commands::Runs { workspace, limit, json } => {
            let runs = dw.sync_runs(workspace, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else if runs.is_empty() {
                println!("No sync runs yet.");
            } else {
                for run in &runs {
                    let error = run.error_message.as_deref().unwrap_or("");
                    println!(
                        "#{} {} {}..{} [{}] {} campaigns {}",
                        run.id,
                        run.synced_at,
                        run.date_since,
                        run.date_until,
                        run.status.as_str(),
                        run.campaigns_count,
                        error
                    );
                }
            }
        }
        Commands::Budgets { workspace, account, json } => {
            let budgets = dw.budgets(workspace, account.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&budgets)?);
            } else if budgets.is_empty() {
                println!("No budgets synced. Run `metadw sync` first.");
            } else {
                for b in &budgets {
                    let budget = if b.daily_budget > 0.0 {
                        format!("{:.2}/day", b.daily_budget)
                    } else if b.lifetime_budget > 0.0 {
                        format!("{:.2} lifetime", b.lifetime_budget)
                    } else {
                        "-".to_string()
                    };
                    let serving = match b.has_active_ads {
                        Some(true) => "serving",
                        Some(false) => "no active ads",
                        None => "unknown",
                    };
                    println!("{} | {} | {budget} | {serving}", b.account_name, b.campaign_name);
                }
            }
        }
        Commands::Report { target } => handle_report(&dw, target).await?,
        Commands::Parse { target } => match target {
            ParseTarget::Campaign { name } => {
                let parsed = metadw::naming::parse_campaign_name(&name);
                println!("{}", serde_json::to_string_pretty(&parsed)?);
            }
            ParseTarget::Ad { name } => {
                let parsed = metadw::naming::parse_ad_name(&name);
                println!("{}", serde_json::to_string_pretty(&parsed)?);
            }
        },
        Commands::Token { action } => handle_token(&dw, action).await?,
        Commands::Workspace { action } => handle_workspace(&dw, action).await?,
        Commands::Status => {
            let workspaces = dw.list_workspaces().await?;
            for ws in &workspaces {
                let runs = dw.sync_runs(ws.id, 1).await?;
                match runs.first() {
                    Some(run) => println!(
                        "{} (#{}): last sync {} [{}], {} campaigns",
                        ws.name,
                        ws.id,
                        run.synced_at,
                        run.status.as_str(),
                        run.campaigns_count
                    ),
                    None => println!("{} (#{}): never synced", ws.name, ws.id),
                }
            }
        }
    }
    Ok(())
}

fn resolve_range(
    since: Option<&str>,
    until: Option<&str>,
    days: u32,
) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let today = chrono::Local::now().date_naive();
    let until = match until {
        Some(s) => metadw::date_util::parse_date(s)?,
        None => today,
    };
    let since = match since {
        Some(s) => metadw::date_util::parse_date(s)?,
        None => until - Duration::days(days.saturating_sub(1) as i64),
    };
    Ok((since, until))
}

async fn handle_report(dw: &MetaDw, target: ReportTarget) -> anyhow::Result<()> {
    match target {
        ReportTarget::Spend {
            workspace,
            since,
            until,
            days,
            market,
            json,
        } => {
            let (since, until) = resolve_range(since.as_deref(), until.as_deref(), days)?;
            let report = dw
                .spend_report(workspace, since, until, market.as_deref())
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Spend {since}..{until} ({} days)", report.days_in_range);
                println!(
                    "Total: {:.2} (daily budget {:.2}, period budget {:.2})",
                    report.total_spend, report.total_daily_budget, report.total_budget_period
                );
                println!("\nBy account:");
                for a in &report.by_account {
                    println!(
                        "  {} | spend {:.2} | budget {:.2}",
                        a.account_name, a.spend, a.budget_period
                    );
                }
                println!("\nBy product:");
                for p in &report.by_product {
                    println!("  {} | spend {:.2}", p.product, p.spend);
                }
                println!("\nBy market:");
                for m in &report.by_market {
                    println!("  {} | spend {:.2}", m.market, m.spend);
                }
            }
        }
        ReportTarget::Winners {
            workspace,
            since,
            until,
            days,
            market,
            limit,
            json,
        } => {
            let (since, until) = resolve_range(since.as_deref(), until.as_deref(), days)?;
            let rows = dw
                .winners(workspace, since, until, market.as_deref(), Some(limit))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No ad data in this window. Run `metadw sync` first.");
            } else {
                for w in &rows {
                    let roas = w
                        .roas
                        .map(|r| format!("{r:.2}"))
                        .unwrap_or_else(|| "-".to_string());
                    let ctr = w
                        .ctr
                        .map(|c| format!("{c:.1}%"))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "#{:<3} {} | {} | {} | spend {:.2} | roas {roas} | ctr {ctr}",
                        w.rank, w.ad_name, w.market, w.product, w.spend
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_token(dw: &MetaDw, action: TokenAction) -> anyhow::Result<()> {
    match action {
        TokenAction::Set { workspace, token } => {
            dw.set_credential(workspace, &token).await?;
            println!("Token stored for workspace {workspace}.");
        }
        TokenAction::Clear { workspace } => {
            dw.clear_credential(workspace).await?;
            println!("Token cleared for workspace {workspace}.");
        }
        TokenAction::Status { workspace } => {
            if dw.credential_configured(workspace).await? {
                println!("Token configured for workspace {workspace}.");
            } else {
                println!("No token configured for workspace {workspace}.");
            }
        }
        TokenAction::Test { workspace, token } => {
            let count = dw.test_credential(workspace, token.as_deref()).await?;
            println!("Token valid: {count} ad account(s) accessible.");
        }
    }
    Ok(())
}

async fn handle_workspace(dw: &MetaDw, action: WorkspaceAction) -> anyhow::Result<()> {
    match action {
        WorkspaceAction::Create { name, owner } => {
            let ws = dw.create_workspace(&name, &owner).await?;
            println!("Created workspace {} (#{})", ws.name, ws.id);
        }
        WorkspaceAction::List => {
            for ws in dw.list_workspaces().await? {
                println!("#{} {}", ws.id, ws.name);
            }
        }
        WorkspaceAction::Members { workspace } => {
            let members = dw.list_members(workspace).await?;
            if members.is_empty() {
                println!("No members.");
            } else {
                for m in &members {
                    println!("{} ({})", m.user_id, m.role);
                }
            }
        }
        WorkspaceAction::AddMember { workspace, user, role } => {
            dw.add_member(workspace, &user, &role).await?;
            println!("Added {user} to workspace {workspace}.");
        }
        WorkspaceAction::RemoveMember { workspace, user } => {
            if dw.remove_member(workspace, &user).await? {
                println!("Removed {user}.");
            } else {
                println!("Not a member: {user}");
            }
        }
    }
    Ok(())
}

fn print_outcome(outcome: &SyncOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    println!("Sync complete: {}..{}", outcome.since, outcome.until);
    println!(
        "  Mode:      {}{}",
        if outcome.incremental { "incremental" } else { "full" },
        if outcome.already_up_to_date { " (already up to date)" } else { "" }
    );
    println!("  Campaigns: {} rows", outcome.campaigns_count);
    println!("  Budgets:   {} rows", outcome.budgets_count);
    println!("  Ads:       {} rows", outcome.ads_count);
    Ok(())
}
