pub mod client;
pub mod date_util;
pub mod error;
pub mod naming;
pub mod report;
pub mod storage;
pub mod sync;

pub use client::UpstreamClient;
pub use error::{Error, Result};
pub use report::{SpendReport, WinnerRow};
pub use storage::repository::{BudgetRow, CampaignFact, Member, SyncRun, Workspace};
pub use storage::Database;
pub use sync::{
    NoopProgress, RunStatus, SyncConfig, SyncOptions, SyncOutcome, SyncProgress, WinnersFilters,
};

use chrono::NaiveDate;

use storage::repository;
use sync::orchestrator;

/// Environment variable consulted when no explicit or stored credential is
/// available.
const TOKEN_ENV: &str = "META_ACCESS_TOKEN";

/// Main entry point for the Meta Ads data warehouse.
pub struct MetaDw {
    db: Database,
    client: UpstreamClient,
}

impl MetaDw {
    pub fn new(db: Database, client: UpstreamClient) -> Self {
        Self { db, client }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Resolve the credential used for upstream calls: an explicit token
    /// wins, then the `META_ACCESS_TOKEN` environment variable, then the
    /// workspace's stored credential.
    pub async fn resolve_token(
        &self,
        workspace_id: i64,
        explicit: Option<&str>,
    ) -> Result<String> {
        if let Some(token) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            let token = token.trim().to_string();
            if !token.is_empty() {
                return Ok(token);
            }
        }
        let stored = self
            .db
            .reader()
            .call(move |conn| repository::get_credential(conn, workspace_id))
            .await?;
        stored.ok_or(Error::CredentialMissing)
    }

    // ── Sync ───────────────────────────────────────────────────────

    /// Run one synchronization for a workspace. See
    /// [`sync::orchestrator::run_sync`] for the stage semantics.
    pub async fn sync(
        &self,
        workspace_id: i64,
        token: Option<&str>,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<SyncOutcome> {
        let token = self.resolve_token(workspace_id, token).await?;
        orchestrator::run_sync(&self.db, &self.client, &token, workspace_id, options, progress)
            .await
    }

    /// Purge all synced data for a workspace and immediately re-sync a
    /// bounded window. Recovery path for corrupted history.
    pub async fn reset(
        &self,
        workspace_id: i64,
        token: Option<&str>,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<SyncOutcome> {
        let token = self.resolve_token(workspace_id, token).await?;
        orchestrator::reset_and_resync(
            &self.db,
            &self.client,
            &token,
            workspace_id,
            options,
            progress,
        )
        .await
    }

    // ── Credentials ────────────────────────────────────────────────

    pub async fn set_credential(&self, workspace_id: i64, token: &str) -> Result<()> {
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(Error::Config("empty token".into()));
        }
        self.db
            .writer()
            .call(move |conn| repository::set_credential(conn, workspace_id, Some(&token)))
            .await
            .map_err(Into::into)
    }

    pub async fn clear_credential(&self, workspace_id: i64) -> Result<()> {
        self.db
            .writer()
            .call(move |conn| repository::set_credential(conn, workspace_id, None))
            .await
            .map_err(Into::into)
    }

    pub async fn credential_configured(&self, workspace_id: i64) -> Result<bool> {
        let stored = self
            .db
            .reader()
            .call(move |conn| repository::get_credential(conn, workspace_id))
            .await?;
        Ok(stored.is_some())
    }

    /// Probe the upstream platform with the workspace credential and report
    /// how many ad accounts it can reach.
    pub async fn test_credential(
        &self,
        workspace_id: i64,
        token: Option<&str>,
    ) -> Result<usize> {
        let token = self.resolve_token(workspace_id, token).await?;
        let accounts = self.client.ad_accounts(&token).await?;
        Ok(accounts.len())
    }

    // ── Workspaces ─────────────────────────────────────────────────

    pub async fn create_workspace(&self, name: &str, owner: &str) -> Result<Workspace> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Config("workspace name required".into()));
        }
        let owner = owner.to_string();
        self.db
            .writer()
            .call(move |conn| {
                let ws = repository::create_workspace(conn, &name)?;
                repository::add_member(conn, ws.id, &owner, "owner")?;
                Ok::<_, rusqlite::Error>(ws)
            })
            .await
            .map_err(Into::into)
    }

    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        self.db
            .reader()
            .call(|conn| repository::list_workspaces(conn))
            .await
            .map_err(Into::into)
    }

    pub async fn list_members(&self, workspace_id: i64) -> Result<Vec<Member>> {
        self.db
            .reader()
            .call(move |conn| repository::list_members(conn, workspace_id))
            .await
            .map_err(Into::into)
    }

    pub async fn add_member(
        &self,
        workspace_id: i64,
        user_id: &str,
        role: &str,
    ) -> Result<()> {
        let (user_id, role) = (user_id.to_string(), role.to_string());
        self.db
            .writer()
            .call(move |conn| repository::add_member(conn, workspace_id, &user_id, &role))
            .await
            .map_err(Into::into)
    }

    pub async fn remove_member(&self, workspace_id: i64, user_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        let outcome = self
            .db
            .writer()
            .call(move |conn| repository::remove_member(conn, workspace_id, &user_id))
            .await?;
        match outcome {
            repository::RemoveOutcome::Removed => Ok(true),
            repository::RemoveOutcome::NotFound => Ok(false),
            repository::RemoveOutcome::LastOwner => Err(Error::Config(
                "cannot remove the last owner of the workspace".into(),
            )),
        }
    }

    // ── Reports ────────────────────────────────────────────────────

    pub async fn sync_runs(&self, workspace_id: i64, limit: u32) -> Result<Vec<SyncRun>> {
        self.db
            .reader()
            .call(move |conn| repository::list_sync_runs(conn, workspace_id, limit))
            .await
            .map_err(Into::into)
    }

    pub async fn budgets(
        &self,
        workspace_id: i64,
        account: Option<&str>,
    ) -> Result<Vec<BudgetRow>> {
        let account = account.map(|s| s.to_string());
        self.db
            .reader()
            .call(move |conn| repository::list_budgets(conn, workspace_id, account.as_deref()))
            .await
            .map_err(Into::into)
    }

    pub async fn spend_report(
        &self,
        workspace_id: i64,
        since: NaiveDate,
        until: NaiveDate,
        market: Option<&str>,
    ) -> Result<SpendReport> {
        report::spend_report(&self.db, workspace_id, since, until, market).await
    }

    pub async fn winners(
        &self,
        workspace_id: i64,
        since: NaiveDate,
        until: NaiveDate,
        market: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<WinnerRow>> {
        report::winners(&self.db, workspace_id, since, until, market, limit).await
    }
}
