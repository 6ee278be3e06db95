pub mod cache;

use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::error::{Error, Result};
use cache::AccountCache;

const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v21.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const PAGE_LIMIT: &str = "500";

/// Client for the Meta Graph API.
///
/// Every request carries a hard timeout; transport failures surface as
/// [`Error::UpstreamUnavailable`], never as an empty result. An error
/// envelope embedded in the response body is translated to
/// [`Error::AuthExpired`] (invalid/expired token) or
/// [`Error::UpstreamRejected`] (everything else).
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    accounts_cache: AccountCache,
}

impl UpstreamClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Override the API base URL (tests, proxies).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            accounts_cache: AccountCache::default(),
        })
    }

    fn build_url(&self, path: &str, token: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| Error::Config(format!("invalid request URL {path}: {e}")))?;
        url.query_pairs_mut().append_pair("access_token", token);
        for (k, v) in params {
            url.query_pairs_mut().append_pair(k, v);
        }
        Ok(url)
    }

    async fn get_envelope<T: DeserializeOwned>(&self, url: Url) -> Result<Envelope<T>> {
        let resp = self.http.get(url).send().await.map_err(classify_transport)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(classify_transport)?;

        // The Graph API reports business errors in the body, sometimes with
        // a 200 status; decode the envelope before trusting the status code.
        let envelope: Envelope<T> = serde_json::from_slice(&body).map_err(|e| {
            Error::UpstreamRejected {
                code: status.as_u16() as i64,
                message: format!("unparseable response: {e}"),
            }
        })?;

        if let Some(api_err) = envelope.error {
            return Err(api_err.into_error());
        }
        if !status.is_success() {
            return Err(Error::UpstreamRejected {
                code: status.as_u16() as i64,
                message: format!("HTTP {status}"),
            });
        }
        Ok(envelope)
    }

    /// Fetch a single page.
    pub async fn fetch_page<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        params: &[(&str, &str)],
    ) -> Result<Page<T>> {
        let url = self.build_url(path, token, params)?;
        let envelope = self.get_envelope::<T>(url).await?;
        Ok(Page {
            data: envelope.data,
            next: envelope.paging.and_then(|p| p.next),
        })
    }

    /// Fetch all pages, following the `paging.next` cursor until absent.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut url = Some(self.build_url(path, token, params)?);
        while let Some(current) = url.take() {
            let envelope = self.get_envelope::<T>(current).await?;
            all.extend(envelope.data);
            if let Some(next) = envelope.paging.and_then(|p| p.next) {
                // The cursor is a complete URL (token included)
                url = Some(
                    Url::parse(&next)
                        .map_err(|e| Error::Config(format!("invalid paging cursor: {e}")))?,
                );
            }
        }
        Ok(all)
    }

    /// List the ad accounts reachable with this token.
    pub async fn ad_accounts(&self, token: &str) -> Result<Vec<Account>> {
        self.fetch_all(
            "/me/adaccounts",
            token,
            &[("fields", "id,name"), ("limit", PAGE_LIMIT)],
        )
        .await
    }

    /// Like [`ad_accounts`](Self::ad_accounts) but memoized per
    /// (workspace, credential) with a short TTL, so successive report
    /// requests do not re-issue the account-list call. Credential rotation
    /// changes the cache key and implicitly invalidates.
    pub async fn ad_accounts_cached(&self, token: &str, workspace_id: i64) -> Result<Vec<Account>> {
        if let Some(accounts) = self.accounts_cache.get(workspace_id, token) {
            return Ok(accounts);
        }
        let accounts = self.ad_accounts(token).await?;
        self.accounts_cache.put(workspace_id, token, accounts.clone());
        Ok(accounts)
    }

    /// Campaign-day insight rows for one account over [since, until].
    pub async fn campaign_insights(
        &self,
        token: &str,
        account_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<CampaignInsight>> {
        let time_range = time_range_param(since, until);
        self.fetch_all(
            &format!("/{account_id}/insights"),
            token,
            &[
                ("fields", "spend,impressions,clicks,campaign_name,campaign_id"),
                ("level", "campaign"),
                ("time_increment", "1"),
                ("limit", PAGE_LIMIT),
                ("time_range", &time_range),
            ],
        )
        .await
    }

    /// Ad-day insight rows for one account over [since, until].
    pub async fn ad_insights(
        &self,
        token: &str,
        account_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<AdInsight>> {
        let time_range = time_range_param(since, until);
        self.fetch_all(
            &format!("/{account_id}/insights"),
            token,
            &[
                (
                    "fields",
                    "ad_name,ad_id,campaign_id,spend,impressions,clicks,actions,action_values,date_start,date_stop",
                ),
                ("level", "ad"),
                ("time_increment", "1"),
                ("limit", PAGE_LIMIT),
                ("time_range", &time_range),
            ],
        )
        .await
    }

    /// Campaign budget/status metadata for one account. Budget fields come
    /// back in minor currency units.
    pub async fn campaign_metadata(
        &self,
        token: &str,
        account_id: &str,
    ) -> Result<Vec<CampaignMeta>> {
        self.fetch_all(
            &format!("/{account_id}/campaigns"),
            token,
            &[
                ("fields", "id,name,daily_budget,lifetime_budget,effective_status"),
                ("limit", PAGE_LIMIT),
            ],
        )
        .await
    }

    /// Campaign ids that currently have at least one ACTIVE ad.
    pub async fn active_ad_campaigns(
        &self,
        token: &str,
        account_id: &str,
    ) -> Result<HashSet<String>> {
        let ads: Vec<AdStatus> = self
            .fetch_all(
                &format!("/{account_id}/ads"),
                token,
                &[("fields", "id,campaign_id,effective_status"), ("limit", PAGE_LIMIT)],
            )
            .await?;
        Ok(ads
            .into_iter()
            .filter(|a| a.effective_status.as_deref() == Some("ACTIVE"))
            .filter_map(|a| a.campaign_id)
            .collect())
    }
}

fn time_range_param(since: NaiveDate, until: NaiveDate) -> String {
    format!(
        "{{\"since\":\"{}\",\"until\":\"{}\"}}",
        since.format("%Y-%m-%d"),
        until.format("%Y-%m-%d")
    )
}

fn classify_transport(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::UpstreamUnavailable(format!("request timed out: {e}"))
    } else {
        Error::UpstreamUnavailable(e.to_string())
    }
}

/// One page of results plus the continuation cursor, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    error: Option<ApiError>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<i64>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Graph API error code for an invalid or expired access token.
const CODE_AUTH: i64 = 190;

impl ApiError {
    fn into_error(self) -> Error {
        let code = self.code.unwrap_or(500);
        if code == CODE_AUTH || self.kind.as_deref() == Some("OAuthException") {
            return Error::AuthExpired;
        }
        Error::UpstreamRejected {
            code,
            message: self.message.unwrap_or_else(|| "Meta API error".to_string()),
        }
    }
}

// ── Row types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignInsight {
    pub campaign_id: Option<String>,
    pub campaign_name: Option<String>,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub spend: f64,
    #[serde(default, deserialize_with = "de_i64_lenient")]
    pub impressions: i64,
    #[serde(default, deserialize_with = "de_i64_lenient")]
    pub clicks: i64,
    pub date_start: Option<NaiveDate>,
    pub date_stop: Option<NaiveDate>,
}

impl CampaignInsight {
    /// The calendar day this row covers (`time_increment=1` makes start and
    /// stop equal; prefer start).
    pub fn day(&self) -> Option<NaiveDate> {
        self.date_start.or(self.date_stop)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdInsight {
    pub ad_id: Option<String>,
    pub ad_name: Option<String>,
    pub campaign_id: Option<String>,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub spend: f64,
    #[serde(default, deserialize_with = "de_i64_lenient")]
    pub impressions: i64,
    #[serde(default, deserialize_with = "de_i64_lenient")]
    pub clicks: i64,
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
    #[serde(default)]
    pub action_values: Vec<ActionEntry>,
    pub date_start: Option<NaiveDate>,
    pub date_stop: Option<NaiveDate>,
}

impl AdInsight {
    pub fn day(&self) -> Option<NaiveDate> {
        self.date_start.or(self.date_stop)
    }

    /// Attributed purchase value (from `action_values`).
    pub fn purchase_value(&self) -> f64 {
        purchase_total(&self.action_values)
    }

    /// Attributed purchase count (from `actions`).
    pub fn purchase_count(&self) -> i64 {
        purchase_total(&self.actions) as i64
    }
}

fn purchase_total(entries: &[ActionEntry]) -> f64 {
    entries
        .iter()
        .find(|e| {
            e.action_type
                .as_deref()
                .is_some_and(|t| t.contains("purchase"))
        })
        .map(|e| e.value)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionEntry {
    pub action_type: Option<String>,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignMeta {
    pub id: String,
    pub name: Option<String>,
    /// Minor currency units, as delivered by the API.
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub daily_budget: f64,
    /// Minor currency units, as delivered by the API.
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub lifetime_budget: f64,
    pub effective_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AdStatus {
    #[allow(dead_code)]
    id: Option<String>,
    campaign_id: Option<String>,
    effective_status: Option<String>,
}

// The Graph API returns most numeric fields as JSON strings; accept
// string, number, or null.

fn de_f64_lenient<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
        None,
    }
    Ok(match Raw::deserialize(de)? {
        Raw::Num(n) => n,
        Raw::Str(s) => s.trim().parse().unwrap_or(0.0),
        Raw::None => 0.0,
    })
}

fn de_i64_lenient<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
        None,
    }
    Ok(match Raw::deserialize(de)? {
        Raw::Num(n) => n,
        Raw::Str(s) => s.trim().parse().unwrap_or(0),
        Raw::None => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_decodes_rows_and_cursor() {
        let body = r#"{
            "data": [
                {"id": "act_1", "name": "VELUNAPETS SI COD $"},
                {"id": "act_2", "name": "VELUNAPETS SK COD $"}
            ],
            "paging": {"next": "https://example.test/next?after=abc"}
        }"#;
        let env: Envelope<Account> = serde_json::from_str(body).unwrap();
        assert_eq!(env.data.len(), 2);
        assert_eq!(env.data[0].id, "act_1");
        assert_eq!(env.paging.unwrap().next.as_deref(), Some("https://example.test/next?after=abc"));
    }

    #[test]
    fn test_error_envelope_maps_auth() {
        let body = r#"{"error": {"message": "Invalid OAuth access token", "type": "OAuthException", "code": 190}}"#;
        let env: Envelope<Account> = serde_json::from_str(body).unwrap();
        assert!(matches!(env.error.unwrap().into_error(), Error::AuthExpired));
    }

    #[test]
    fn test_error_envelope_maps_rejection() {
        let body = r#"{"error": {"message": "Unsupported field", "code": 100}}"#;
        let env: Envelope<Account> = serde_json::from_str(body).unwrap();
        match env.error.unwrap().into_error() {
            Error::UpstreamRejected { code, message } => {
                assert_eq!(code, 100);
                assert_eq!(message, "Unsupported field");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_insight_row_lenient_numbers() {
        let body = r#"{
            "campaign_id": "c1",
            "campaign_name": "CBO_ES_SMART_BALL_CAT_BASIC_20250216",
            "spend": "12.34",
            "impressions": "1000",
            "clicks": 7,
            "date_start": "2025-06-10",
            "date_stop": "2025-06-10"
        }"#;
        let row: CampaignInsight = serde_json::from_str(body).unwrap();
        assert_eq!(row.spend, 12.34);
        assert_eq!(row.impressions, 1000);
        assert_eq!(row.clicks, 7);
        assert_eq!(
            row.day(),
            NaiveDate::from_ymd_opt(2025, 6, 10)
        );
    }

    #[test]
    fn test_insight_row_missing_numbers_default() {
        let row: CampaignInsight = serde_json::from_str(r#"{"campaign_id": "c1"}"#).unwrap();
        assert_eq!(row.spend, 0.0);
        assert_eq!(row.impressions, 0);
        assert!(row.day().is_none());
    }

    #[test]
    fn test_ad_insight_purchase_extraction() {
        let body = r#"{
            "ad_id": "a1",
            "ad_name": "1094_EN_SMART_BALL_BASIC_VIDEO_4x5",
            "spend": "50",
            "actions": [
                {"action_type": "link_click", "value": "12"},
                {"action_type": "offsite_conversion.fb_pixel_purchase", "value": "3"}
            ],
            "action_values": [
                {"action_type": "offsite_conversion.fb_pixel_purchase", "value": "149.97"}
            ],
            "date_start": "2025-06-10"
        }"#;
        let row: AdInsight = serde_json::from_str(body).unwrap();
        assert_eq!(row.purchase_count(), 3);
        assert_eq!(row.purchase_value(), 149.97);
    }

    #[test]
    fn test_ad_insight_no_purchase_actions() {
        let row: AdInsight =
            serde_json::from_str(r#"{"ad_id": "a1", "actions": [], "action_values": []}"#).unwrap();
        assert_eq!(row.purchase_count(), 0);
        assert_eq!(row.purchase_value(), 0.0);
    }

    #[test]
    fn test_campaign_meta_minor_units_decode() {
        let body = r#"{"id": "c1", "name": "CBO_SI_X", "daily_budget": "1500", "lifetime_budget": "0", "effective_status": "ACTIVE"}"#;
        let meta: CampaignMeta = serde_json::from_str(body).unwrap();
        assert_eq!(meta.daily_budget, 1500.0);
        assert_eq!(meta.effective_status.as_deref(), Some("ACTIVE"));
    }

    #[test]
    fn test_time_range_param() {
        let since = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let until = NaiveDate::from_ymd_opt(2025, 6, 12).unwrap();
        assert_eq!(
            time_range_param(since, until),
            r#"{"since":"2025-01-01","until":"2025-06-12"}"#
        );
    }
}
