use std::time::Duration;

use crate::error::Error;

const MAX_RETRIES: u32 = 3;
const BACKOFF_SECONDS: &[u64] = &[30, 60, 120];

/// Graph API error codes that signal throttling: 4 (app-level), 17
/// (user-level), 32 (page-level), 613 (custom rate limit).
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613];

/// Check whether an upstream error is a rate limit we should wait out.
pub fn is_rate_limited(e: &Error) -> bool {
    match e {
        Error::UpstreamRejected { code, message } => {
            RATE_LIMIT_CODES.contains(code) || message.to_lowercase().contains("rate limit")
        }
        _ => false,
    }
}

/// Retry an API call expression with backoff on rate-limit errors.
///
/// Usage: `retry_api!(client.campaign_insights(token, id, since, until))`
///
/// The expression is re-evaluated on each retry attempt. This is a macro
/// because async closures that return borrowed futures can't satisfy `Fn`.
macro_rules! retry_api {
    ($expr:expr) => {{
        let mut _attempt: u32 = 0;
        loop {
            match $expr.await {
                Ok(val) => break Ok::<_, crate::error::Error>(val),
                Err(e) => {
                    if $crate::sync::rate_limit::is_rate_limited(&e) && _attempt < 3 {
                        $crate::sync::rate_limit::backoff_sleep(_attempt).await;
                        _attempt += 1;
                    } else {
                        break Err(e);
                    }
                }
            }
        }
    }};
}

pub(crate) use retry_api;

/// Sleep for the backoff duration of the given attempt.
pub async fn backoff_sleep(attempt: u32) {
    let wait = BACKOFF_SECONDS
        .get(attempt as usize)
        .copied()
        .unwrap_or(120);
    log::warn!(
        "Rate limited by Meta API. Waiting {wait}s before retry {}/{MAX_RETRIES}",
        attempt + 1
    );
    tokio::time::sleep(Duration::from_secs(wait)).await;
}
