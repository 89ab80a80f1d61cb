use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use mw_quota::ACCOUNT_SCOPE;
use mw_quota::QuotaGuard;
use mw_types::AccessToken;
use mw_types::FetchedListing;
use mw_types::ListingPrice;
use mw_types::SellerInfo;
use mw_types::StashLocation;

use crate::client::HttpClient;
use crate::client::HttpClientConfig;
use crate::errors::FetchError;
use crate::errors::Result;

/// Server hard limit on ids per detail-fetch request.
pub const MAX_IDS_PER_FETCH: usize = 10;

/// Rules header: comma-separated `max:period:penalty` triples.
pub const RULES_HEADER: &str = "x-rate-limit-account";
/// State header: comma-separated `used:period:restricted` triples.
pub const STATE_HEADER: &str = "x-rate-limit-account-state";

/// Name of the session cookie carrying the credential.
pub const SESSION_COOKIE: &str = "SESSID";

const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    result: Vec<FetchEntry>,
}

#[derive(Debug, Deserialize)]
struct FetchEntry {
    id: String,
    listing: Option<ListingBody>,
}

#[derive(Debug, Deserialize)]
struct ListingBody {
    price: Option<ListingPrice>,
    stash: Option<StashLocation>,
    account: Option<AccountBody>,
    hideout_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AccountBody {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "lastCharacterName")]
    last_character_name: String,
    #[serde(default)]
    whisper: String,
}

/// Detail-fetch client. Every response feeds its rate headers back into
/// the shared [`QuotaGuard`]; a 429 is waited out before returning.
pub struct FetchClient {
    http: HttpClient,
    base_url: String,
    quota: Arc<QuotaGuard>,
}

impl FetchClient {
    pub fn new(base_url: impl Into<String>, quota: Arc<QuotaGuard>) -> Result<Self> {
        Self::with_config(base_url, quota, HttpClientConfig::default())
    }

    pub fn with_config(base_url: impl Into<String>, quota: Arc<QuotaGuard>, config: HttpClientConfig) -> Result<Self> {
        Ok(Self { http: HttpClient::with_config(config)?, base_url: base_url.into(), quota })
    }

    /// Fetch details for one sub-batch of at most [`MAX_IDS_PER_FETCH`]
    /// ids. The caller is responsible for admission via the quota guard;
    /// this method accounts the request and applies the response headers.
    pub async fn fetch_batch(&self, ids: &[String], search_id: &str, session: &str) -> Result<Vec<FetchedListing>> {
        debug_assert!(ids.len() <= MAX_IDS_PER_FETCH, "sub-batch exceeds server id limit");

        let url = format!("{}/{}?query={}", self.base_url.trim_end_matches('/'), ids.join(","), search_id);
        tracing::debug!(ids = ids.len(), search_id, "fetching listing details");

        self.quota.record_request(ACCOUNT_SCOPE);
        let resp = self.http.get(&url).header(reqwest::header::COOKIE, format!("{SESSION_COOKIE}={session}")).send().await?;

        self.apply_rate_headers(resp.headers());

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(resp.headers());
            let waited = self.quota.handle_429(retry_after).await;
            // Re-parse after the wait so subsequent admission sees the
            // state the server reported alongside the rejection.
            self.apply_rate_headers(resp.headers());
            return Err(FetchError::Throttled(waited));
        }

        match status.as_u16() {
            400 => return Err(FetchError::InvalidQuery),
            404 => return Err(FetchError::ItemGone),
            code if !status.is_success() => {
                let message = resp.text().await.unwrap_or_default();
                let message = truncate(&message);
                tracing::warn!(code, %message, "detail fetch rejected");
                return Err(FetchError::Api { code, message });
            }
            _ => {}
        }

        let body = resp.text().await?;
        parse_fetch_body(&body)
    }

    fn apply_rate_headers(&self, headers: &HeaderMap) {
        let rules = headers.get(RULES_HEADER).and_then(|v| v.to_str().ok());
        let state = headers.get(STATE_HEADER).and_then(|v| v.to_str().ok());

        if let (Some(rules), Some(state)) = (rules, state) {
            self.quota.parse_headers(ACCOUNT_SCOPE, rules, state);
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers.get(reqwest::header::RETRY_AFTER).and_then(|v| v.to_str().ok()).and_then(|v| v.trim().parse().ok())
}

fn truncate(message: &str) -> String {
    message.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Map the response body onto hand-off values. Listings without a usable
/// token still come through; their token just reads as expired.
fn parse_fetch_body(body: &str) -> Result<Vec<FetchedListing>> {
    let response: FetchResponse = serde_json::from_str(body)?;

    let listings = response
        .result
        .into_iter()
        .map(|entry| {
            let listing = entry.listing.unwrap_or(ListingBody { price: None, stash: None, account: None, hideout_token: None });
            let account = listing.account.unwrap_or_default();

            FetchedListing {
                id: entry.id,
                price: listing.price,
                location: listing.stash.unwrap_or_default(),
                seller: SellerInfo { account: account.name, character: account.last_character_name, whisper: account.whisper },
                access_token: AccessToken::parse(listing.hideout_token.unwrap_or_default()),
            }
        })
        .collect();

    Ok(listings)
}
