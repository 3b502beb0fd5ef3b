//! Etherscan-compatible explorer client.
//!
//! Provides a thin wrapper around the explorer's REST API with:
//! - A client-wide request ceiling (governor quota)
//! - Decoding of the `{status, message, result}` envelope
//! - Classification of rate-limit, no-data and truncation responses
//!
//! Retrying and pagination live in [`crate::fetcher`]; this module issues
//! exactly one HTTP request per call.

use crate::config::{ExplorerConfig, OPEN_END_BLOCK};
use crate::schemas::{RawTransaction, TransferKind};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Deserializer};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Messages the explorer uses when `page * offset` exceeds its result window.
/// Such responses end pagination quietly.
const TRUNCATION_PATTERNS: &[&str] = &[
    "結果視窗太大",
    "pageno x offset",
    "window too large",
    "page x offset",
];

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Rate limited by explorer")]
    RateLimited,

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// One page request against the account endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub address: String,
    pub kind: TransferKind,
    pub start_block: u64,
    pub end_block: u64,
    /// 1-based page number
    pub page: u32,
    pub offset: usize,
}

impl PageQuery {
    /// End block as sent on the wire; zero means "open ended"
    pub fn effective_end_block(&self) -> u64 {
        if self.end_block == 0 {
            OPEN_END_BLOCK
        } else {
            self.end_block
        }
    }
}

fn lenient_status<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Explorer response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: String,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub result: ApiResult,
}

/// Shape of the `result` field
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiResult {
    List(Vec<serde_json::Value>),
    Text(String),
    Other(serde_json::Value),
}

impl Default for ApiResult {
    fn default() -> Self {
        ApiResult::Other(serde_json::Value::Null)
    }
}

impl ApiResult {
    pub fn type_name(&self) -> &'static str {
        match self {
            ApiResult::List(_) => "list",
            ApiResult::Text(_) => "string",
            ApiResult::Other(serde_json::Value::Null) => "null",
            ApiResult::Other(serde_json::Value::Object(_)) => "object",
            ApiResult::Other(_) => "scalar",
        }
    }
}

impl ApiResponse {
    /// Successful list page
    pub fn list(items: Vec<serde_json::Value>) -> Self {
        Self {
            status: "1".to_string(),
            message: Some("OK".to_string()),
            result: ApiResult::List(items),
        }
    }

    /// Envelope whose result is a plain string
    pub fn text(status: &str, message: &str, result: &str) -> Self {
        Self {
            status: status.to_string(),
            message: Some(message.to_string()),
            result: ApiResult::Text(result.to_string()),
        }
    }

    /// The explorer's "no transactions" reply
    pub fn no_transactions() -> Self {
        Self {
            status: "0".to_string(),
            message: Some("No transactions found".to_string()),
            result: ApiResult::List(Vec::new()),
        }
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().map(str::trim).unwrap_or("")
    }

    fn result_text(&self) -> Option<String> {
        match &self.result {
            ApiResult::Text(s) => Some(s.to_lowercase()),
            _ => None,
        }
    }

    /// Rate-limit marker in the result string
    pub fn is_rate_limited(&self) -> bool {
        self.result_text()
            .map(|t| t.contains("rate limit") || t.contains("max rate"))
            .unwrap_or(false)
    }

    /// Explicit "no transactions found"
    pub fn is_no_data(&self) -> bool {
        let in_result = self
            .result_text()
            .map(|t| t.contains("no transactions"))
            .unwrap_or(false);
        in_result
            || (self.status == "0" && self.message().eq_ignore_ascii_case("no transactions found"))
    }

    /// Result-window overflow, treated as a soft end of data
    pub fn is_truncation(&self) -> bool {
        let message = self.message().to_lowercase();
        let result = self.result_text().unwrap_or_default();
        TRUNCATION_PATTERNS
            .iter()
            .any(|p| message.contains(p) || result.contains(p))
    }

    /// Decode list items into transactions, skipping anything that is not a
    /// transaction object. `None` when the result is not a list.
    pub fn transactions(&self) -> Option<Vec<RawTransaction>> {
        match &self.result {
            ApiResult::List(items) => Some(
                items
                    .iter()
                    .filter(|v| v.is_object())
                    .filter_map(|v| match serde_json::from_value(v.clone()) {
                        Ok(tx) => Some(tx),
                        Err(e) => {
                            debug!("Skipping undecodable transaction item: {}", e);
                            None
                        }
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Read access to an explorer. Implemented over HTTP by [`EtherscanClient`]
/// and in memory by the test ledger.
#[async_trait]
pub trait ExplorerApi: Send + Sync {
    /// Fetch one page of account transactions
    async fn account_page(&self, query: &PageQuery) -> Result<ApiResponse, ExplorerError>;

    /// Last block mined at or before the unix timestamp
    async fn block_by_timestamp(&self, timestamp: i64) -> Result<u64, ExplorerError>;
}

/// Rate-limited HTTP client for the Etherscan API family.
pub struct EtherscanClient {
    client: reqwest::Client,
    config: ExplorerConfig,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl EtherscanClient {
    pub fn new(config: ExplorerConfig) -> Result<Self, ExplorerError> {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("eth-flow-trace/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    async fn get(&self, params: Vec<(&'static str, String)>) -> Result<ApiResponse, ExplorerError> {
        self.rate_limiter.until_ready().await;

        let mut query = params;
        if self.config.chain_id != 0 {
            query.push(("chainid", self.config.chain_id.to_string()));
        }
        query.push(("apikey", self.config.api_key.clone()));

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ExplorerError::RateLimited);
        }
        if !status.is_success() {
            return Err(ExplorerError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ExplorerApi for EtherscanClient {
    async fn account_page(&self, query: &PageQuery) -> Result<ApiResponse, ExplorerError> {
        debug!(
            "GET {} {} page {} (offset {})",
            query.kind.action(),
            query.address,
            query.page,
            query.offset
        );
        self.get(vec![
            ("module", "account".to_string()),
            ("action", query.kind.action().to_string()),
            ("address", query.address.clone()),
            ("startblock", query.start_block.to_string()),
            ("endblock", query.effective_end_block().to_string()),
            ("page", query.page.to_string()),
            ("offset", query.offset.to_string()),
            ("sort", "asc".to_string()),
        ])
        .await
    }

    async fn block_by_timestamp(&self, timestamp: i64) -> Result<u64, ExplorerError> {
        let response = self
            .get(vec![
                ("module", "block".to_string()),
                ("action", "getblocknobytime".to_string()),
                ("timestamp", timestamp.to_string()),
                ("closest", "before".to_string()),
            ])
            .await?;

        match &response.result {
            ApiResult::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| ExplorerError::InvalidResponse(format!("block number: {}", s))),
            ApiResult::Other(serde_json::Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| ExplorerError::InvalidResponse(format!("block number: {}", n))),
            other => Err(ExplorerError::InvalidResponse(format!(
                "block number result was {}",
                other.type_name()
            ))),
        }
    }
}

/// In-memory explorers for tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::ethereum::same_address;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    /// Serves pages from a fixed set of transactions the way the explorer does:
    /// every transaction where the queried address is sender or recipient.
    #[derive(Default)]
    pub struct Ledger {
        transactions: Vec<RawTransaction>,
        failing: HashSet<String>,
        pub queries: Mutex<Vec<PageQuery>>,
    }

    impl Ledger {
        pub fn new(transactions: Vec<RawTransaction>) -> Self {
            Self {
                transactions,
                ..Default::default()
            }
        }

        /// Requests for this address fail at the transport level
        pub fn failing(mut self, address: &str) -> Self {
            self.failing.insert(address.to_lowercase());
            self
        }

        /// Addresses queried, in request order, first page only
        pub fn fetched_addresses(&self) -> Vec<String> {
            self.queries
                .lock()
                .unwrap()
                .iter()
                .filter(|q| q.page == 1)
                .map(|q| q.address.to_lowercase())
                .collect()
        }
    }

    #[async_trait]
    impl ExplorerApi for Ledger {
        async fn account_page(&self, query: &PageQuery) -> Result<ApiResponse, ExplorerError> {
            self.queries.lock().unwrap().push(query.clone());
            if self.failing.contains(&query.address.to_lowercase()) {
                return Err(ExplorerError::Status(503));
            }

            let matching: Vec<&RawTransaction> = self
                .transactions
                .iter()
                .filter(|tx| {
                    same_address(&tx.from, &query.address) || same_address(&tx.to, &query.address)
                })
                .filter(|tx| {
                    let block: u64 = tx.block_number.parse().unwrap_or(0);
                    block >= query.start_block && block <= query.effective_end_block()
                })
                .collect();

            let start = (query.page as usize - 1) * query.offset;
            let page: Vec<serde_json::Value> = matching
                .iter()
                .skip(start)
                .take(query.offset)
                .map(|tx| serde_json::to_value(tx).unwrap())
                .collect();

            if page.is_empty() {
                return Ok(ApiResponse::no_transactions());
            }
            Ok(ApiResponse::list(page))
        }

        async fn block_by_timestamp(&self, timestamp: i64) -> Result<u64, ExplorerError> {
            Ok((timestamp / 12) as u64)
        }
    }

    /// Replays a fixed script of responses, then reports no transactions.
    #[derive(Default)]
    pub struct ScriptedExplorer {
        responses: Mutex<VecDeque<Result<ApiResponse, ExplorerError>>>,
        pub queries: Mutex<Vec<PageQuery>>,
    }

    impl ScriptedExplorer {
        pub fn new(responses: Vec<Result<ApiResponse, ExplorerError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                queries: Mutex::new(Vec::new()),
            }
        }

        pub fn pages_requested(&self) -> Vec<u32> {
            self.queries.lock().unwrap().iter().map(|q| q.page).collect()
        }
    }

    #[async_trait]
    impl ExplorerApi for ScriptedExplorer {
        async fn account_page(&self, query: &PageQuery) -> Result<ApiResponse, ExplorerError> {
            self.queries.lock().unwrap().push(query.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ApiResponse::no_transactions()))
        }

        async fn block_by_timestamp(&self, _timestamp: i64) -> Result<u64, ExplorerError> {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_list_envelope() {
        let body = r#"{"status":"1","message":"OK","result":[{"hash":"0x1","from":"0xa","to":"0xb","value":"5","input":"0x","timeStamp":"1"}, 7, "junk"]}"#;
        let response: ApiResponse = serde_json::from_str(body).expect("decodes");
        let txs = response.transactions().expect("list result");
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].hash, "0x1");
        assert!(!response.is_rate_limited());
        assert!(!response.is_no_data());
    }

    #[test]
    fn test_rate_limit_detection() {
        let body = r#"{"status":"0","message":"NOTOK","result":"Max rate limit reached, please use API Key for higher rate limit"}"#;
        let response: ApiResponse = serde_json::from_str(body).expect("decodes");
        assert!(response.is_rate_limited());
        assert!(response.transactions().is_none());
    }

    #[test]
    fn test_no_data_detection() {
        let body = r#"{"status":"0","message":"No transactions found","result":[]}"#;
        let response: ApiResponse = serde_json::from_str(body).expect("decodes");
        assert!(response.is_no_data());

        let text = ApiResponse::text("0", "NOTOK", "No transactions found");
        assert!(text.is_no_data());
    }

    #[test]
    fn test_truncation_detection() {
        let in_result = ApiResponse::text(
            "0",
            "NOTOK",
            "Result window is too large, PageNo x Offset size must be less than or equal to 10000",
        );
        assert!(in_result.is_truncation());

        let in_message = ApiResponse::text("0", "Result window too large", "");
        assert!(in_message.is_truncation());

        let other = ApiResponse::text("0", "NOTOK", "Invalid API Key");
        assert!(!other.is_truncation());
    }

    #[test]
    fn test_numeric_status_and_missing_fields() {
        let response: ApiResponse = serde_json::from_str(r#"{"status":0}"#).expect("decodes");
        assert_eq!(response.status, "0");
        assert_eq!(response.message(), "");
        assert_eq!(response.result.type_name(), "null");
    }

    #[test]
    fn test_open_end_block() {
        let query = PageQuery {
            address: "0xa".into(),
            kind: TransferKind::Native,
            start_block: 0,
            end_block: 0,
            page: 1,
            offset: 1000,
        };
        assert_eq!(query.effective_end_block(), OPEN_END_BLOCK);
    }
}
