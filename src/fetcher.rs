//! Paginated transaction fetching for a single address.
//!
//! Pages through the explorer's account endpoint in ascending block order.
//! Rate-limit replies are retried on the same page with exponential backoff;
//! every other failure ends pagination for this address and returns what has
//! been accumulated so far. Nothing in here propagates an error to the caller.

use crate::config::{ExplorerConfig, TraceConfig};
use crate::explorer::{ApiResult, ExplorerApi, ExplorerError, PageQuery};
use crate::schemas::{RawTransaction, TraceDirection, TransferKind};
use crate::selector::{KeepAll, RetentionPolicy, TopKSelector};
use std::time::Duration;
use tracing::{debug, warn};

/// Pacing and request shape for one fetcher
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub page_size: usize,
    pub throttle: Duration,
    pub backoff_initial: Duration,
    pub backoff_cap: Duration,
    pub kind: TransferKind,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            throttle: Duration::from_millis(200),
            backoff_initial: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(8),
            kind: TransferKind::Native,
        }
    }
}

impl FetchSettings {
    pub fn from_config(explorer: &ExplorerConfig, trace: &TraceConfig) -> Self {
        Self {
            page_size: explorer.page_size.max(1),
            throttle: explorer.throttle(),
            backoff_initial: explorer.backoff_initial(),
            backoff_cap: explorer.backoff_cap(),
            kind: trace.kind,
        }
    }
}

/// Inclusive block filter; `end == 0` means open ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn full() -> Self {
        Self { start: 0, end: 0 }
    }
}

/// Why pagination ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// Explorer reported no (more) transactions
    #[default]
    NoData,
    /// A page shorter than the page size was the last one
    ShortPage,
    /// An empty list page
    EmptyPage,
    /// Result window overflow, ended quietly
    Truncated,
    /// Unexpected payload, a warning was recorded
    Malformed,
    /// Network or HTTP failure; partial results kept
    TransportFailure,
}

/// Diagnostics for one address fetch
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Pages that contributed rows
    pub pages: u32,
    pub rate_limit_retries: u32,
    /// Sleep taken before each retry, in order
    pub backoff_delays: Vec<Duration>,
    pub stop: StopReason,
    pub warnings: Vec<String>,
}

/// Retained transactions plus how the fetch went
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub transactions: Vec<RawTransaction>,
    pub report: FetchReport,
}

impl FetchOutcome {
    pub fn failed(&self) -> bool {
        self.report.stop == StopReason::TransportFailure
    }
}

/// Paginating fetcher over an [`ExplorerApi`]
pub struct PageFetcher<A> {
    api: A,
    settings: FetchSettings,
}

impl<A: ExplorerApi> PageFetcher<A> {
    pub fn new(api: A, settings: FetchSettings) -> Self {
        Self { api, settings }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Every transaction of the address within the range
    pub async fn fetch_all(&self, address: &str, range: BlockRange) -> FetchOutcome {
        self.fetch_with(address, range, KeepAll::new()).await
    }

    /// The `k` largest eligible transfers in the given direction, descending by
    /// value. `k == 0` behaves exactly like [`Self::fetch_all`].
    pub async fn fetch_top_k(
        &self,
        address: &str,
        range: BlockRange,
        k: usize,
        direction: TraceDirection,
    ) -> FetchOutcome {
        if k == 0 {
            return self.fetch_all(address, range).await;
        }
        let selector = TopKSelector::new(k, address, direction, self.settings.kind);
        self.fetch_with(address, range, selector).await
    }

    /// Shared pagination loop; `policy` decides what is kept
    pub async fn fetch_with<P>(&self, address: &str, range: BlockRange, mut policy: P) -> FetchOutcome
    where
        P: RetentionPolicy + Send,
    {
        let mut report = FetchReport::default();
        let mut page: u32 = 1;
        let mut backoff = self.settings.backoff_initial;

        loop {
            let query = PageQuery {
                address: address.to_string(),
                kind: self.settings.kind,
                start_block: range.start,
                end_block: range.end,
                page,
                offset: self.settings.page_size,
            };

            let response = match self.api.account_page(&query).await {
                Ok(response) => response,
                Err(ExplorerError::RateLimited) => {
                    self.back_off(&mut backoff, &mut report, address, page).await;
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Fetch for {} aborted on page {}: {} (keeping {} transactions)",
                        address,
                        page,
                        e,
                        policy.retained()
                    );
                    report.stop = StopReason::TransportFailure;
                    break;
                }
            };

            if response.is_rate_limited() {
                self.back_off(&mut backoff, &mut report, address, page).await;
                continue;
            }

            if response.is_no_data() {
                report.stop = StopReason::NoData;
                break;
            }

            let row_count = match &response.result {
                ApiResult::List(items) => items.len(),
                other => {
                    if response.is_truncation() {
                        debug!(
                            "Result window exhausted for {} at page {}; stopping",
                            address, page
                        );
                        report.stop = StopReason::Truncated;
                    } else {
                        let warning = format!(
                            "Unexpected explorer response for {}: status={}, message={}, result_type={}",
                            address,
                            response.status,
                            if response.message().is_empty() { "None" } else { response.message() },
                            other.type_name()
                        );
                        warn!("{}", warning);
                        report.warnings.push(warning);
                        report.stop = StopReason::Malformed;
                    }
                    break;
                }
            };

            if row_count == 0 {
                report.stop = StopReason::EmptyPage;
                break;
            }

            report.pages += 1;
            for tx in response.transactions().unwrap_or_default() {
                policy.offer(tx);
            }

            debug!(
                "Address {} page {}: {} rows (retained so far: {})",
                address,
                page,
                row_count,
                policy.retained()
            );

            if row_count < self.settings.page_size {
                report.stop = StopReason::ShortPage;
                break;
            }

            page += 1;
            tokio::time::sleep(self.settings.throttle).await;
        }

        FetchOutcome {
            transactions: policy.into_transactions(),
            report,
        }
    }

    async fn back_off(
        &self,
        backoff: &mut Duration,
        report: &mut FetchReport,
        address: &str,
        page: u32,
    ) {
        warn!(
            "Explorer rate limit for {}; retrying page {} in {:.1}s",
            address,
            page,
            backoff.as_secs_f64()
        );
        tokio::time::sleep(*backoff).await;
        report.rate_limit_retries += 1;
        report.backoff_delays.push(*backoff);
        *backoff = (*backoff * 2).min(self.settings.backoff_cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::testing::{Ledger, ScriptedExplorer};
    use crate::explorer::ApiResponse;

    const TARGET: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OTHER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn tx(hash: &str, value: u64) -> RawTransaction {
        RawTransaction {
            hash: hash.to_string(),
            from: TARGET.to_string(),
            to: OTHER.to_string(),
            value: value.to_string(),
            input: "0x".to_string(),
            timestamp: "1700000000".to_string(),
            block_number: "100".to_string(),
            ..Default::default()
        }
    }

    fn page(hashes: &[&str]) -> Result<ApiResponse, ExplorerError> {
        Ok(ApiResponse::list(
            hashes
                .iter()
                .map(|h| serde_json::to_value(tx(h, 1)).unwrap())
                .collect(),
        ))
    }

    fn rate_limited() -> Result<ApiResponse, ExplorerError> {
        Ok(ApiResponse::text(
            "0",
            "NOTOK",
            "Max rate limit reached, please use API Key for higher rate limit",
        ))
    }

    fn settings(page_size: usize) -> FetchSettings {
        FetchSettings {
            page_size,
            ..Default::default()
        }
    }

    fn hashes(outcome: &FetchOutcome) -> Vec<&str> {
        outcome.transactions.iter().map(|t| t.hash.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_short_page() {
        let api = ScriptedExplorer::new(vec![page(&["0x1", "0x2", "0x3"]), page(&["0x4"])]);
        let fetcher = PageFetcher::new(api, settings(3));

        let start = tokio::time::Instant::now();
        let outcome = fetcher.fetch_all(TARGET, BlockRange::full()).await;

        assert_eq!(hashes(&outcome), vec!["0x1", "0x2", "0x3", "0x4"]);
        assert_eq!(outcome.report.pages, 2);
        assert_eq!(outcome.report.stop, StopReason::ShortPage);
        assert_eq!(fetcher.api().pages_requested(), vec![1, 2]);
        // one throttle pause between the two pages
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_transactions_stops_immediately() {
        let api = ScriptedExplorer::new(vec![Ok(ApiResponse::no_transactions())]);
        let fetcher = PageFetcher::new(api, settings(3));
        let outcome = fetcher.fetch_all(TARGET, BlockRange::full()).await;

        assert!(outcome.transactions.is_empty());
        assert_eq!(outcome.report.stop, StopReason::NoData);
        assert!(outcome.report.warnings.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_after_full_page_keeps_accumulated() {
        let api = ScriptedExplorer::new(vec![
            page(&["0x1", "0x2"]),
            Ok(ApiResponse::no_transactions()),
        ]);
        let fetcher = PageFetcher::new(api, settings(2));
        let outcome = fetcher.fetch_all(TARGET, BlockRange::full()).await;

        assert_eq!(hashes(&outcome), vec!["0x1", "0x2"]);
        assert_eq!(outcome.report.stop, StopReason::NoData);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_rate_limits_retry_same_page() {
        let api = ScriptedExplorer::new(vec![
            rate_limited(),
            rate_limited(),
            rate_limited(),
            page(&["0x1"]),
        ]);
        let fetcher = PageFetcher::new(api, settings(3));

        let start = tokio::time::Instant::now();
        let outcome = fetcher.fetch_all(TARGET, BlockRange::full()).await;

        assert_eq!(outcome.report.rate_limit_retries, 3);
        assert_eq!(
            outcome.report.backoff_delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert!(outcome
            .report
            .backoff_delays
            .windows(2)
            .all(|w| w[0] <= w[1]));
        assert_eq!(fetcher.api().pages_requested(), vec![1, 1, 1, 1]);
        assert_eq!(hashes(&outcome), vec!["0x1"]);
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let mut script: Vec<_> = (0..6).map(|_| rate_limited()).collect();
        script.push(page(&["0x1"]));
        let fetcher = PageFetcher::new(ScriptedExplorer::new(script), settings(3));
        let outcome = fetcher.fetch_all(TARGET, BlockRange::full()).await;

        let secs: Vec<u64> = outcome
            .report
            .backoff_delays
            .iter()
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 8, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_429_counts_as_rate_limit() {
        let api = ScriptedExplorer::new(vec![Err(ExplorerError::RateLimited), page(&["0x1"])]);
        let fetcher = PageFetcher::new(api, settings(3));
        let outcome = fetcher.fetch_all(TARGET, BlockRange::full()).await;

        assert_eq!(outcome.report.rate_limit_retries, 1);
        assert_eq!(hashes(&outcome), vec!["0x1"]);
        assert!(!outcome.failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncation_stops_silently() {
        let api = ScriptedExplorer::new(vec![
            page(&["0x1", "0x2"]),
            Ok(ApiResponse::text(
                "0",
                "NOTOK",
                "Result window is too large, PageNo x Offset size must be less than or equal to 10000",
            )),
        ]);
        let fetcher = PageFetcher::new(api, settings(2));
        let outcome = fetcher.fetch_all(TARGET, BlockRange::full()).await;

        assert_eq!(hashes(&outcome), vec!["0x1", "0x2"]);
        assert_eq!(outcome.report.stop, StopReason::Truncated);
        assert!(outcome.report.warnings.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_payload_records_warning() {
        let api = ScriptedExplorer::new(vec![Ok(ApiResponse::text(
            "0",
            "NOTOK",
            "Invalid API Key",
        ))]);
        let fetcher = PageFetcher::new(api, settings(2));
        let outcome = fetcher.fetch_all(TARGET, BlockRange::full()).await;

        assert!(outcome.transactions.is_empty());
        assert_eq!(outcome.report.stop, StopReason::Malformed);
        assert_eq!(outcome.report.warnings.len(), 1);
        assert!(outcome.report.warnings[0].contains("NOTOK"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_returns_partial_results() {
        let api = ScriptedExplorer::new(vec![
            page(&["0x1", "0x2"]),
            Err(ExplorerError::Status(502)),
        ]);
        let fetcher = PageFetcher::new(api, settings(2));
        let outcome = fetcher.fetch_all(TARGET, BlockRange::full()).await;

        assert_eq!(hashes(&outcome), vec!["0x1", "0x2"]);
        assert!(outcome.failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_top_k_across_pages() {
        let ledger = Ledger::new(
            [1u64, 5, 3, 9, 2]
                .iter()
                .enumerate()
                .map(|(i, v)| tx(&format!("0x{}", i), *v))
                .collect(),
        );
        let fetcher = PageFetcher::new(ledger, settings(2));
        let outcome = fetcher
            .fetch_top_k(TARGET, BlockRange::full(), 2, TraceDirection::Out)
            .await;

        let values: Vec<&str> = outcome.transactions.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["9", "5"]);
        assert_eq!(outcome.report.pages, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_top_k_zero_is_fetch_all() {
        let mut contract_call = tx("0x2", 50);
        contract_call.input = "0xa9059cbb".to_string();
        let ledger = Ledger::new(vec![tx("0x1", 1), contract_call]);
        let fetcher = PageFetcher::new(ledger, settings(10));

        let all = fetcher.fetch_all(TARGET, BlockRange::full()).await;
        let zero = fetcher
            .fetch_top_k(TARGET, BlockRange::full(), 0, TraceDirection::In)
            .await;
        assert_eq!(all.transactions, zero.transactions);
        assert_eq!(zero.transactions.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_top_k_never_ranks_contract_calls() {
        let mut contract_call = tx("0x2", 50);
        contract_call.input = "0xa9059cbb".to_string();
        let ledger = Ledger::new(vec![tx("0x1", 1), contract_call, tx("0x3", 7)]);
        let trace = TraceConfig {
            pure_transfers_only: false,
            ..Default::default()
        };
        let fetcher = PageFetcher::new(
            ledger,
            FetchSettings::from_config(&ExplorerConfig::new("key"), &trace),
        );

        let outcome = fetcher
            .fetch_top_k(TARGET, BlockRange::full(), 2, TraceDirection::Out)
            .await;
        assert_eq!(hashes(&outcome), vec!["0x3", "0x1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_range_is_forwarded() {
        let api = ScriptedExplorer::new(vec![Ok(ApiResponse::no_transactions())]);
        let fetcher = PageFetcher::new(
            api,
            FetchSettings {
                kind: TransferKind::Token,
                ..settings(5)
            },
        );
        fetcher.fetch_all(TARGET, BlockRange::new(10, 20)).await;

        let queries = fetcher.api().queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].start_block, 10);
        assert_eq!(queries[0].end_block, 20);
        assert_eq!(queries[0].kind, TransferKind::Token);
        assert_eq!(queries[0].offset, 5);
    }
}
