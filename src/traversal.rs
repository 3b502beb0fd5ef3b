//! Breadth-first fund-flow traversal.
//!
//! Starting from a root address, each explored address has its transactions
//! fetched, classified and appended to the [`Trace`]; the counterparties of the
//! classified edges become the next layer. Upstream (`in`) follows senders,
//! downstream (`out`) follows recipients, and `all` runs both one after the
//! other with independent visited sets.
//!
//! [`Traversal`] exposes a single direction step by step; [`TraceEngine`]
//! drives whole runs.

use crate::classify::{classify, ClassifyMode};
use crate::config::{ExplorerConfig, TraceConfig};
use crate::ethereum::{canonical, AddressError, ValidatedAddress};
use crate::explorer::ExplorerApi;
use crate::fetcher::{BlockRange, FetchSettings, PageFetcher};
use crate::schemas::{layer_label, FrontierEntry, Trace, TraceDirection};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Invalid root address: {0}")]
    InvalidRootAddress(#[from] AddressError),

    #[error("Invalid trace configuration: {0}")]
    Config(String),
}

/// Summary of one single-direction run
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalReport {
    pub direction: TraceDirection,
    /// Explored addresses in visiting order, as discovered
    pub visited: Vec<String>,
    /// Frontier entries created, root included
    pub discovered: usize,
    pub processed: usize,
    /// Edges appended to the trace
    pub edges: usize,
    /// Addresses whose fetch ended on a transport failure
    pub failed: Vec<String>,
    pub warnings: Vec<String>,
}

impl TraversalReport {
    fn new(direction: TraceDirection) -> Self {
        Self {
            direction,
            visited: Vec::new(),
            discovered: 1,
            processed: 0,
            edges: 0,
            failed: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Result of a single [`Traversal::step`]
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The address was fetched and its edges appended
    Explored {
        address: String,
        depth: u32,
        edges: usize,
    },
    /// Popped entry discarded without fetching (empty, visited or too deep)
    Skipped(FrontierEntry),
    /// Frontier exhausted
    Done,
}

/// Single-direction BFS over a borrowed fetcher
pub struct Traversal<'a, A> {
    fetcher: &'a PageFetcher<A>,
    direction: TraceDirection,
    max_depth: u32,
    top_k: usize,
    range: BlockRange,
    mode: ClassifyMode,
    frontier: VecDeque<FrontierEntry>,
    visited: HashSet<String>,
    queued: HashSet<String>,
    report: TraversalReport,
}

impl<'a, A: ExplorerApi> Traversal<'a, A> {
    /// Seed a traversal at `config.root_address` following `direction`,
    /// which must be `In` or `Out`.
    pub fn new(
        fetcher: &'a PageFetcher<A>,
        config: &TraceConfig,
        direction: TraceDirection,
    ) -> Result<Self, TraceError> {
        if direction == TraceDirection::All {
            return Err(TraceError::Config(
                "a single traversal follows either in or out".to_string(),
            ));
        }
        config
            .validate()
            .map_err(|e| TraceError::Config(e.to_string()))?;
        let root = ValidatedAddress::parse(&config.root_address)?;

        let seed = FrontierEntry::root(&config.root_address);
        let mut queued = HashSet::new();
        queued.insert(root.canonical());

        Ok(Self {
            fetcher,
            direction,
            max_depth: config.max_depth,
            top_k: config.top_k_per_address,
            range: BlockRange::new(config.start_block, config.end_block),
            mode: ClassifyMode::new(direction, config.filters_contract_calls(), config.kind),
            frontier: VecDeque::from([seed]),
            visited: HashSet::new(),
            queued,
            report: TraversalReport::new(direction),
        })
    }

    pub fn frontier(&self) -> &VecDeque<FrontierEntry> {
        &self.frontier
    }

    /// Explored addresses in visiting order
    pub fn visited(&self) -> &[String] {
        &self.report.visited
    }

    pub fn is_done(&self) -> bool {
        self.frontier.is_empty()
    }

    pub fn report(&self) -> &TraversalReport {
        &self.report
    }

    pub fn into_report(self) -> TraversalReport {
        self.report
    }

    /// Pop one frontier entry and process it
    pub async fn step(&mut self, trace: &mut Trace) -> StepOutcome {
        let Some(entry) = self.frontier.pop_front() else {
            return StepOutcome::Done;
        };

        let key = canonical(&entry.address);
        if key.is_empty() || self.visited.contains(&key) || entry.depth > self.max_depth {
            debug!(
                "[{}] Skipping {} at depth {}",
                self.direction, entry.address, entry.depth
            );
            return StepOutcome::Skipped(entry);
        }
        self.visited.insert(key.clone());
        self.report.visited.push(entry.address.clone());

        let outcome = if self.top_k > 0 {
            self.fetcher
                .fetch_top_k(&entry.address, self.range, self.top_k, self.direction)
                .await
        } else {
            self.fetcher.fetch_all(&entry.address, self.range).await
        };
        if outcome.failed() {
            self.report.failed.push(entry.address.clone());
        }
        self.report.warnings.extend(outcome.report.warnings);

        let mut edges = 0;
        for tx in &outcome.transactions {
            let Some(edge) = classify(tx, &entry.address, entry.depth, &entry.origin, &self.mode)
            else {
                continue;
            };

            let counterparty = match self.direction {
                TraceDirection::In => edge.from.clone(),
                _ => edge.to.clone(),
            };
            trace.push(edge);
            edges += 1;

            self.enqueue(counterparty, &key, entry.depth);
        }

        self.report.processed += 1;
        self.report.edges += edges;
        info!(
            "[{}] Fetched address {}/{}: {} ({} edges)",
            self.direction, self.report.processed, self.report.discovered, entry.address, edges
        );

        StepOutcome::Explored {
            address: entry.address,
            depth: entry.depth,
            edges,
        }
    }

    fn enqueue(&mut self, counterparty: String, current: &str, depth: u32) {
        let key = canonical(&counterparty);
        if key.is_empty()
            || key == current
            || depth >= self.max_depth
            || self.visited.contains(&key)
            || !self.queued.insert(key)
        {
            return;
        }
        self.frontier.push_back(FrontierEntry {
            address: counterparty.trim().to_string(),
            depth: depth + 1,
            origin: layer_label(depth),
        });
        self.report.discovered += 1;
    }

    /// Step until the frontier is exhausted
    pub async fn run_to_end(&mut self, trace: &mut Trace) {
        while self.step(trace).await != StepOutcome::Done {}
        info!(
            "[{}] Traversal complete: {} addresses, {} edges",
            self.direction, self.report.processed, self.report.edges
        );
    }
}

/// Drives complete traces for a configured root
pub struct TraceEngine<A> {
    fetcher: PageFetcher<A>,
    config: TraceConfig,
}

impl<A: ExplorerApi> TraceEngine<A> {
    pub fn new(api: A, explorer: &ExplorerConfig, config: TraceConfig) -> Self {
        let settings = FetchSettings::from_config(explorer, &config);
        Self {
            fetcher: PageFetcher::new(api, settings),
            config,
        }
    }

    pub fn with_fetcher(fetcher: PageFetcher<A>, config: TraceConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn fetcher(&self) -> &PageFetcher<A> {
        &self.fetcher
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Single-direction traversal over this engine's fetcher
    pub fn traversal(&self, direction: TraceDirection) -> Result<Traversal<'_, A>, TraceError> {
        Traversal::new(&self.fetcher, &self.config, direction)
    }

    /// Run the configured trace, appending to `trace`. `all` runs upstream then
    /// downstream. Returns one report per sub-run.
    pub async fn run(&self, trace: &mut Trace) -> Result<Vec<TraversalReport>, TraceError> {
        self.config
            .validate()
            .map_err(|e| TraceError::Config(e.to_string()))?;
        ValidatedAddress::parse(&self.config.root_address)?;

        let directions = match self.config.direction {
            TraceDirection::All => vec![TraceDirection::In, TraceDirection::Out],
            single => vec![single],
        };

        info!(
            "Tracing {} ({}, max depth {}, top-k {})",
            self.config.root_address.trim(),
            self.config.direction,
            self.config.max_depth,
            self.config.top_k_per_address
        );

        let mut reports = Vec::with_capacity(directions.len());
        for direction in directions {
            let mut traversal = self.traversal(direction)?;
            traversal.run_to_end(trace).await;
            reports.push(traversal.into_report());
        }
        Ok(reports)
    }
}
