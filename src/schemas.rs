//! Data schemas for the tracer.
//!
//! Raw explorer records, classified trace edges, frontier entries and the run
//! metadata written next to every exported trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Schema version for tracking changes
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Origin label of the root frontier entry
pub const ROOT_ORIGIN: &str = "ROOT";

// ============================================================================
// PART A: Explorer records
// ============================================================================

/// Accept strings, numbers, or null for explorer fields; everything becomes a string.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_string(deserializer)?;
    Ok(if value.is_empty() { None } else { Some(value) })
}

/// Transaction record as returned by the explorer's account endpoints.
///
/// Values are kept as the explorer's strings; conversion happens in the
/// classifier so malformed fields never fail the whole record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    #[serde(default, deserialize_with = "lenient_string")]
    pub hash: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub from: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub to: String,

    /// Integer minor units
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,

    /// Call data; `"0x"` marks a plain value transfer
    #[serde(default, deserialize_with = "lenient_string")]
    pub input: String,

    /// Unix seconds
    #[serde(
        rename = "timeStamp",
        alias = "timestamp",
        default,
        deserialize_with = "lenient_string"
    )]
    pub timestamp: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub block_number: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub gas_price: String,

    #[serde(default, deserialize_with = "lenient_string")]
    pub gas_used: String,

    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub token_decimal: Option<String>,

    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub token_symbol: Option<String>,
}

impl RawTransaction {
    /// Plain value movement with no contract call
    pub fn is_pure_transfer(&self) -> bool {
        self.input == "0x"
    }

    /// Unix timestamp, zero when malformed
    pub fn unix_timestamp(&self) -> i64 {
        self.timestamp.trim().parse().unwrap_or(0)
    }
}

// ============================================================================
// PART B: Directions and kinds
// ============================================================================

/// Direction of a classified edge relative to the explored address
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowDirection {
    In,
    Out,
}

impl FlowDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::In => "IN",
            FlowDirection::Out => "OUT",
        }
    }
}

impl std::fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlowDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(FlowDirection::In),
            "OUT" => Ok(FlowDirection::Out),
            other => Err(format!("unknown flow direction: {}", other)),
        }
    }
}

/// Which side of the graph a traversal follows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    /// Upstream: follow senders
    In,
    /// Downstream: follow recipients
    Out,
    /// Upstream run followed by an independent downstream run
    #[default]
    All,
}

impl std::fmt::Display for TraceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceDirection::In => write!(f, "in"),
            TraceDirection::Out => write!(f, "out"),
            TraceDirection::All => write!(f, "all"),
        }
    }
}

/// Explorer record family being traced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Normal transactions (`txlist`), valued in the native currency
    #[default]
    Native,
    /// ERC-20 transfer events (`tokentx`), valued in token units
    Token,
}

impl TransferKind {
    /// Explorer `action` parameter
    pub fn action(&self) -> &'static str {
        match self {
            TransferKind::Native => "txlist",
            TransferKind::Token => "tokentx",
        }
    }
}

// ============================================================================
// PART C: Trace
// ============================================================================

/// One directioned, unit-converted, depth-tagged transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEdge {
    /// BFS depth of the explored address (root = 1)
    pub layer: u32,

    /// Origin label of the frontier entry ("ROOT" or "L{n}")
    pub origin: String,

    /// Address being explored when the edge was produced
    pub address: String,

    pub hash: String,

    pub block: String,

    /// `%Y-%m-%d %H:%M:%S` UTC, empty when the explorer timestamp is malformed
    pub timestamp_utc: String,

    pub from: String,

    pub to: String,

    pub direction: FlowDirection,

    pub amount: f64,

    /// Fee in native units
    pub fee: f64,

    pub token_symbol: Option<String>,
}

impl ClassifiedEdge {
    /// `L{layer}` label used for origins and diagram legends
    pub fn layer_label(&self) -> String {
        layer_label(self.layer)
    }
}

pub fn layer_label(layer: u32) -> String {
    format!("L{}", layer)
}

/// Append-only ordered edge sequence produced by one traversal run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    edges: Vec<ClassifiedEdge>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, edge: ClassifiedEdge) {
        self.edges.push(edge);
    }

    pub fn edges(&self) -> &[ClassifiedEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClassifiedEdge> {
        self.edges.iter()
    }

    /// Earliest and latest edge timestamps
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut times = self.edges.iter().filter_map(|e| {
            chrono::NaiveDateTime::parse_from_str(&e.timestamp_utc, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.and_utc())
        });
        let first = times.next()?;
        Some(times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
    }
}

impl From<Vec<ClassifiedEdge>> for Trace {
    fn from(edges: Vec<ClassifiedEdge>) -> Self {
        Self { edges }
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a ClassifiedEdge;
    type IntoIter = std::slice::Iter<'a, ClassifiedEdge>;

    fn into_iter(self) -> Self::IntoIter {
        self.edges.iter()
    }
}

/// Address pending exploration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Display form as discovered
    pub address: String,
    pub depth: u32,
    pub origin: String,
}

impl FrontierEntry {
    pub fn root(address: &str) -> Self {
        Self {
            address: address.trim().to_string(),
            depth: 1,
            origin: ROOT_ORIGIN.to_string(),
        }
    }
}

// ============================================================================
// Metadata Schema
// ============================================================================

/// Run metadata for reproducibility and auditing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub schema_version: String,

    pub run_timestamp: DateTime<Utc>,

    pub root_address: String,

    pub direction: TraceDirection,

    pub kind: TransferKind,

    pub max_depth: u32,

    pub top_k_per_address: usize,

    pub start_block: u64,

    pub end_block: u64,

    pub record_counts: RecordCounts,

    /// Git commit hash (if available)
    pub git_commit: Option<String>,

    pub tool_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecordCounts {
    pub edges: usize,
    pub visited_upstream: usize,
    pub visited_downstream: usize,
    pub fetch_failures: usize,
    pub warnings: usize,
}

impl TraceMetadata {
    pub fn new(config: &crate::config::TraceConfig) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            run_timestamp: Utc::now(),
            root_address: config.root_address.clone(),
            direction: config.direction,
            kind: config.kind,
            max_depth: config.max_depth,
            top_k_per_address: config.top_k_per_address,
            start_block: config.start_block,
            end_block: config.end_block,
            record_counts: RecordCounts::default(),
            git_commit: get_git_commit(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn get_git_commit() -> Option<String> {
    std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_transaction_from_explorer_json() {
        let json = serde_json::json!({
            "blockNumber": "19000000",
            "timeStamp": "1705000000",
            "hash": "0xabc",
            "from": "0x1111111111111111111111111111111111111111",
            "to": "0x2222222222222222222222222222222222222222",
            "value": "1500000000000000000",
            "gasPrice": 20000000000u64,
            "gasUsed": "21000",
            "input": "0x",
            "isError": "0"
        });
        let tx: RawTransaction = serde_json::from_value(json).expect("decodes");
        assert_eq!(tx.timestamp, "1705000000");
        assert_eq!(tx.gas_price, "20000000000");
        assert_eq!(tx.block_number, "19000000");
        assert!(tx.is_pure_transfer());
        assert_eq!(tx.token_decimal, None);
    }

    #[test]
    fn test_raw_transaction_tolerates_nulls_and_missing_fields() {
        let json = serde_json::json!({
            "hash": "0xdef",
            "to": null,
            "timestamp": "12",
            "tokenSymbol": "USDT",
            "tokenDecimal": "6"
        });
        let tx: RawTransaction = serde_json::from_value(json).expect("decodes");
        assert_eq!(tx.to, "");
        assert_eq!(tx.from, "");
        assert_eq!(tx.unix_timestamp(), 12);
        assert_eq!(tx.token_symbol.as_deref(), Some("USDT"));
        assert_eq!(tx.token_decimal.as_deref(), Some("6"));
        assert!(!tx.is_pure_transfer());
    }

    #[test]
    fn test_direction_strings() {
        assert_eq!(FlowDirection::In.to_string(), "IN");
        assert_eq!("out".parse::<FlowDirection>(), Ok(FlowDirection::Out));
        assert!("sideways".parse::<FlowDirection>().is_err());
        assert_eq!(TraceDirection::All.to_string(), "all");
        assert_eq!(TransferKind::Token.action(), "tokentx");
    }

    #[test]
    fn test_trace_time_range() {
        let edge = |ts: &str| ClassifiedEdge {
            layer: 1,
            origin: ROOT_ORIGIN.to_string(),
            address: "0xa".into(),
            hash: "0x1".into(),
            block: "1".into(),
            timestamp_utc: ts.into(),
            from: "0xa".into(),
            to: "0xb".into(),
            direction: FlowDirection::Out,
            amount: 1.0,
            fee: 0.0,
            token_symbol: None,
        };
        let trace = Trace::from(vec![
            edge("2024-03-01 00:00:00"),
            edge(""),
            edge("2023-11-15 12:00:00"),
        ]);
        let (lo, hi) = trace.time_range().expect("has range");
        assert_eq!(lo.format("%Y-%m").to_string(), "2023-11");
        assert_eq!(hi.format("%Y-%m").to_string(), "2024-03");
        assert!(Trace::new().time_range().is_none());
    }

    #[test]
    fn test_schema_version() {
        assert!(!SCHEMA_VERSION.is_empty());
    }
}
