//! Trace persistence.
//!
//! Traces are written as CSV and zstd-compressed Parquet inside a per-root run
//! folder (`{wallet6}_{YYYY}_{MM}`), named after the months they cover
//! (`{wallet6}_{YYYY-MM}_{YYYY-MM}`). Earlier runs are found again by that
//! naming so a trace can be re-rendered without refetching.

use crate::ethereum::short_prefix;
use crate::schemas::{ClassifiedEdge, FlowDirection, Trace};
use chrono::{DateTime, Datelike, Utc};
use polars::prelude::*;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};

/// `_YYYY-MM_YYYY-MM` at the end of a file stem
static FILE_RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_(\d{4})-(\d{2})_(\d{4})-(\d{2})$").expect("Invalid regex pattern")
});

/// `_YYYY_MM` suffix of a run folder name
static RUN_FOLDER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_\d{4}_\d{2}$").expect("Invalid regex pattern"));

const COLUMNS: [&str; 12] = [
    "layer",
    "origin",
    "address",
    "hash",
    "block",
    "timestamp_utc",
    "from",
    "to",
    "direction",
    "amount",
    "fee",
    "token_symbol",
];

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Calendar months covered by a saved trace, from its file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthSpan {
    pub start_year: i32,
    pub start_month: u32,
    pub end_year: i32,
    pub end_month: u32,
}

impl MonthSpan {
    /// Parse the trailing `_YYYY-MM_YYYY-MM` of a file stem
    pub fn from_stem(stem: &str) -> Option<Self> {
        let caps = FILE_RANGE_PATTERN.captures(stem)?;
        let span = Self {
            start_year: caps[1].parse().ok()?,
            start_month: caps[2].parse().ok()?,
            end_year: caps[3].parse().ok()?,
            end_month: caps[4].parse().ok()?,
        };
        let months_valid = (1..=12).contains(&span.start_month) && (1..=12).contains(&span.end_month);
        months_valid.then_some(span)
    }
}

/// A previously written trace file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingTrace {
    pub path: PathBuf,
    pub span: MonthSpan,
}

/// `{wallet6}_{YYYY-MM}_{YYYY-MM}` from the trace's first and last edge
/// timestamps, or from `fallback` when no edge carries a timestamp
pub fn trace_file_stem(
    root: &str,
    trace: &Trace,
    fallback: (DateTime<Utc>, DateTime<Utc>),
) -> String {
    let (start, end) = trace.time_range().unwrap_or(fallback);
    format!(
        "{}_{}_{}",
        short_prefix(root),
        start.format("%Y-%m"),
        end.format("%Y-%m")
    )
}

/// Run folder for `root` in the month of `now`
pub fn run_folder(output_dir: &Path, root: &str, now: DateTime<Utc>) -> PathBuf {
    output_dir.join(format!(
        "{}_{:04}_{:02}",
        short_prefix(root),
        now.year(),
        now.month()
    ))
}

fn trace_frame(trace: &Trace) -> Result<DataFrame, ExportError> {
    let edges = trace.edges();
    let df = DataFrame::new(vec![
        Column::new("layer".into(), edges.iter().map(|e| e.layer).collect::<Vec<u32>>()),
        Column::new("origin".into(), edges.iter().map(|e| e.origin.as_str()).collect::<Vec<_>>()),
        Column::new("address".into(), edges.iter().map(|e| e.address.as_str()).collect::<Vec<_>>()),
        Column::new("hash".into(), edges.iter().map(|e| e.hash.as_str()).collect::<Vec<_>>()),
        Column::new("block".into(), edges.iter().map(|e| e.block.as_str()).collect::<Vec<_>>()),
        Column::new(
            "timestamp_utc".into(),
            edges.iter().map(|e| e.timestamp_utc.as_str()).collect::<Vec<_>>(),
        ),
        Column::new("from".into(), edges.iter().map(|e| e.from.as_str()).collect::<Vec<_>>()),
        Column::new("to".into(), edges.iter().map(|e| e.to.as_str()).collect::<Vec<_>>()),
        Column::new(
            "direction".into(),
            edges.iter().map(|e| e.direction.as_str()).collect::<Vec<_>>(),
        ),
        Column::new("amount".into(), edges.iter().map(|e| e.amount).collect::<Vec<f64>>()),
        Column::new("fee".into(), edges.iter().map(|e| e.fee).collect::<Vec<f64>>()),
        Column::new(
            "token_symbol".into(),
            edges
                .iter()
                .map(|e| e.token_symbol.as_deref())
                .collect::<Vec<Option<&str>>>(),
        ),
    ])?;
    Ok(df)
}

/// Write the trace as CSV with a header row
pub fn write_trace_csv(trace: &Trace, output_path: &Path) -> Result<usize, ExportError> {
    info!("Writing {} edges to {:?}", trace.len(), output_path);
    let mut df = trace_frame(trace)?;
    let mut file = std::fs::File::create(output_path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)?;
    Ok(df.height())
}

/// Write the trace as zstd-compressed Parquet
pub fn write_trace_parquet(trace: &Trace, output_path: &Path) -> Result<usize, ExportError> {
    info!("Writing {} edges to {:?}", trace.len(), output_path);
    let mut df = trace_frame(trace)?;
    let file = std::fs::File::create(output_path)?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Zstd(None))
        .finish(&mut df)?;
    Ok(df.height())
}

/// Read a trace written by [`write_trace_csv`] or [`write_trace_parquet`],
/// chosen by file extension
pub fn read_trace(path: &Path) -> Result<Trace, ExportError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let df = match extension.as_str() {
        "csv" => CsvReadOptions::default()
            .with_has_header(true)
            // everything as text; parsed per column below
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        "parquet" => {
            let file = std::fs::File::open(path)?;
            ParquetReader::new(file).finish()?
        }
        other => {
            return Err(ExportError::InvalidData(format!(
                "unsupported trace file extension '{}' for {:?}",
                other, path
            )))
        }
    };

    let trace = frame_to_trace(&df)?;
    info!("Loaded {} edges from {:?}", trace.len(), path);
    Ok(trace)
}

fn text_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, ExportError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn parse_cell<T: std::str::FromStr>(
    value: Option<&String>,
    column: &str,
    row: usize,
) -> Result<T, ExportError> {
    let raw = value.map(|s| s.trim()).unwrap_or("");
    raw.parse().map_err(|_| {
        ExportError::InvalidData(format!("row {}: bad {} value '{}'", row, column, raw))
    })
}

fn frame_to_trace(df: &DataFrame) -> Result<Trace, ExportError> {
    let columns = COLUMNS
        .iter()
        .map(|name| text_column(df, name))
        .collect::<Result<Vec<_>, _>>()?;
    let cell = |col: usize, row: usize| columns[col][row].clone().unwrap_or_default();

    let mut trace = Trace::new();
    for row in 0..df.height() {
        let direction: FlowDirection = cell(8, row)
            .parse()
            .map_err(|e: String| ExportError::InvalidData(format!("row {}: {}", row, e)))?;
        let token_symbol = columns[11][row].clone().filter(|s| !s.is_empty());

        trace.push(ClassifiedEdge {
            layer: parse_cell(columns[0][row].as_ref(), COLUMNS[0], row)?,
            origin: cell(1, row),
            address: cell(2, row),
            hash: cell(3, row),
            block: cell(4, row),
            timestamp_utc: cell(5, row),
            from: cell(6, row),
            to: cell(7, row),
            direction,
            amount: parse_cell(columns[9][row].as_ref(), COLUMNS[9], row)?,
            fee: parse_cell(columns[10][row].as_ref(), COLUMNS[10], row)?,
            token_symbol,
        });
    }
    Ok(trace)
}

fn is_trace_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("csv") || e.eq_ignore_ascii_case("parquet"))
}

fn collect_candidates(
    dir: &Path,
    prefix: &str,
    out: &mut Vec<(SystemTime, ExistingTrace)>,
) -> Result<(), ExportError> {
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || !is_trace_file(&path) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !stem.to_ascii_lowercase().starts_with(&format!("{}_", prefix)) {
            continue;
        }
        let Some(span) = MonthSpan::from_stem(stem) else {
            continue;
        };
        let modified = entry.metadata()?.modified()?;
        out.push((modified, ExistingTrace { path, span }));
    }
    Ok(())
}

/// Most recently modified trace file for `root` under `output_dir`, looking
/// both in the directory itself and in every `{wallet6}_YYYY_MM` run folder
pub fn find_existing_trace(
    output_dir: &Path,
    root: &str,
) -> Result<Option<ExistingTrace>, ExportError> {
    if !output_dir.is_dir() {
        return Ok(None);
    }
    let prefix = short_prefix(root).to_ascii_lowercase();

    let mut candidates = Vec::new();
    collect_candidates(output_dir, &prefix, &mut candidates)?;

    for entry in std::fs::read_dir(output_dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        let is_run_folder = name
            .strip_prefix(&prefix)
            .map_or(false, |rest| RUN_FOLDER_SUFFIX.is_match(rest));
        if is_run_folder {
            collect_candidates(&path, &prefix, &mut candidates)?;
        }
    }

    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    debug!(
        "Found {} saved traces for prefix {}",
        candidates.len(),
        prefix
    );
    Ok(candidates.into_iter().next().map(|(_, found)| found))
}
