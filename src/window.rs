//! Calendar-month time windows and their block range.

use crate::explorer::ExplorerApi;
use anyhow::Context;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use tracing::{info, warn};

/// First month with Ethereum mainnet history; start of a full-history window
pub const GENESIS_MONTH: (i32, u32) = (2015, 7);

/// A `YYYY-MM` month
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> anyhow::Result<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .with_context(|| format!("invalid month {}-{:02}", year, month))?;
        Ok(Self { year, month })
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        let date = NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d")
            .with_context(|| format!("expected YYYY-MM, got '{}'", value))?;
        Ok(Self {
            year: date.year(),
            month: date.month(),
        })
    }

    pub fn of(dt: DateTime<Utc>) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
        }
    }

    fn next(self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    /// 00:00:00 UTC on the first day
    pub fn first_instant(self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }

    /// 23:59:59 UTC on the last day
    pub fn last_instant(self) -> DateTime<Utc> {
        self.next().first_instant() - chrono::Duration::seconds(1)
    }
}

impl std::fmt::Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Months to trace; `start == None` means full history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: Option<Month>,
    pub end: Month,
}

impl MonthWindow {
    pub fn new(start: Option<Month>, end: Month) -> Self {
        Self { start, end }
    }

    /// Window boundaries used to name a trace that has no timestamps
    pub fn naming_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start.unwrap_or(Month {
            year: GENESIS_MONTH.0,
            month: GENESIS_MONTH.1,
        });
        (start.first_instant(), self.end.first_instant())
    }

    /// Resolve to an inclusive block range. A failed lookup yields block 0
    /// (open ended for the end block); reversed ranges are swapped.
    pub async fn resolve_blocks<A: ExplorerApi>(&self, api: &A) -> (u64, u64) {
        let mut end_block = lookup_block(api, self.end.last_instant()).await;
        let mut start_block = match self.start {
            Some(start) => lookup_block(api, start.first_instant()).await,
            None => 0,
        };

        if end_block != 0 && start_block != 0 && end_block < start_block {
            warn!(
                "Block range {}..{} is reversed; swapping",
                start_block, end_block
            );
            std::mem::swap(&mut start_block, &mut end_block);
        }

        info!(
            "Window {}..{} resolves to blocks {}..{}",
            self.start.map_or("genesis".to_string(), |m| m.to_string()),
            self.end,
            start_block,
            end_block
        );
        (start_block, end_block)
    }
}

async fn lookup_block<A: ExplorerApi>(api: &A, at: DateTime<Utc>) -> u64 {
    match api.block_by_timestamp(at.timestamp()).await {
        Ok(block) => block,
        Err(e) => {
            warn!("Block lookup for {} failed: {}", at, e);
            0
        }
    }
}
