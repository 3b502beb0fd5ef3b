//! Turns raw explorer records into directioned, unit-converted edges.

use crate::ethereum::{native_fee, same_address, to_decimal, token_decimals, NATIVE_DECIMALS};
use crate::schemas::{ClassifiedEdge, FlowDirection, RawTransaction, TraceDirection, TransferKind};
use chrono::DateTime;

/// Timestamp layout used in exported traces
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Filters applied while classifying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyMode {
    pub direction: TraceDirection,
    pub pure_transfers_only: bool,
    pub kind: TransferKind,
}

impl ClassifyMode {
    pub fn new(direction: TraceDirection, pure_transfers_only: bool, kind: TransferKind) -> Self {
        Self {
            direction,
            pure_transfers_only,
            kind,
        }
    }
}

/// Classify `tx` relative to `current_address`.
///
/// Returns `None` for contract calls (when filtered), for transactions that do
/// not touch the address, and for edges outside the mode's direction.
pub fn classify(
    tx: &RawTransaction,
    current_address: &str,
    depth: u32,
    origin: &str,
    mode: &ClassifyMode,
) -> Option<ClassifiedEdge> {
    if mode.pure_transfers_only && mode.kind == TransferKind::Native && !tx.is_pure_transfer() {
        return None;
    }

    let inbound = same_address(&tx.to, current_address);
    let outbound = same_address(&tx.from, current_address);
    // A self-transfer takes the traced side; `all` reads it as inbound
    let direction = match mode.direction {
        TraceDirection::In if inbound => FlowDirection::In,
        TraceDirection::Out if outbound => FlowDirection::Out,
        TraceDirection::All if inbound => FlowDirection::In,
        TraceDirection::All if outbound => FlowDirection::Out,
        _ => return None,
    };

    let decimals = match mode.kind {
        TransferKind::Native => NATIVE_DECIMALS,
        TransferKind::Token => token_decimals(tx.token_decimal.as_deref()),
    };

    Some(ClassifiedEdge {
        layer: depth,
        origin: origin.to_string(),
        address: current_address.to_string(),
        hash: tx.hash.clone(),
        block: tx.block_number.clone(),
        timestamp_utc: format_timestamp(&tx.timestamp),
        from: tx.from.clone(),
        to: tx.to.clone(),
        direction,
        amount: to_decimal(&tx.value, decimals),
        fee: native_fee(&tx.gas_price, &tx.gas_used),
        token_symbol: match mode.kind {
            TransferKind::Native => None,
            TransferKind::Token => tx.token_symbol.clone(),
        },
    })
}

/// Unix seconds to UTC text; empty when malformed
pub fn format_timestamp(raw: &str) -> String {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}
