//! Object key derivation.
//!
//! Keys are Hive-style partitioned by the batch's start date so analytical
//! engines can prune by path:
//!
//! `{prefix}/year=YYYY/month=MM/day=DD/{start}_{end}_{archive_id}.parquet`

use chrono::{DateTime, Datelike, Utc};

use coldchain_contracts::archive::TimeRange;

const COMPACT_TIMESTAMP: &str = "%Y%m%dT%H%M%SZ";

fn compact(ts: DateTime<Utc>) -> String {
    ts.format(COMPACT_TIMESTAMP).to_string()
}

/// Deterministic key for a batch. The archive id makes it collision-free.
pub fn archive_key(prefix: &str, time_range: &TimeRange, archive_id: &str) -> String {
    let start = time_range.start;
    let file = format!(
        "year={:04}/month={:02}/day={:02}/{}_{}_{}.parquet",
        start.year(),
        start.month(),
        start.day(),
        compact(start),
        compact(time_range.end),
        archive_id
    );

    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file
    } else {
        format!("{prefix}/{file}")
    }
}
