//! Shard Planner
//!
//! Splits a run into independent units of work, one worker process each.
//!
//! - no sharding: a single shard named `single` without a filter
//! - explicit ranges from the plugin, used verbatim
//! - a computed date range cut into consecutive windows

use crate::plugin::{Interval, PluginConfig, ShardingConfig};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Timelike, Utc};
use reindex_common::{ReindexError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Environment variable carrying a worker's JSON-encoded [`ShardSpec`]
pub const WORKER_SHARD_ENV: &str = "REINDEX_WORKER_SHARD";

/// Name of the only shard of an unsharded run
pub const SINGLE_SHARD: &str = "single";

/// One independent unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeFilter>,
}

/// `field >= gte AND field < lt`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub field: String,
    pub gte: Value,
    pub lt: Value,
}

impl RangeFilter {
    /// Range query clause for the search body
    pub fn to_query(&self) -> Value {
        json!({
            "range": {
                self.field.as_str(): { "gte": self.gte, "lt": self.lt }
            }
        })
    }
}

impl ShardSpec {
    pub fn single() -> Self {
        Self {
            name: SINGLE_SHARD.to_string(),
            range: None,
        }
    }

    /// Value handed to a worker through [`WORKER_SHARD_ENV`]
    pub fn to_env_value(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_env_value(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| ReindexError::worker(format!("invalid shard handoff: {}", e)))
    }

    /// Shard assigned to this process, if it was started as a worker
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(WORKER_SHARD_ENV) {
            Ok(raw) => Self::from_env_value(&raw).map(Some),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ReindexError::worker(format!(
                "{} is not valid unicode: {}",
                WORKER_SHARD_ENV, e
            ))),
        }
    }
}

/// Compute the shards of a run
///
/// `now` stands in for a missing `end` of a computed date range.
pub fn plan_shards(
    plugin: Option<&PluginConfig>,
    concurrency: usize,
    now: DateTime<Utc>,
) -> Result<Vec<ShardSpec>> {
    let Some(sharded) = plugin.and_then(|p| p.sharded.as_ref()) else {
        return Ok(vec![ShardSpec::single()]);
    };

    if let Some(ranges) = &sharded.ranges {
        if ranges.is_empty() {
            return Err(ReindexError::config("sharded plugin has an empty range list"));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = ranges.iter().find(|r| !seen.insert(r.name.as_str())) {
            return Err(ReindexError::config(format!(
                "shard name '{}' is used more than once",
                duplicate.name
            )));
        }
        return Ok(ranges
            .iter()
            .map(|named| ShardSpec {
                name: named.name.clone(),
                range: Some(RangeFilter {
                    field: sharded.field.clone(),
                    gte: named.range.gte.clone(),
                    lt: named.range.lt.clone(),
                }),
            })
            .collect());
    }

    plan_date_range(sharded, concurrency, now)
}

fn plan_date_range(
    sharded: &ShardingConfig,
    concurrency: usize,
    now: DateTime<Utc>,
) -> Result<Vec<ShardSpec>> {
    let start = sharded
        .start
        .as_deref()
        .ok_or_else(|| ReindexError::config("Start time has to be defined in sharded indexer."))
        .and_then(parse_instant)?;
    let end = match sharded.end.as_deref() {
        Some(end) => parse_instant(end)?,
        None => now,
    };

    let days = match &sharded.interval {
        Some(interval) => interval_days(interval),
        None => computed_interval_days(start, end, concurrency),
    };

    Ok(split_date_range(start, end, days)
        .into_iter()
        .map(|(gte, lt)| ShardSpec {
            name: format!("{}-{}", gte.format("%y%m%d"), lt.format("%y%m%d")),
            range: Some(RangeFilter {
                field: sharded.field.clone(),
                gte: Value::String(format_bound(gte)),
                lt: Value::String(format_bound(lt)),
            }),
        })
        .collect())
}

/// Days per shard for an explicit interval
///
/// `month` is 30 days, `week` 7, a number is taken as is; anything else,
/// including zero or negative counts, falls back to one day.
pub fn interval_days(interval: &Interval) -> i64 {
    let days = match interval {
        Interval::Days(days) => *days,
        Interval::Token(token) => match token.trim() {
            "month" => 30,
            "week" => 7,
            other => leading_integer(other).unwrap_or(1),
        },
    };
    days.max(1)
}

/// Days per shard when no interval is given: the span spread over `concurrency` shards
pub fn computed_interval_days(start: DateTime<Utc>, end: DateTime<Utc>, concurrency: usize) -> i64 {
    let total_days = (end - start).num_days().max(0);
    let shards = i64::try_from(concurrency.max(1)).unwrap_or(i64::MAX);
    ((total_days + shards - 1) / shards).max(1)
}

/// Cut `[start, end)` into consecutive windows of `days` days
///
/// The windows never overlap, cover the span exactly and the last one is
/// clipped to `end`. At least one window is always returned. A step beyond
/// chrono's range yields a single window.
pub fn split_date_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    days: i64,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let step = TimeDelta::try_days(days.max(1));
    let mut windows = Vec::new();
    let mut current = start;

    loop {
        let window_end = step
            .and_then(|step| current.checked_add_signed(step))
            .map_or(end, |next| next.min(end));
        windows.push((current, window_end));
        current = window_end;
        if current >= end {
            break;
        }
    }

    windows
}

/// `YYYY-MM-DD` at midnight, a full RFC 3339 timestamp otherwise
fn format_bound(instant: DateTime<Utc>) -> String {
    if instant.num_seconds_from_midnight() == 0 && instant.nanosecond() == 0 {
        instant.format("%Y-%m-%d").to_string()
    } else {
        instant.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    Err(ReindexError::config(format!(
        "invalid date '{}', expected YYYY-MM-DD or an RFC 3339 timestamp",
        raw
    )))
}

/// Integer prefix of a string, e.g. `"10d"` is 10
fn leading_integer(raw: &str) -> Option<i64> {
    let end = raw
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    raw[..end].parse().ok()
}
