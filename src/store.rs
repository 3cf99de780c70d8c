//! Redis-backed test-data store
//!
//! Persistence is best-effort: the store connects lazily and degrades to a
//! no-op when Redis is unreachable, so a missing store never blocks a test
//! run. Callers that care about write outcomes get a `Result`; the monitor
//! and runner log failures and move on.
//!
//! Key schema (timestamps are `%Y-%m-%d %H:%M:%S`, scores are Unix seconds):
//!
//! - `monitor:pair{i}:{ts}`: hash of one resource sample
//! - `monitor:pair{i}:timeline`: zset of sample keys scored by time
//! - `test:pair{i}:{role}:{ts}:info`: hash of run metadata
//! - `test:pair{i}:{role}:{ts}:metrics`: hash of parsed report metrics
//! - `test:pair{i}:{role}:timeline`: zset of key prefixes scored by time

use crate::config::StoreConfig;
use crate::error::{AppError, Result};
use crate::report::StatsReport;
use chrono::NaiveDateTime;
use redis::Commands;
use std::collections::BTreeMap;

/// Timestamp layout used for keys and zset scores
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn monitor_key(pair_index: usize, timestamp: &str) -> String {
    format!("monitor:pair{}:{}", pair_index, timestamp)
}

pub fn monitor_timeline_key(pair_index: usize) -> String {
    format!("monitor:pair{}:timeline", pair_index)
}

pub fn test_key_prefix(pair_index: usize, role: &str, timestamp: &str) -> String {
    format!("test:pair{}:{}:{}", pair_index, role, timestamp)
}

pub fn test_timeline_key(pair_index: usize, role: &str) -> String {
    format!("test:pair{}:{}:timeline", pair_index, role)
}

/// Parse a schema timestamp into the zset score
pub fn timestamp_score(timestamp: &str) -> Result<f64> {
    let parsed = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| AppError::persistence(format!("bad timestamp {:?}: {}", timestamp, e)))?;
    Ok(parsed.and_utc().timestamp() as f64)
}

/// Info + metrics hashes read back for one stored run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredRun {
    pub info: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, String>,
}

/// Best-effort Redis store
pub struct RedisStore {
    conn: Option<redis::Connection>,
}

impl RedisStore {
    /// Connect per the configuration. A disabled store or an unreachable
    /// server yields a disconnected store that ignores writes.
    pub fn open(config: &StoreConfig) -> Self {
        if !config.enabled {
            return Self { conn: None };
        }
        let url = format!("redis://{}:{}/{}", config.host, config.port, config.db);
        match Self::try_connect(&url) {
            Ok(conn) => {
                log::info!("connected to redis at {}:{}", config.host, config.port);
                Self { conn: Some(conn) }
            }
            Err(e) => {
                log::warn!(
                    "redis at {}:{} unavailable, persistence disabled: {}",
                    config.host,
                    config.port,
                    e
                );
                Self { conn: None }
            }
        }
    }

    fn try_connect(url: &str) -> Result<redis::Connection> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection()?;
        redis::cmd("PING").query::<String>(&mut conn)?;
        Ok(conn)
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Persist one resource sample. Returns Ok(false) when disconnected.
    pub fn save_monitor_data(
        &mut self,
        pair_index: usize,
        timestamp: &str,
        cpu_usage: f64,
        ram_used_mb: u64,
        ram_total_mb: u64,
        ram_usage: f64,
    ) -> Result<bool> {
        let score = timestamp_score(timestamp)?;
        let Some(conn) = self.conn.as_mut() else {
            return Ok(false);
        };

        let key = monitor_key(pair_index, timestamp);
        let fields: Vec<(&str, String)> = vec![
            ("pair_index", pair_index.to_string()),
            ("timestamp", timestamp.to_string()),
            ("cpu_usage", cpu_usage.to_string()),
            ("ram_used", ram_used_mb.to_string()),
            ("ram_total", ram_total_mb.to_string()),
            ("ram_usage", ram_usage.to_string()),
        ];
        conn.hset_multiple::<_, _, _, ()>(&key, &fields)?;
        conn.zadd::<_, _, _, ()>(monitor_timeline_key(pair_index), &key, score)?;
        Ok(true)
    }

    /// Persist one parsed completion report. Returns Ok(false) when
    /// disconnected.
    pub fn save_test_output(
        &mut self,
        pair_index: usize,
        role: &str,
        report: &StatsReport,
        timestamp: &str,
    ) -> Result<bool> {
        let score = timestamp_score(timestamp)?;
        let Some(conn) = self.conn.as_mut() else {
            return Ok(false);
        };

        let prefix = test_key_prefix(pair_index, role, timestamp);

        let info: Vec<(&str, String)> = vec![
            ("pair_index", pair_index.to_string()),
            ("role", role.to_string()),
            ("timestamp", timestamp.to_string()),
        ];
        conn.hset_multiple::<_, _, _, ()>(format!("{}:info", prefix), &info)?;

        let metrics: Vec<(String, String)> = report
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        if !metrics.is_empty() {
            conn.hset_multiple::<_, _, _, ()>(format!("{}:metrics", prefix), &metrics)?;
        }

        conn.zadd::<_, _, _, ()>(test_timeline_key(pair_index, role), &prefix, score)?;
        Ok(true)
    }

    /// Fetch monitor samples inside an optional time window, oldest first.
    pub fn get_monitor_data(
        &mut self,
        pair_index: usize,
        start_time: Option<&str>,
        end_time: Option<&str>,
    ) -> Result<Vec<BTreeMap<String, String>>> {
        let min = match start_time {
            Some(ts) => timestamp_score(ts)?.to_string(),
            None => "-inf".to_string(),
        };
        let max = match end_time {
            Some(ts) => timestamp_score(ts)?.to_string(),
            None => "+inf".to_string(),
        };
        let Some(conn) = self.conn.as_mut() else {
            return Ok(Vec::new());
        };

        let keys: Vec<String> =
            conn.zrangebyscore(monitor_timeline_key(pair_index), min, max)?;
        let mut samples = Vec::with_capacity(keys.len());
        for key in keys {
            let sample: BTreeMap<String, String> = conn.hgetall(&key)?;
            if !sample.is_empty() {
                samples.push(sample);
            }
        }
        Ok(samples)
    }

    /// Fetch one stored run; with no timestamp, the most recent one.
    pub fn get_test_output(
        &mut self,
        pair_index: usize,
        role: &str,
        timestamp: Option<&str>,
    ) -> Result<Option<StoredRun>> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(None);
        };

        let prefix = match timestamp {
            Some(ts) => test_key_prefix(pair_index, role, ts),
            None => {
                let latest: Vec<String> =
                    conn.zrevrange(test_timeline_key(pair_index, role), 0, 0)?;
                match latest.into_iter().next() {
                    Some(prefix) => prefix,
                    None => return Ok(None),
                }
            }
        };

        let info: BTreeMap<String, String> = conn.hgetall(format!("{}:info", prefix))?;
        if info.is_empty() {
            return Ok(None);
        }
        let metrics: BTreeMap<String, String> = conn.hgetall(format!("{}:metrics", prefix))?;
        Ok(Some(StoredRun { info, metrics }))
    }

    /// Delete every monitor sample and test output stored for a pair.
    pub fn clear_pair(&mut self, pair_index: usize) -> Result<u64> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(0);
        };

        let mut deleted = 0u64;
        for pattern in [
            format!("monitor:pair{}:*", pair_index),
            format!("test:pair{}:*", pair_index),
        ] {
            let keys: Vec<String> = conn.keys(&pattern)?;
            if !keys.is_empty() {
                deleted += conn.del::<_, u64>(&keys)?;
            }
        }
        log::info!("cleared {} redis keys for pair {}", deleted, pair_index);
        Ok(deleted)
    }
}
