//! The optional `run`-command response cache (§4.7, §9). Keyed by the
//! stored SQL text, the concrete arguments, and the connection's
//! encoding. Invalidation on write is an explicit open question left to
//! the TTL -- see DESIGN.md.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use common::value::RawValue;

use crate::wire::WireValue;

fn raw_key(v: &RawValue) -> String {
    match v {
        RawValue::Integer(i) => format!("i{i}"),
        RawValue::Float(f) => format!("f{f}"),
        RawValue::Text(s) => format!("t{s}"),
        RawValue::Boolean(b) => format!("b{b}"),
        RawValue::TimestampPair(s, n) => format!("s{s}.{n}"),
        RawValue::Null => "n".to_string(),
    }
}

fn cache_key(sql: &str, args: &[RawValue], use_json: bool) -> String {
    let mut key = String::with_capacity(sql.len() + 8);
    key.push_str(sql);
    key.push('|');
    key.push(if use_json { 'j' } else { 'b' });
    for arg in args {
        key.push('|');
        key.push_str(&raw_key(arg));
    }
    key
}

struct Entry {
    value: WireValue,
    inserted_at: Instant,
}

/// A TTL-expiring cache of decoded `SELECT` results, shared process-wide
/// and keyed per the rule above. Last-write-wins: we don't lock per key
/// beyond what `DashMap` gives us, matching the cache's best-effort
/// nature (§9: "the TTL is the only safety net").
pub struct ResponseCache {
    ttl: Duration,
    entries: DashMap<String, Entry>,
    // Bounds the frequency of the sweep that evicts expired entries.
    last_swept: Mutex<Instant>,
}

impl ResponseCache {
    pub fn new(ttl_secs: u64) -> Self {
        ResponseCache {
            ttl: Duration::from_secs(ttl_secs),
            entries: DashMap::new(),
            last_swept: Mutex::new(Instant::now()),
        }
    }

    pub fn get(&self, sql: &str, args: &[RawValue], use_json: bool) -> Option<WireValue> {
        let key = cache_key(sql, args, use_json);
        let hit = self.entries.get(&key)?;
        if hit.inserted_at.elapsed() > self.ttl {
            drop(hit);
            self.entries.remove(&key);
            return None;
        }
        Some(hit.value.clone())
    }

    pub fn put(&self, sql: &str, args: &[RawValue], use_json: bool, value: WireValue) {
        let key = cache_key(sql, args, use_json);
        self.entries.insert(key, Entry { value, inserted_at: Instant::now() });
        self.maybe_sweep();
    }

    fn maybe_sweep(&self) {
        let mut last = self.last_swept.lock().unwrap();
        if last.elapsed() < self.ttl {
            return;
        }
        *last = Instant::now();
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= self.ttl);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn a_put_entry_is_retrievable_under_the_same_key() {
        let cache = ResponseCache::new(60);
        cache.put("SELECT 1", &[RawValue::Integer(1)], false, WireValue::Int(1));
        assert_eq!(cache.get("SELECT 1", &[RawValue::Integer(1)], false), Some(WireValue::Int(1)));
        assert!(cache.get("SELECT 1", &[RawValue::Integer(2)], false).is_none());
        assert!(cache.get("SELECT 1", &[RawValue::Integer(1)], true).is_none());
    }

    #[test]
    fn an_expired_entry_is_not_returned() {
        let cache = ResponseCache::new(0);
        cache.put("SELECT 1", &[], false, WireValue::Int(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("SELECT 1", &[], false).is_none());
    }
}
