use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::{Expiry, future::Cache as MokaCache};
use regex::Regex;

use super::{CacheBackend, CacheError, CacheResult};

#[derive(Clone)]
struct Entry {
    json: Arc<str>,
    ttl: Duration,
}

/// Expires each entry after its own TTL.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(&self, _key: &String, value: &Entry, _updated_at: Instant, _duration_until_expiry: Option<Duration>) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-process cache.
pub struct MemoryCache {
    entries: MokaCache<String, Entry>,
    closed: AtomicBool,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            entries: MokaCache::builder().max_capacity(max_capacity).expire_after(PerEntryTtl).build(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_open()?;
        Ok(self.entries.get(key).await.map(|entry| entry.json.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        self.ensure_open()?;
        self.entries.insert(key.to_string(), Entry { json: value.into(), ttl }).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.ensure_open()?;
        Ok(self.entries.remove(key).await.is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.ensure_open()?;
        let matcher = glob_to_regex(pattern)?;

        let keys: Vec<Arc<String>> = self.entries.iter().map(|(key, _)| key).filter(|key| matcher.is_match(key)).collect();

        let mut deleted = 0;
        for key in keys {
            if self.entries.remove(key.as_str()).await.is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.entries.invalidate_all();
    }
}

/// Translate a Redis-style glob (`*`, `?`, `[...]`, `\` escapes) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '[' => {
                out.push('[');
                let mut first = true;
                for inner in chars.by_ref() {
                    match inner {
                        ']' => break,
                        '^' if first => out.push('^'),
                        '\\' | '[' => {
                            out.push('\\');
                            out.push(inner);
                        }
                        _ => out.push(inner),
                    }
                    first = false;
                }
                out.push(']');
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out)
}
