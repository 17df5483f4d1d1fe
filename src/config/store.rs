use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sqlx::SqlitePool;

use crate::timeutil::{now_str, parse_utc};

#[derive(Debug)]
pub enum StoreError {
    Db(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err)
    }
}

struct CacheEntry {
    value: Option<String>,
    fetched_at: Instant,
}

/// Namespaced key/value configuration backed by `config_values`, with a
/// short in-memory TTL cache. Writes go through the store and invalidate
/// the local cache entry; other processes converge when their TTL lapses.
#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl ConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_ttl(pool, Duration::from_secs(5))
    }

    pub fn with_ttl(pool: SqlitePool, ttl: Duration) -> Self {
        Self {
            pool,
            cache: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Cache-free store for tests and one-shot tooling.
    pub fn uncached(pool: SqlitePool) -> Self {
        Self::with_ttl(pool, Duration::ZERO)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get(&self, label: &str) -> Result<Option<String>, StoreError> {
        if let Some(value) = self.cached(label) {
            return Ok(value);
        }

        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM config_values WHERE label = ?")
                .bind(label)
                .fetch_optional(&self.pool)
                .await?;

        self.remember(label, value.clone());
        Ok(value)
    }

    pub async fn set(&self, label: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO config_values (label, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(label) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(label)
        .bind(value)
        .bind(now_str())
        .execute(&self.pool)
        .await?;

        self.invalidate(label);
        Ok(())
    }

    pub async fn delete(&self, label: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM config_values WHERE label = ?")
            .bind(label)
            .execute(&self.pool)
            .await?;

        self.invalidate(label);
        Ok(())
    }

    pub fn invalidate(&self, label: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(label);
        }
    }

    pub async fn get_bool(&self, label: &str, default: bool) -> Result<bool, StoreError> {
        Ok(self
            .get(label)
            .await?
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(default))
    }

    pub async fn set_bool(&self, label: &str, value: bool) -> Result<(), StoreError> {
        self.set(label, if value { "1" } else { "0" }).await
    }

    pub async fn get_i64(&self, label: &str, default: i64) -> Result<i64, StoreError> {
        Ok(self
            .get(label)
            .await?
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(default))
    }

    pub async fn set_i64(&self, label: &str, value: i64) -> Result<(), StoreError> {
        self.set(label, &value.to_string()).await
    }

    pub async fn get_f64(&self, label: &str, default: f64) -> Result<f64, StoreError> {
        Ok(self
            .get(label)
            .await?
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .unwrap_or(default))
    }

    pub async fn get_string(&self, label: &str, default: &str) -> Result<String, StoreError> {
        Ok(self
            .get(label)
            .await?
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    /// Reads an epoch-seconds value; accepts either a bare integer or an
    /// RFC3339 timestamp.
    pub async fn get_epoch(&self, label: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.get(label).await?.and_then(|raw| {
            let raw = raw.trim();
            raw.parse::<i64>()
                .ok()
                .or_else(|| parse_utc(raw).map(|dt| dt.timestamp()))
        }))
    }

    fn cached(&self, label: &str) -> Option<Option<String>> {
        if self.ttl.is_zero() {
            return None;
        }
        let cache = self.cache.lock().ok()?;
        let entry = cache.get(label)?;
        if entry.fetched_at.elapsed() <= self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn remember(&self, label: &str, value: Option<String>) {
        if self.ttl.is_zero() {
            return;
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                label.to_string(),
                CacheEntry {
                    value,
                    fetched_at: Instant::now(),
                },
            );
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
