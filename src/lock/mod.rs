//! Distributed mutual exclusion keyed by (product, store).
//!
//! The lock is advisory: the version check in the ledger is the
//! authoritative guard against lost updates. Holding the lock serializes
//! the read-then-write window so insufficient-stock checks run against the
//! value actually in effect, and keeps hot keys off the version column.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::time::{Duration, Instant};
use tracing::{error, warn};
use uuid::Uuid;

/// Builds the canonical lock key for a (product, store) pair.
pub fn inventory_lock_key(product_id: Uuid, store_id: Uuid) -> String {
    format!("inventory_lock:{product_id}:{store_id}")
}

/// Single-holder mutual exclusion with a TTL safety net.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Non-blocking acquisition. Returns `true` iff the caller now holds
    /// exclusive possession of `key` for at most `ttl`. Returns `false`
    /// when the key is already held, and also when the backend errored
    /// (logged); the caller surfaces a lock failure either way.
    async fn acquire(&self, key: &str, ttl: Duration) -> bool;

    /// Unconditional, idempotent release. Failures are logged and never
    /// propagated: the TTL reclaims a stuck key on its own.
    async fn release(&self, key: &str);
}

/// Redis-backed lock using `SET key v NX EX ttl` on a shared connection.
pub struct RedisLockManager {
    conn: ConnectionManager,
}

impl RedisLockManager {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn acquire(&self, key: &str, ttl: Duration) -> bool {
        let mut conn = self.conn.clone();
        let outcome: Result<Option<String>, redis::RedisError> = redis::cmd("SET")
            .arg(key)
            .arg("locked")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await;

        match outcome {
            Ok(reply) => reply.is_some(),
            Err(e) => {
                error!(key = %key, error = %e, "distributed lock acquisition failed");
                false
            }
        }
    }

    async fn release(&self, key: &str) {
        let mut conn = self.conn.clone();
        let outcome: Result<(), redis::RedisError> =
            redis::cmd("DEL").arg(key).query_async(&mut conn).await;
        if let Err(e) = outcome {
            warn!(key = %key, error = %e, "distributed lock release failed; TTL will reclaim it");
        }
    }
}

/// Process-local lock manager backing the `memory` backend and the test
/// suite. Expired entries are treated as free and overwritten in place.
#[derive(Default)]
pub struct MemoryLockManager {
    locks: DashMap<String, Instant>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn acquire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut acquired = false;

        self.locks
            .entry(key.to_string())
            .and_modify(|expires_at| {
                if *expires_at <= now {
                    *expires_at = now + ttl;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                now + ttl
            });

        acquired
    }

    async fn release(&self, key: &str) {
        self.locks.remove(key);
    }
}
