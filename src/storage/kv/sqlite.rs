//! Key-value client over a shared SQLite database file.
//!
//! Every worker process opens its own connection to the same file. The busy
//! timeout doubles as the round-trip timeout: a write that cannot get the
//! lock within it fails with `StorageError::Timeout`.

use crate::core::config::ConnectionConfig;
use crate::core::db;
use crate::core::error::StorageResult;
use crate::core::schemas;
use crate::storage::kv::client::{KeyValueClient, ScoredMember};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct SqliteKvClient {
    conn: Connection,
    path: PathBuf,
}

impl SqliteKvClient {
    pub fn connect(config: &ConnectionConfig) -> StorageResult<Self> {
        Self::connect_path(&config.path, config.timeout())
    }

    pub fn connect_path(path: &Path, timeout: Duration) -> StorageResult<Self> {
        let conn = db::db_connect(path, timeout)?;
        db::apply_schemas(&conn, schemas::KV_DB_SCHEMAS)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // IMMEDIATE takes the write lock up front so check-then-write steps never
    // interleave with another connection's.
    fn write_transaction(&self) -> StorageResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    fn upsert(conn: &Connection, key: &str, field: &str, value: &[u8]) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO kv_hash(key, field, value) VALUES(?1, ?2, ?3)
             ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
            params![key, field, value],
        )?;
        Ok(())
    }
}

impl KeyValueClient for SqliteKvClient {
    fn hset(&self, key: &str, field: &str, value: &[u8]) -> StorageResult<()> {
        Self::upsert(&self.conn, key, field, value)
    }

    fn hset_multiple(&self, key: &str, fields: &[(&str, &[u8])]) -> StorageResult<()> {
        let tx = self.write_transaction()?;
        for (field, value) in fields {
            Self::upsert(&tx, key, field, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn hset_unless(
        &self,
        key: &str,
        field: &str,
        value: &[u8],
        guard_key: &str,
    ) -> StorageResult<bool> {
        let tx = self.write_transaction()?;
        let guarded: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM kv_hash WHERE key = ?1 AND field = ?2)",
            params![guard_key, field],
            |row| row.get(0),
        )?;
        if guarded {
            return Ok(false);
        }
        Self::upsert(&tx, key, field, value)?;
        tx.commit()?;
        Ok(true)
    }

    fn hget(&self, key: &str, field: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM kv_hash WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn hdel(&self, key: &str, field: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM kv_hash WHERE key = ?1 AND field = ?2",
            params![key, field],
        )?;
        Ok(changed > 0)
    }

    fn hlen(&self, key: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM kv_hash WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn hkeys(&self, key: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT field FROM kv_hash WHERE key = ?1 ORDER BY field")?;
        let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn hscan(
        &self,
        key: &str,
        after: Option<&str>,
        count: usize,
    ) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT field, value FROM kv_hash
             WHERE key = ?1 AND (?2 IS NULL OR field > ?2)
             ORDER BY field LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![key, after, count as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn hmove(
        &self,
        source: &str,
        destination: &str,
        field: &str,
        value: &[u8],
    ) -> StorageResult<bool> {
        let tx = self.write_transaction()?;
        let removed = tx.execute(
            "DELETE FROM kv_hash WHERE key = ?1 AND field = ?2",
            params![source, field],
        )?;
        if removed == 0 {
            return Ok(false);
        }
        Self::upsert(&tx, destination, field, value)?;
        tx.commit()?;
        Ok(true)
    }

    fn zadd(&self, key: &str, member: &str, score: i64) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO kv_sorted_set(key, member, score) VALUES(?1, ?2, ?3)
             ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
            params![key, member, score],
        )?;
        Ok(())
    }

    fn zrem(&self, key: &str, member: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM kv_sorted_set WHERE key = ?1 AND member = ?2",
            params![key, member],
        )?;
        Ok(changed > 0)
    }

    fn zscan(
        &self,
        key: &str,
        after: Option<&ScoredMember>,
        count: usize,
    ) -> StorageResult<Vec<ScoredMember>> {
        let (after_score, after_member) = match after {
            Some(entry) => (Some(entry.score), Some(entry.member.as_str())),
            None => (None, None),
        };
        let mut stmt = self.conn.prepare(
            "SELECT score, member FROM kv_sorted_set
             WHERE key = ?1
               AND (?2 IS NULL OR score > ?2 OR (score = ?2 AND member > ?3))
             ORDER BY score, member LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![key, after_score, after_member, count as i64],
            |row| {
                Ok(ScoredMember {
                    score: row.get(0)?,
                    member: row.get(1)?,
                })
            },
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM kv_hash WHERE key = ?1)
                 OR EXISTS(SELECT 1 FROM kv_sorted_set WHERE key = ?1)",
            params![key],
            |row| row.get(0),
        )?)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let tx = self.write_transaction()?;
        let hashes = tx.execute("DELETE FROM kv_hash WHERE key = ?1", params![key])?;
        let sorted = tx.execute("DELETE FROM kv_sorted_set WHERE key = ?1", params![key])?;
        tx.commit()?;
        Ok(hashes + sorted > 0)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT key FROM kv_hash WHERE substr(key, 1, length(?1)) = ?1
             UNION
             SELECT key FROM kv_sorted_set WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;
        let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}
