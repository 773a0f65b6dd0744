// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed key/value store with typed projections.
//!
//! One `kv(key, value)` table; values are JSON. Projections: project rows
//! under `project/<uuid>`, revocations under `revocation/<uuid>`, the host
//! identity under `host/identity`.

use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::Mutex;
use rand::RngCore;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{AccountRevocation, ProjectRow};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row {key:?}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown project {0}")]
    UnknownProject(Uuid),
}

/// Handle to the host's local database. Cheap to share behind an `Arc`;
/// the connection is serialized by a mutex with single-statement critical
/// sections.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS kv (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    fn delete_raw(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn.lock();
        let like = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt =
            conn.prepare("SELECT key, value FROM kv WHERE key LIKE ?1 ESCAPE '\\'")?;
        let rows = stmt.query_map([&like], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_raw(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { key: key.to_string(), source }),
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)
            .map_err(|source| StoreError::Corrupt { key: key.to_string(), source })?;
        self.put_raw(key, &raw)
    }

    // ---- host identity ----

    /// The stable host UUID, chosen at first boot and persisted.
    pub fn host_identity(&self) -> Result<Uuid, StoreError> {
        if let Some(id) = self.get_json::<Uuid>("host/identity")? {
            return Ok(id);
        }
        let id = Uuid::new_v4();
        self.put_json("host/identity", &id)?;
        tracing::info!(%id, "chose host identity");
        Ok(id)
    }

    /// Override the identity (from `PROJECT_HOST_ID`).
    pub fn set_host_identity(&self, id: Uuid) -> Result<(), StoreError> {
        self.put_json("host/identity", &id)
    }

    // ---- projects ----

    pub fn project(&self, id: Uuid) -> Result<Option<ProjectRow>, StoreError> {
        self.get_json(&format!("project/{id}"))
    }

    pub fn upsert_project(&self, row: &ProjectRow) -> Result<(), StoreError> {
        self.put_json(&format!("project/{}", row.project_id), row)
    }

    pub fn delete_project(&self, id: Uuid) -> Result<(), StoreError> {
        self.delete_raw(&format!("project/{id}"))
    }

    pub fn projects(&self) -> Result<Vec<ProjectRow>, StoreError> {
        let mut out = Vec::new();
        for (key, raw) in self.list_prefix("project/")? {
            let row = serde_json::from_str(&raw)
                .map_err(|source| StoreError::Corrupt { key, source })?;
            out.push(row);
        }
        Ok(out)
    }

    /// The project's secret token, generated on first read and persisted.
    /// Never returned by any master-facing API.
    pub fn project_secret(&self, id: Uuid) -> Result<String, StoreError> {
        let mut row = self.project(id)?.ok_or(StoreError::UnknownProject(id))?;
        if row.secret_token.is_empty() {
            row.secret_token = generate_secret();
            self.upsert_project(&row)?;
        }
        Ok(row.secret_token)
    }

    // ---- account revocations ----

    pub fn revocation(&self, account_id: Uuid) -> Result<Option<AccountRevocation>, StoreError> {
        self.get_json(&format!("revocation/{account_id}"))
    }

    /// Record a revocation, keeping the highest watermark seen.
    pub fn apply_revocation(&self, rev: AccountRevocation) -> Result<(), StoreError> {
        let merged = match self.revocation(rev.account_id)? {
            Some(existing) if existing.revoked_before_ms >= rev.revoked_before_ms => existing,
            _ => rev,
        };
        self.put_json(&format!("revocation/{}", rev.account_id), &merged)
    }

    /// Watermark for revocation sync: the largest `updated_ms` stored.
    pub fn revocation_cursor(&self) -> Result<u64, StoreError> {
        let mut cursor = 0;
        for (key, raw) in self.list_prefix("revocation/")? {
            let rev: AccountRevocation = serde_json::from_str(&raw)
                .map_err(|source| StoreError::Corrupt { key, source })?;
            cursor = cursor.max(rev.updated_ms);
        }
        Ok(cursor)
    }
}

/// 256-bit base64url secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
