// SPDX-License-Identifier: MIT OR Apache-2.0
//! Session records.
//!
//! Ids are 256-bit random values minted by the crypto primitive; scripted
//! code never supplies one. Expiry is a sliding window renewed on every
//! authenticated touch, and expired rows are garbage-collected by the
//! sweep the event loop schedules between dispatches.

use hull_capability::crypto;
use hull_capability::db::Db;
use hull_core::{CapError, CapResult};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::debug;

/// Default sliding window: seven days.
pub const DEFAULT_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// One live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// 256-bit random identifier, hex.
    pub id: String,
    /// App-defined fields.
    pub user_fields: BTreeMap<String, Value>,
    /// Unix seconds of creation.
    pub created_at: i64,
    /// Unix seconds of the last touch.
    pub last_seen: i64,
    /// Unix seconds after which the session is dead.
    pub expires_at: i64,
}

/// Session operations over the app database.
#[derive(Debug, Clone)]
pub struct SessionStore {
    ttl_seconds: i64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }
}

impl SessionStore {
    /// A store with a custom sliding window.
    #[must_use]
    pub fn with_ttl(ttl_seconds: i64) -> Self {
        Self { ttl_seconds }
    }

    /// Create the backing table when absent.
    pub fn ensure_schema(&self, db: &mut Db) -> CapResult<()> {
        db.exec(
            "CREATE TABLE IF NOT EXISTS hull_sessions (
                id TEXT PRIMARY KEY,
                user_fields TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            &[],
        )?;
        Ok(())
    }

    /// Mint a session for the given user fields.
    pub fn create(
        &self,
        db: &mut Db,
        user_fields: BTreeMap<String, Value>,
        now: i64,
    ) -> CapResult<Session> {
        let session = Session {
            id: crypto::new_id(),
            user_fields,
            created_at: now,
            last_seen: now,
            expires_at: now + self.ttl_seconds,
        };
        let fields = serde_json::to_string(&session.user_fields)
            .map_err(|e| CapError::Internal(e.to_string()))?;
        db.exec(
            "INSERT INTO hull_sessions (id, user_fields, created_at, last_seen, expires_at)
             VALUES (?, ?, ?, ?, ?)",
            &[
                json!(session.id),
                json!(fields),
                json!(session.created_at),
                json!(session.last_seen),
                json!(session.expires_at),
            ],
        )?;
        Ok(session)
    }

    /// Fetch a live session and slide its window.
    ///
    /// Expired or unknown ids return `Ok(None)`.
    pub fn touch(&self, db: &mut Db, id: &str, now: i64) -> CapResult<Option<Session>> {
        let rows = db.query(
            "SELECT id, user_fields, created_at, last_seen, expires_at
             FROM hull_sessions WHERE id = ? AND expires_at > ?",
            &[json!(id), json!(now)],
        )?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let expires_at = now + self.ttl_seconds;
        db.exec(
            "UPDATE hull_sessions SET last_seen = ?, expires_at = ? WHERE id = ?",
            &[json!(now), json!(expires_at), json!(id)],
        )?;

        let user_fields: BTreeMap<String, Value> = row["user_fields"]
            .as_str()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        Ok(Some(Session {
            id: id.to_string(),
            user_fields,
            created_at: row["created_at"].as_i64().unwrap_or_default(),
            last_seen: now,
            expires_at,
        }))
    }

    /// Destroy one session (logout).
    pub fn destroy(&self, db: &mut Db, id: &str) -> CapResult<()> {
        db.exec("DELETE FROM hull_sessions WHERE id = ?", &[json!(id)])?;
        Ok(())
    }

    /// Delete every expired session; returns how many went away.
    pub fn sweep(&self, db: &mut Db, now: i64) -> CapResult<usize> {
        let removed = db.exec(
            "DELETE FROM hull_sessions WHERE expires_at <= ?",
            &[json!(now)],
        )?;
        if removed > 0 {
            debug!(removed, "expired sessions removed");
        }
        Ok(removed)
    }
}
