//! Durable client preferences: the remembered username and one-shot tips.
//! A small SQLite key-value table; `:memory:` when no path is configured.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info};

const KEY_REMEMBERED_USER: &str = "remembered_user";
const KEY_MOBILE_TIP: &str = "mobile_tips_shown";

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("preference store: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub struct LocalPrefs {
    conn: Mutex<Connection>,
}

impl LocalPrefs {
    pub fn open(db_path: &Path) -> Result<Self, PrefsError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let prefs = Self::init(conn)?;
        info!(path = %db_path.display(), "preference store opened");
        Ok(prefs)
    }

    pub fn in_memory() -> Result<Self, PrefsError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PrefsError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS prefs (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, PrefsError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM prefs WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    /// `Some` remembers the username, `None` forgets it.
    pub fn remember_user(&self, username: Option<&str>) -> Result<(), PrefsError> {
        let conn = self.conn.lock();
        match username.map(str::trim).filter(|u| !u.is_empty()) {
            Some(user) => {
                conn.execute(
                    "INSERT OR REPLACE INTO prefs (key, value, updated_at) VALUES (?1, ?2, ?3)",
                    params![KEY_REMEMBERED_USER, user, chrono::Utc::now().timestamp()],
                )?;
                debug!(username = user, "username_remembered");
            }
            None => {
                conn.execute("DELETE FROM prefs WHERE key = ?1", params![KEY_REMEMBERED_USER])?;
                debug!("username_forgotten");
            }
        }
        Ok(())
    }

    pub fn remembered_user(&self) -> Result<Option<String>, PrefsError> {
        self.get(KEY_REMEMBERED_USER)
    }

    /// Returns true only the first time it is called.
    pub fn mark_mobile_tip_shown(&self) -> Result<bool, PrefsError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO prefs (key, value, updated_at) VALUES (?1, 'true', ?2)",
            params![KEY_MOBILE_TIP, chrono::Utc::now().timestamp()],
        )?;
        Ok(inserted == 1)
    }

    pub fn mobile_tip_shown(&self) -> Result<bool, PrefsError> {
        Ok(self.get(KEY_MOBILE_TIP)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembered_user_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.db");
        {
            let prefs = LocalPrefs::open(&path).unwrap();
            prefs.remember_user(Some(" bob ")).unwrap();
        }
        let prefs = LocalPrefs::open(&path).unwrap();
        assert_eq!(prefs.remembered_user().unwrap().as_deref(), Some("bob"));

        prefs.remember_user(None).unwrap();
        assert_eq!(prefs.remembered_user().unwrap(), None);
    }

    #[test]
    fn mobile_tip_is_one_shot() {
        let prefs = LocalPrefs::in_memory().unwrap();
        assert!(!prefs.mobile_tip_shown().unwrap());
        assert!(prefs.mark_mobile_tip_shown().unwrap());
        assert!(!prefs.mark_mobile_tip_shown().unwrap());
        assert!(prefs.mobile_tip_shown().unwrap());
    }
}
