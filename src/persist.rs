// Single-row upsert persistence of the last applied routing state, backed
// by SQLite. Mirrors the teacher's atomic-write discipline for on-disk
// daemon state, but through rusqlite's native upsert rather than a
// temp-file-plus-rename JSON write.

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::model::RoutingState;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub struct StatePersister {
    conn: Connection,
}

impl StatePersister {
    pub fn open(path: &str) -> Result<Self, PersistError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS routing_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    pub fn save(&self, state: &RoutingState) -> Result<(), PersistError> {
        let payload = serde_json::to_string(state)?;
        log::debug!("persisting routing state ({} bytes)", payload.len());
        self.conn.execute(
            "INSERT INTO routing_state (id, payload, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            params![payload, state.applied_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<RoutingState>, PersistError> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM routing_state WHERE id = 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => {
                let payload: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }
}
