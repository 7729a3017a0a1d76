// Thin CRUD shell over the nodes/policies/routes that make up an
// ApplyRequest, backed by the same SQLite file as the state persister. Only
// enough surface for the HTTP control plane to assemble a request; semantic
// validation (unknown node references, etc.) is the reconciler's job.

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::model::{EgressNode, PolicyGroup, StaticRoute};

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("{0} must not be empty")]
    EmptyName(&'static str),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub struct Inventory {
    conn: Connection,
}

impl Inventory {
    pub fn open(path: &str) -> Result<Self, InventoryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (name TEXT PRIMARY KEY, payload TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS policies (name TEXT PRIMARY KEY, payload TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS routes (cidr TEXT PRIMARY KEY, payload TEXT NOT NULL);",
        )?;
        Ok(Self { conn })
    }

    pub fn upsert_node(&self, node: &EgressNode) -> Result<(), InventoryError> {
        if node.name.is_empty() {
            return Err(InventoryError::EmptyName("node name"));
        }
        let payload = serde_json::to_string(node)?;
        self.conn.execute(
            "INSERT INTO nodes (name, payload) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET payload = excluded.payload",
            params![node.name, payload],
        )?;
        Ok(())
    }

    pub fn delete_node(&self, name: &str) -> Result<(), InventoryError> {
        self.conn.execute("DELETE FROM nodes WHERE name = ?1", params![name])?;
        Ok(())
    }

    pub fn list_nodes(&self) -> Result<Vec<EgressNode>, InventoryError> {
        let mut stmt = self.conn.prepare("SELECT payload FROM nodes ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub fn upsert_policy(&self, policy: &PolicyGroup) -> Result<(), InventoryError> {
        if policy.name.is_empty() {
            return Err(InventoryError::EmptyName("policy name"));
        }
        let payload = serde_json::to_string(policy)?;
        self.conn.execute(
            "INSERT INTO policies (name, payload) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET payload = excluded.payload",
            params![policy.name, payload],
        )?;
        Ok(())
    }

    pub fn delete_policy(&self, name: &str) -> Result<(), InventoryError> {
        self.conn
            .execute("DELETE FROM policies WHERE name = ?1", params![name])?;
        Ok(())
    }

    pub fn list_policies(&self) -> Result<Vec<PolicyGroup>, InventoryError> {
        let mut stmt = self.conn.prepare("SELECT payload FROM policies ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    pub fn upsert_route(&self, route: &StaticRoute) -> Result<(), InventoryError> {
        if route.cidr.is_empty() {
            return Err(InventoryError::EmptyName("route cidr"));
        }
        let payload = serde_json::to_string(route)?;
        self.conn.execute(
            "INSERT INTO routes (cidr, payload) VALUES (?1, ?2)
             ON CONFLICT(cidr) DO UPDATE SET payload = excluded.payload",
            params![route.cidr, payload],
        )?;
        Ok(())
    }

    pub fn delete_route(&self, cidr: &str) -> Result<(), InventoryError> {
        self.conn.execute("DELETE FROM routes WHERE cidr = ?1", params![cidr])?;
        Ok(())
    }

    pub fn list_routes(&self) -> Result<Vec<StaticRoute>, InventoryError> {
        let mut stmt = self.conn.prepare("SELECT payload FROM routes ORDER BY cidr")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }
}
