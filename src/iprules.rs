// Policy-routing rule manager: one `ip rule` per egress node, keyed by the
// node's table ID (used as its own fwmark), delete-then-add for idempotence.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::model::NodeStatus;
use crate::shell::{self, ShellError};

#[derive(Error, Debug)]
pub enum IpRuleError {
    #[error(transparent)]
    Shell(#[from] ShellError),
}

pub struct RuleManager;

impl RuleManager {
    pub fn new() -> Self {
        Self
    }

    pub async fn ensure(
        &self,
        token: &CancellationToken,
        nodes: &[NodeStatus],
    ) -> Result<(), IpRuleError> {
        for node in nodes {
            self.ensure_one(token, node.table_id).await?;
        }
        Ok(())
    }

    async fn ensure_one(&self, token: &CancellationToken, table_id: u32) -> Result<(), IpRuleError> {
        let table = table_id.to_string();

        // Best-effort delete: an absent rule is not an error.
        let _ = shell::run(
            token,
            &["ip", "rule", "del", "fwmark", &table, "lookup", &table],
        )
        .await;

        shell::run(
            token,
            &["ip", "rule", "add", "fwmark", &table, "lookup", &table],
        )
        .await?;

        Ok(())
    }
}

impl Default for RuleManager {
    fn default() -> Self {
        Self::new()
    }
}
