// Exit-node reachability probing and one-shot WireGuard bring-up at process
// start. Trimmed down from the teacher's health-monitor statics to the
// single responsibility of recording reachability: no failover, no
// active/backup arbitration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::model::NodeStatus;
use crate::shell;
use crate::wireguard::{WireGuardError, WireGuardReconciler};

const PROBE_INTERVAL: Duration = Duration::from_secs(10);

static LAST_HEALTHY: Lazy<Arc<RwLock<HashMap<String, bool>>>> =
    Lazy::new(|| Arc::new(RwLock::new(HashMap::new())));

pub async fn is_healthy(node_name: &str) -> bool {
    LAST_HEALTHY
        .read()
        .await
        .get(node_name)
        .copied()
        .unwrap_or(false)
}

/// Spawn a background loop pinging each node's local address on an
/// interval, recording whether it answered. Runs until `token` is
/// canceled.
pub fn spawn_probe_loop(token: CancellationToken, nodes: Vec<NodeStatus>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROBE_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for node in &nodes {
                        probe_one(&token, node).await;
                    }
                }
                _ = token.cancelled() => return,
            }
        }
    });
}

async fn probe_one(token: &CancellationToken, node: &NodeStatus) {
    if node.node.local_address.is_empty() {
        return;
    }
    let host = node
        .node
        .local_address
        .split('/')
        .next()
        .unwrap_or(&node.node.local_address);
    let healthy = shell::ok(token, &["ping", "-c", "1", "-W", "1", host]).await;
    LAST_HEALTHY
        .write()
        .await
        .insert(node.node.name.clone(), healthy);
    if !healthy {
        log::warn!("node {} did not respond to health probe", node.node.name);
    }
}

/// Run the WireGuard reconciler's interface-ensure step once for a locally
/// defined listening peer at process start, so the daemon has a live tunnel
/// before the first apply request arrives.
pub async fn bring_up_once(
    token: &CancellationToken,
    reconciler: &WireGuardReconciler,
    node: &NodeStatus,
) -> Result<(), WireGuardError> {
    reconciler.ensure(token, std::slice::from_ref(node)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn is_healthy_defaults_false_for_unknown_node() {
        assert!(!is_healthy("never-probed-node").await);
    }
}
