// WireGuard reconciler: one `wireguard` interface per egress node, peer
// attached, address assigned, link up, default route in the node's table.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::model::NodeStatus;
use crate::shell::{self, ShellError};

#[derive(Error, Debug)]
pub enum WireGuardError {
    #[error("node {0}: publicKey and endpoint are both required")]
    MissingPeerData(String),
    #[error(transparent)]
    Shell(#[from] ShellError),
}

pub struct WireGuardReconciler;

impl WireGuardReconciler {
    pub fn new() -> Self {
        Self
    }

    pub async fn ensure(
        &self,
        token: &CancellationToken,
        nodes: &[NodeStatus],
    ) -> Result<(), WireGuardError> {
        for node in nodes {
            self.ensure_one(token, node).await?;
        }
        Ok(())
    }

    async fn ensure_one(
        &self,
        token: &CancellationToken,
        node: &NodeStatus,
    ) -> Result<(), WireGuardError> {
        let iface = &node.interface;

        if !shell::ok(token, &["ip", "link", "show", iface]).await {
            shell::run(token, &["ip", "link", "add", "dev", iface, "type", "wireguard"]).await?;
        }

        if !node.node.local_address.is_empty() {
            shell::run(
                token,
                &["ip", "address", "replace", &node.node.local_address, "dev", iface],
            )
            .await?;
        }

        if node.node.public_key.is_empty() || node.node.endpoint.is_empty() {
            return Err(WireGuardError::MissingPeerData(node.node.name.clone()));
        }

        let mut peer_args: Vec<&str> =
            vec!["wg", "set", iface, "peer", &node.node.public_key, "endpoint", &node.node.endpoint];
        let allowed_ips_csv = node.node.allowed_ips.join(",");
        if !node.node.allowed_ips.is_empty() {
            peer_args.push("allowed-ips");
            peer_args.push(&allowed_ips_csv);
        }
        let keepalive_str = node.node.persistent_keepalive.to_string();
        if node.node.persistent_keepalive != 0 {
            peer_args.push("persistent-keepalive");
            peer_args.push(&keepalive_str);
        }
        shell::run(token, &peer_args).await?;

        shell::run(token, &["ip", "link", "set", "up", "dev", iface]).await?;

        let table = node.table_id.to_string();
        shell::run(
            token,
            &["ip", "route", "replace", "default", "dev", iface, "table", &table],
        )
        .await?;

        Ok(())
    }
}

impl Default for WireGuardReconciler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EgressNode;

    fn node(public_key: &str, endpoint: &str) -> NodeStatus {
        NodeStatus {
            node: EgressNode {
                name: "eu-west".into(),
                endpoint: endpoint.into(),
                public_key: public_key.into(),
                allowed_ips: vec!["0.0.0.0/0".into()],
                local_address: "10.0.0.2/24".into(),
                persistent_keepalive: 25,
            },
            interface: "wg-egress-eu_west".into(),
            table_id: 101,
        }
    }

    #[tokio::test]
    async fn missing_peer_data_is_rejected_before_any_mutation() {
        let token = CancellationToken::new();
        let reconciler = WireGuardReconciler::new();
        let err = reconciler
            .ensure_one(&token, &node("", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, WireGuardError::MissingPeerData(n) if n == "eu-west"));
    }
}
