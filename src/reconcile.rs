// Orchestrator: turns a declarative ApplyRequest into host networking state,
// driving the four reconcilers and the DNS proxy in a fixed order and
// short-circuiting on the first error. No cross-subsystem rollback: a
// failure midway leaves whatever was already applied in place.

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::dns::{DnsError, DnsProxy};
use crate::ident;
use crate::iprules::{IpRuleError, RuleManager};
use crate::model::{ApplyRequest, NodeStatus, PolicyStatus, RoutingState};
use crate::nft::{NftError, NftReconciler};
use crate::persist::{PersistError, StatePersister};
use crate::wireguard::{WireGuardError, WireGuardReconciler};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("policy {policy} references unknown node {node}")]
    UnknownNode { policy: String, node: String },
    #[error(transparent)]
    WireGuard(#[from] WireGuardError),
    #[error(transparent)]
    IpRule(#[from] IpRuleError),
    #[error(transparent)]
    Nft(#[from] NftError),
    #[error(transparent)]
    Dns(#[from] DnsError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

pub struct Orchestrator {
    wireguard: WireGuardReconciler,
    rules: RuleManager,
    nft: NftReconciler,
    dns: DnsProxy,
    persister: StatePersister,
}

impl Orchestrator {
    pub fn new(
        wireguard: WireGuardReconciler,
        rules: RuleManager,
        nft: NftReconciler,
        dns: DnsProxy,
        persister: StatePersister,
    ) -> Self {
        Self {
            wireguard,
            rules,
            nft,
            dns,
            persister,
        }
    }

    pub async fn apply(
        &self,
        token: &CancellationToken,
        request: &ApplyRequest,
    ) -> Result<RoutingState, ReconcileError> {
        let nodes = derive_nodes(request);
        let policies = derive_policies(request, &nodes)?;

        self.wireguard.ensure(token, &nodes).await?;
        self.rules.ensure(token, &nodes).await?;
        self.nft.ensure(token, &policies).await?;

        if !self.dns.is_running().await {
            self.dns.start().await?;
        }
        self.dns.update_policies(&policies).await;

        let state = RoutingState {
            applied_at: Utc::now(),
            nodes,
            policies,
            routes: request.routes.clone(),
        };

        self.persister.save(&state)?;

        Ok(state)
    }
}

fn derive_nodes(request: &ApplyRequest) -> Vec<NodeStatus> {
    request
        .nodes
        .iter()
        .enumerate()
        .map(|(index, node)| NodeStatus {
            node: node.clone(),
            interface: ident::interface_name(&node.name),
            table_id: ident::table_id(index),
        })
        .collect()
}

fn derive_policies(
    request: &ApplyRequest,
    nodes: &[NodeStatus],
) -> Result<Vec<PolicyStatus>, ReconcileError> {
    request
        .policies
        .iter()
        .map(|policy| {
            // Empty `node` with no nodes declared at all derives a no-op
            // mark/table of zero rather than failing; only a reference to a
            // *named but absent* node is an error.
            let table_id = if policy.node.is_empty() {
                match nodes.first() {
                    Some(n) => n.table_id,
                    None => 0,
                }
            } else {
                nodes
                    .iter()
                    .find(|n| n.node.name == policy.node)
                    .map(|n| n.table_id)
                    .ok_or_else(|| ReconcileError::UnknownNode {
                        policy: policy.name.clone(),
                        node: policy.node.clone(),
                    })?
            };

            Ok(PolicyStatus {
                policy: policy.clone(),
                mark: table_id,
                table: table_id,
                // Always true: whether a rule is actually installed for
                // this policy's action is a concern for the nft
                // reconciler, not this flag.
                active: true,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EgressNode, PolicyGroup};

    fn request() -> ApplyRequest {
        ApplyRequest {
            nodes: vec![EgressNode {
                name: "eu-west".into(),
                ..Default::default()
            }],
            policies: vec![PolicyGroup {
                name: "default-egress".into(),
                ..Default::default()
            }],
            routes: Vec::new(),
        }
    }

    #[test]
    fn derive_nodes_assigns_sequential_table_ids() {
        let mut req = request();
        req.nodes.push(EgressNode {
            name: "us-east".into(),
            ..Default::default()
        });
        let nodes = derive_nodes(&req);
        assert_eq!(nodes[0].table_id, 101);
        assert_eq!(nodes[1].table_id, 102);
        assert_eq!(nodes[0].interface, "wg-egress-eu_west");
    }

    #[test]
    fn derive_policies_adopts_first_node_when_unset() {
        let req = request();
        let nodes = derive_nodes(&req);
        let policies = derive_policies(&req, &nodes).unwrap();
        assert_eq!(policies[0].table, 101);
        assert!(policies[0].active);
    }

    #[test]
    fn derive_policies_rejects_unknown_node_reference() {
        let mut req = request();
        req.policies[0].node = "does-not-exist".into();
        let nodes = derive_nodes(&req);
        let err = derive_policies(&req, &nodes).unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownNode { .. }));
    }

    #[test]
    fn derive_policies_zero_marks_without_any_nodes_when_unset() {
        let req = ApplyRequest {
            nodes: Vec::new(),
            policies: vec![PolicyGroup {
                name: "orphan".into(),
                ..Default::default()
            }],
            routes: Vec::new(),
        };
        let nodes = derive_nodes(&req);
        let policies = derive_policies(&req, &nodes).unwrap();
        assert_eq!(policies[0].mark, 0);
        assert_eq!(policies[0].table, 0);
        assert!(policies[0].active);
    }

    #[test]
    fn derive_policies_mark_equals_table_id() {
        let req = request();
        let nodes = derive_nodes(&req);
        let policies = derive_policies(&req, &nodes).unwrap();
        assert_eq!(policies[0].mark, policies[0].table);
        assert_eq!(policies[0].mark, 101);
    }

    #[test]
    fn derive_policies_active_is_always_true_regardless_of_action() {
        let mut req = request();
        req.policies[0].action = "deny".into();
        let nodes = derive_nodes(&req);
        let policies = derive_policies(&req, &nodes).unwrap();
        assert!(policies[0].active);
        assert!(!policies[0].policy.is_active_action());
    }
}
