// Wire and derived data model for an apply pass.
//
// Field names match the JSON schema in the routing spec's external
// interfaces section verbatim (camelCase on the wire).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EgressNode {
    pub name: String,
    pub endpoint: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "allowedIps", default)]
    pub allowed_ips: Vec<String>,
    #[serde(rename = "localAddress", default)]
    pub local_address: String,
    #[serde(rename = "persistentKeepalive", default)]
    pub persistent_keepalive: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PolicyGroup {
    pub name: String,
    #[serde(default)]
    pub node: String,
    #[serde(rename = "sourceCidrs", default)]
    pub source_cidrs: Vec<String>,
    #[serde(rename = "destinationCidrs", default)]
    pub destination_cidrs: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub action: String,
}

impl PolicyGroup {
    /// Only "" and "allow" cause nftables rules to be installed.
    pub fn is_active_action(&self) -> bool {
        self.action.is_empty() || self.action == "allow"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StaticRoute {
    pub cidr: String,
    #[serde(rename = "nextHop", default)]
    pub next_hop: String,
    #[serde(default)]
    pub node: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStatus {
    #[serde(flatten)]
    pub node: EgressNode,
    pub interface: String,
    #[serde(rename = "tableId")]
    pub table_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyStatus {
    #[serde(flatten)]
    pub policy: PolicyGroup,
    pub mark: u32,
    pub table: u32,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApplyRequest {
    #[serde(default)]
    pub nodes: Vec<EgressNode>,
    #[serde(default)]
    pub policies: Vec<PolicyGroup>,
    #[serde(default)]
    pub routes: Vec<StaticRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingState {
    #[serde(rename = "appliedAt")]
    pub applied_at: DateTime<Utc>,
    pub nodes: Vec<NodeStatus>,
    pub policies: Vec<PolicyStatus>,
    pub routes: Vec<StaticRoute>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_request_deserializes_wire_field_names() {
        let raw = r#"{
            "nodes": [{
                "name": "eu-west",
                "endpoint": "203.0.113.5:51820",
                "publicKey": "AAA",
                "allowedIps": ["0.0.0.0/0"],
                "localAddress": "10.0.0.2/24",
                "persistentKeepalive": 25
            }],
            "policies": [{
                "name": "corp",
                "node": "eu-west",
                "sourceCidrs": ["10.1.0.0/16"],
                "destinationCidrs": [],
                "domains": [],
                "action": "allow"
            }],
            "routes": [{"cidr": "0.0.0.0/0", "nextHop": "10.0.0.1", "node": "eu-west"}]
        }"#;
        let req: ApplyRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.nodes[0].public_key, "AAA");
        assert_eq!(req.nodes[0].allowed_ips, vec!["0.0.0.0/0".to_string()]);
        assert_eq!(req.nodes[0].local_address, "10.0.0.2/24");
        assert_eq!(req.nodes[0].persistent_keepalive, 25);
        assert_eq!(req.policies[0].source_cidrs, vec!["10.1.0.0/16".to_string()]);
        assert_eq!(req.routes[0].next_hop, "10.0.0.1");
    }

    #[test]
    fn node_status_serializes_flattened_with_wire_names() {
        let status = NodeStatus {
            node: EgressNode {
                name: "eu-west".into(),
                endpoint: "203.0.113.5:51820".into(),
                public_key: "AAA".into(),
                allowed_ips: vec!["0.0.0.0/0".into()],
                local_address: "10.0.0.2/24".into(),
                persistent_keepalive: 25,
            },
            interface: "wg-egress-eu_west".into(),
            table_id: 101,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["tableId"], 101);
        assert_eq!(value["publicKey"], "AAA");
        assert_eq!(value["interface"], "wg-egress-eu_west");
        // Flattened fields live alongside the derived ones, not nested.
        assert!(value.get("node").is_none());
    }

    #[test]
    fn policy_group_defaults_action_to_empty_and_is_active() {
        let raw = r#"{"name": "corp"}"#;
        let policy: PolicyGroup = serde_json::from_str(raw).unwrap();
        assert_eq!(policy.action, "");
        assert!(policy.is_active_action());
    }

    #[test]
    fn policy_group_deny_action_is_inactive() {
        let policy = PolicyGroup {
            name: "blocked".into(),
            action: "deny".into(),
            ..Default::default()
        };
        assert!(!policy.is_active_action());
    }
}
