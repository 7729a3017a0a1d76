// nftables reconciler: prerouting marking chain, plus one dynamic IPv4 set
// per domain-matching policy kept current by the DNS proxy.

use ipnet::IpNet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ident;
use crate::model::PolicyStatus;
use crate::shell::{self, ShellError};

const FAMILY: &str = "inet";
const TABLE: &str = "octaroute";
const CHAIN: &str = "prerouting";

#[derive(Error, Debug)]
pub enum NftError {
    #[error("invalid ip literal for domain set: {0}")]
    InvalidAddress(String),
    #[error("invalid cidr in policy rule: {0}")]
    InvalidCidr(String),
    #[error(transparent)]
    Shell(#[from] ShellError),
}

pub struct NftReconciler;

impl NftReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Rebuild the whole chain from scratch for the given statuses. Every
    /// policy gets a domain set regardless of whether it declares domains;
    /// only policies with an active action (`""` or `"allow"`) get a
    /// marking rule.
    pub async fn ensure(
        &self,
        token: &CancellationToken,
        policies: &[PolicyStatus],
    ) -> Result<(), NftError> {
        self.ensure_table_and_chain(token).await?;
        // This is the point where the reconciler claims full ownership of
        // the chain's contents: anything not re-added below vanishes.
        shell::run(token, &["nft", "flush", "chain", FAMILY, TABLE, CHAIN]).await?;

        for policy in policies {
            self.ensure_domain_set(token, policy).await?;
        }

        for policy in policies.iter().filter(|p| p.policy.is_active_action()) {
            self.install_rules(token, policy).await?;
        }

        Ok(())
    }

    async fn ensure_table_and_chain(&self, token: &CancellationToken) -> Result<(), NftError> {
        if shell::output(token, &["nft", "list", "table", FAMILY, TABLE])
            .await
            .is_err()
        {
            shell::run(token, &["nft", "add", "table", FAMILY, TABLE]).await?;
        }

        let chain_listing = shell::output(token, &["nft", "list", "chain", FAMILY, TABLE, CHAIN]).await;
        if chain_listing.is_err() {
            shell::run(
                token,
                &[
                    "nft", "add", "chain", FAMILY, TABLE, CHAIN, "{", "type", "filter", "hook",
                    "prerouting", "priority", "mangle", ";", "policy", "accept", ";", "}",
                ],
            )
            .await?;
        }

        Ok(())
    }

    async fn ensure_domain_set(
        &self,
        token: &CancellationToken,
        policy: &PolicyStatus,
    ) -> Result<(), NftError> {
        let set_name = ident::dns_set_name(&policy.policy.name);
        if shell::output(token, &["nft", "list", "set", FAMILY, TABLE, &set_name])
            .await
            .is_err()
        {
            shell::run(
                token,
                &[
                    "nft", "add", "set", FAMILY, TABLE, &set_name, "{", "type", "ipv4_addr", ";",
                    "flags", "interval", ";", "}",
                ],
            )
            .await?;
        }
        Ok(())
    }

    /// Emits the CIDR-match rule (always, possibly unconstrained) and, when
    /// the policy declares domains, a second rule matching the dynamic set.
    async fn install_rules(
        &self,
        token: &CancellationToken,
        policy: &PolicyStatus,
    ) -> Result<(), NftError> {
        for cidr in policy
            .policy
            .source_cidrs
            .iter()
            .chain(policy.policy.destination_cidrs.iter())
        {
            cidr.parse::<IpNet>()
                .map_err(|_| NftError::InvalidCidr(cidr.clone()))?;
        }

        let mark = policy.mark.to_string();
        let mut argv: Vec<&str> = vec!["nft", "add", "rule", FAMILY, TABLE, CHAIN];

        let saddr_csv = policy.policy.source_cidrs.join(",");
        if !policy.policy.source_cidrs.is_empty() {
            argv.extend(["ip", "saddr", "{", &saddr_csv, "}"]);
        }
        let daddr_csv = policy.policy.destination_cidrs.join(",");
        if !policy.policy.destination_cidrs.is_empty() {
            argv.extend(["ip", "daddr", "{", &daddr_csv, "}"]);
        }
        argv.extend(["meta", "mark", "set", &mark]);
        shell::run(token, &argv).await?;

        if !policy.policy.domains.is_empty() {
            let set_name = ident::dns_set_name(&policy.policy.name);
            let set_ref = format!("@{set_name}");
            let mut domain_argv: Vec<&str> = vec!["nft", "add", "rule", FAMILY, TABLE, CHAIN];
            if !policy.policy.source_cidrs.is_empty() {
                domain_argv.extend(["ip", "saddr", "{", &saddr_csv, "}"]);
            }
            domain_argv.extend(["ip", "daddr", &set_ref, "meta", "mark", "set", &mark]);
            shell::run(token, &domain_argv).await?;
        }

        Ok(())
    }

    /// Add resolved IPv4 addresses to a policy's dynamic domain set. Called
    /// by the DNS proxy on every observed answer. Fails fast on non-IPv4
    /// literals, since the set type is IPv4-only; the caller swallows the
    /// error rather than widening the set for AAAA answers. A no-op on an
    /// empty list.
    pub async fn add_domain_ips(
        &self,
        token: &CancellationToken,
        policy_name: &str,
        ips: &[String],
    ) -> Result<(), NftError> {
        if ips.is_empty() {
            return Ok(());
        }
        for ip in ips {
            if ip.parse::<std::net::Ipv4Addr>().is_err() {
                return Err(NftError::InvalidAddress(ip.clone()));
            }
        }
        let set_name = ident::dns_set_name(policy_name);
        let csv = ips.join(",");
        shell::run(
            token,
            &["nft", "add", "element", FAMILY, TABLE, &set_name, "{", &csv, "}"],
        )
        .await?;
        Ok(())
    }
}

impl Default for NftReconciler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_domain_ips_rejects_non_ipv4_literal() {
        let token = CancellationToken::new();
        let nft = NftReconciler::new();
        let err = nft
            .add_domain_ips(&token, "ads", &["::1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, NftError::InvalidAddress(addr) if addr == "::1"));
    }

    #[tokio::test]
    async fn add_domain_ips_is_noop_on_empty_input() {
        let token = CancellationToken::new();
        let nft = NftReconciler::new();
        assert!(nft.add_domain_ips(&token, "ads", &[]).await.is_ok());
    }

    #[test]
    fn destination_cidrs_must_parse_as_ip_networks() {
        assert!("10.0.0.0/8".parse::<IpNet>().is_ok());
        assert!("not-a-cidr".parse::<IpNet>().is_err());
    }
}
