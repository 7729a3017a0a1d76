// DNS proxy: forwards client queries to an upstream resolver, observes A
// and AAAA answers for domains with a policy-declared domain, and feeds
// matching addresses into the nftables reconciler's dynamic sets.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::{RData, RecordType};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::model::PolicyStatus;
use crate::nft::NftReconciler;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);
const NFT_INSERT_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_DATAGRAM: usize = 512;

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("already running")]
    AlreadyRunning,
    #[error("not running")]
    NotRunning,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed dns message: {0}")]
    Proto(#[from] hickory_proto::error::ProtoError),
}

/// Strip a trailing dot and lowercase, so wire names and policy-configured
/// domains compare equal regardless of case or FQDN-dot conventions.
pub fn normalize(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}

struct Shared {
    listen_addr: String,
    upstream_addr: String,
    domain_policy: RwLock<HashMap<String, String>>,
    nft: NftReconciler,
}

pub struct DnsProxy {
    shared: Arc<Shared>,
    running: RwLock<Option<CancellationToken>>,
}

/// Snapshot of the proxy's observable state: listen address, upstream
/// address, number of tracked domain entries, and whether it's running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsStatus {
    pub listen_address: String,
    pub upstream: String,
    pub policy_count: usize,
    pub running: bool,
}

impl DnsProxy {
    pub fn new(listen_addr: String, upstream_addr: String, nft: NftReconciler) -> Self {
        Self {
            shared: Arc::new(Shared {
                listen_addr,
                upstream_addr,
                domain_policy: RwLock::new(HashMap::new()),
                nft,
            }),
            running: RwLock::new(None),
        }
    }

    /// Replace the domain -> policy name map used to decide which answers
    /// to observe. Safe to call while running.
    pub async fn update_policies(&self, policies: &[PolicyStatus]) {
        let mut map = HashMap::new();
        for policy in policies {
            for domain in &policy.policy.domains {
                map.insert(normalize(domain), policy.policy.name.clone());
            }
        }
        *self.shared.domain_policy.write().await = map;
    }

    pub async fn is_running(&self) -> bool {
        self.running.read().await.is_some()
    }

    /// Snapshot of `{ listenAddress, upstream, policyCount, running }`.
    pub async fn status(&self) -> DnsStatus {
        DnsStatus {
            listen_address: self.shared.listen_addr.clone(),
            upstream: self.shared.upstream_addr.clone(),
            policy_count: self.shared.domain_policy.read().await.len(),
            running: self.is_running().await,
        }
    }

    /// Start listening. Restartable: `stop` then `start` again is
    /// supported, the running flag is reset rather than sticky, since the
    /// control plane may legitimately restart the proxy across config
    /// reloads.
    pub async fn start(&self) -> Result<(), DnsError> {
        let mut guard = self.running.write().await;
        if guard.is_some() {
            return Err(DnsError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        let socket = UdpSocket::bind(&self.shared.listen_addr).await?;
        let shared = self.shared.clone();
        let loop_token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(socket, shared, loop_token).await {
                log::warn!("dns proxy loop exited: {e}");
            }
        });
        *guard = Some(token);
        log::info!("dns proxy listening on {}", self.shared.listen_addr);
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), DnsError> {
        let mut guard = self.running.write().await;
        match guard.take() {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(DnsError::NotRunning),
        }
    }
}

async fn serve(socket: UdpSocket, shared: Arc<Shared>, token: CancellationToken) -> Result<(), DnsError> {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, client) = tokio::select! {
            res = timeout(CLIENT_TIMEOUT, socket.recv_from(&mut buf)) => {
                match res {
                    Ok(inner) => inner?,
                    Err(_elapsed) => continue,
                }
            }
            _ = token.cancelled() => return Ok(()),
        };

        let query_bytes = buf[..len].to_vec();
        let shared = shared.clone();
        let reply_socket = &socket;

        match handle_query(&query_bytes, &shared).await {
            Ok(reply) => {
                if let Err(e) = reply_socket.send_to(&reply, client).await {
                    log::warn!("dns proxy: failed to reply to {client}: {e}");
                }
            }
            Err(e) => {
                log::warn!("dns proxy: query handling failed: {e}");
                if let Ok(query) = Message::from_vec(&query_bytes) {
                    let mut servfail = Message::new();
                    servfail.set_id(query.id());
                    servfail.set_message_type(MessageType::Response);
                    servfail.set_response_code(ResponseCode::ServFail);
                    if let Ok(bytes) = servfail.to_vec() {
                        let _ = reply_socket.send_to(&bytes, client).await;
                    }
                }
            }
        }
    }
}

async fn handle_query(query_bytes: &[u8], shared: &Arc<Shared>) -> Result<Vec<u8>, DnsError> {
    let query = Message::from_vec(query_bytes)?;

    let upstream = UdpSocket::bind("0.0.0.0:0").await?;
    upstream.connect(&shared.upstream_addr).await?;
    upstream.send(query_bytes).await?;

    let mut reply_buf = [0u8; MAX_DATAGRAM * 4];
    let len = match timeout(UPSTREAM_TIMEOUT, upstream.recv(&mut reply_buf)).await {
        Ok(res) => res?,
        Err(_elapsed) => {
            let mut servfail = Message::new();
            servfail.set_id(query.id());
            servfail.set_message_type(MessageType::Response);
            servfail.set_response_code(ResponseCode::ServFail);
            return Ok(servfail.to_vec()?);
        }
    };

    let reply_bytes = reply_buf[..len].to_vec();
    observe_answers(&reply_bytes, shared).await;
    Ok(reply_bytes)
}

async fn observe_answers(reply_bytes: &[u8], shared: &Arc<Shared>) {
    let reply = match Message::from_vec(reply_bytes) {
        Ok(m) => m,
        Err(_) => return,
    };

    for record in reply.answers() {
        let record_type = record.record_type();
        if record_type != RecordType::A && record_type != RecordType::AAAA {
            continue;
        }
        let name = normalize(&record.name().to_utf8());
        let policy_name = {
            let map = shared.domain_policy.read().await;
            match map.get(&name) {
                Some(p) => p.clone(),
                None => continue,
            }
        };
        // AAAA literals are still offered to `add_domain_ips` — it rejects
        // non-IPv4 addresses and the DNS hot path swallows that error, per
        // the IPv4-only-set non-goal.
        let ip_string = match record.data() {
            Some(RData::A(addr)) => Some(Ipv4Addr::from(*addr).to_string()),
            Some(RData::AAAA(addr)) => Some(addr.to_string()),
            _ => None,
        };
        let Some(ip_string) = ip_string else { continue };
        let token = CancellationToken::new();
        let insert_token = token.clone();
        match timeout(
            NFT_INSERT_TIMEOUT,
            shared.nft.add_domain_ips(&token, &policy_name, &[ip_string.clone()]),
        )
        .await
        {
            Ok(Err(e)) => {
                log::debug!(
                    "dns proxy: failed to record {ip_string} for policy {policy_name}: {e}"
                );
            }
            Err(_elapsed) => {
                insert_token.cancel();
                log::debug!(
                    "dns proxy: timed out recording {ip_string} for policy {policy_name}"
                );
            }
            Ok(Ok(())) => {}
        }
    }
}
