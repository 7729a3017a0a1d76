mod config;
mod dns;
mod health;
mod ident;
mod inventory;
mod iprules;
mod model;
mod nft;
mod persist;
mod reconcile;
mod shell;
mod web;
mod wireguard;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::nft::NftReconciler;
use crate::persist::StatePersister;
use crate::reconcile::Orchestrator;
use crate::web::AppState;

#[derive(Parser, Debug)]
#[command(name = "octaroute", about = "Policy-based egress router")]
struct Cli {
    /// Path to the daemon's JSON config file. Defaults to the platform
    /// config directory if unset.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> ExitCode {
    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .with_module_level("hickory_proto", log::LevelFilter::Warn)
        .init()
    {
        eprintln!("failed to initialize logger: {e}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    let cfg = match config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let persister = match StatePersister::open(&cfg.sqlite_path) {
        Ok(p) => p,
        Err(e) => {
            log::error!("failed to open state store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let inventory = match inventory::Inventory::open(&cfg.sqlite_path) {
        Ok(i) => i,
        Err(e) => {
            log::error!("failed to open inventory store: {e}");
            return ExitCode::FAILURE;
        }
    };
    let known_nodes = inventory.list_nodes().unwrap_or_default();

    let previously_applied = persister.load().unwrap_or_else(|e| {
        log::warn!("failed to read previously persisted state: {e}");
        None
    });

    let nft = NftReconciler::new();
    let dns_nft = NftReconciler::new();
    let dns_proxy = dns::DnsProxy::new(cfg.dns_listen.clone(), cfg.dns_upstream.clone(), dns_nft);

    let wireguard = wireguard::WireGuardReconciler::new();
    let orchestrator = Orchestrator::new(
        wireguard::WireGuardReconciler::new(),
        iprules::RuleManager::new(),
        nft,
        dns_proxy,
        persister,
    );

    let token = CancellationToken::new();

    if let Some(first) = known_nodes.first() {
        let bring_up_node = model::NodeStatus {
            node: first.clone(),
            interface: ident::interface_name(&first.name),
            table_id: ident::FIRST_TABLE_ID,
        };
        if let Err(e) = health::bring_up_once(&token, &wireguard, &bring_up_node).await {
            log::warn!("startup tunnel bring-up for {} failed: {e}", first.name);
        }
    }

    let probe_nodes: Vec<_> = known_nodes
        .iter()
        .enumerate()
        .map(|(index, node)| model::NodeStatus {
            node: node.clone(),
            interface: ident::interface_name(&node.name),
            table_id: ident::table_id(index),
        })
        .collect();
    health::spawn_probe_loop(token.clone(), probe_nodes);

    let state = Arc::new(AppState {
        orchestrator,
        api_key: cfg.api_key.clone(),
        token: token.clone(),
        last_state: Mutex::new(previously_applied),
        apply_lock: Mutex::new(()),
    });

    let shutdown_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received ctrl-c, shutting down");
            shutdown_token.cancel();
        }
    });

    if let Err(e) = web::server::run(&cfg.http_listen, state).await {
        log::error!("http server exited with error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
