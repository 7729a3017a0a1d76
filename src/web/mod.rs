pub mod api;
pub mod server;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::model::RoutingState;
use crate::reconcile::Orchestrator;

/// Shared state handed to every HTTP handler: the orchestrator, the static
/// API key the Bearer-token gate checks against, and the last applied
/// state for the status endpoint.
///
/// `apply_lock` serializes applies process-wide: only one in-flight apply
/// is assumed, and the reconciler itself holds no internal mutex, so the
/// HTTP handler is the place that must avoid interleaved kernel mutations.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub api_key: String,
    pub token: CancellationToken,
    pub last_state: Mutex<Option<RoutingState>>,
    pub apply_lock: Mutex<()>,
}

pub type SharedState = Arc<AppState>;
