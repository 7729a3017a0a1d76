// Machine-to-machine control plane: apply a routing request, read back the
// last applied state. The API-key gate is a single static shared-secret
// check, simpler than the teacher's JWT session cookies because there is no
// login flow here.

use actix_web::{get, post, web, HttpRequest, HttpResponse};

use crate::model::ApplyRequest;
use crate::web::SharedState;

fn enforce_auth(req: &HttpRequest, state: &SharedState) -> Result<(), HttpResponse> {
    if state.api_key.is_empty() {
        return Ok(());
    }
    let expected = format!("Bearer {}", state.api_key);
    match req.headers().get("Authorization") {
        Some(value) if value.to_str().map(|v| v == expected).unwrap_or(false) => Ok(()),
        _ => Err(HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "missing or invalid Authorization header"
        }))),
    }
}

#[post("/api/apply")]
pub async fn apply(
    req: HttpRequest,
    state: web::Data<SharedState>,
    body: web::Json<ApplyRequest>,
) -> HttpResponse {
    if let Err(resp) = enforce_auth(&req, &state) {
        return resp;
    }

    let _apply_guard = state.apply_lock.lock().await;
    match state.orchestrator.apply(&state.token, &body).await {
        Ok(routing_state) => {
            *state.last_state.lock().await = Some(routing_state.clone());
            HttpResponse::Ok().json(routing_state)
        }
        Err(e) => {
            log::warn!("apply failed: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

#[get("/api/status")]
pub async fn status(req: HttpRequest, state: web::Data<SharedState>) -> HttpResponse {
    if let Err(resp) = enforce_auth(&req, &state) {
        return resp;
    }

    match &*state.last_state.lock().await {
        Some(routing_state) => HttpResponse::Ok().json(routing_state),
        None => HttpResponse::Ok().json(serde_json::json!({ "appliedAt": null })),
    }
}
