use axum::Json;
use serde_json::{json, Value};

use crate::auth::principal::Principal;

/// `GET /v1/healthcheck`; mounted behind the activated-principal guard.
pub async fn healthcheck(principal: Principal) -> Json<Value> {
    Json(json!({
        "status": "available",
        "system_info": {
            "version": env!("CARGO_PKG_VERSION"),
        },
        "principal_id": principal.id(),
    }))
}
