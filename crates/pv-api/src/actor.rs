//! Acting-party extraction
//!
//! Authentication is handled by the upstream gateway, which forwards the
//! authenticated principal as `x-actor-id`. The engine resolves roles
//! against the shipment record; this header only identifies the actor and
//! is never trusted for authorization by itself.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Authenticated actor id forwarded by the gateway.
pub struct ActorId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ActorId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| reject("missing x-actor-id header"))?;
        let id = raw
            .parse::<Uuid>()
            .map_err(|_| reject("x-actor-id is not a valid uuid"))?;
        Ok(ActorId(id))
    }
}

fn reject(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "unauthenticated", "message": message })),
    )
}
