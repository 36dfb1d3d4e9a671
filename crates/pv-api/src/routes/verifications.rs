//! Verification session routes

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use uuid::Uuid;

use pv_core::{EngineError, GeoPoint, PhotoAngle, PickupVerification};

use crate::actor::ActorId;
use crate::error::ApiError;
use crate::models::{
    DecisionRequest, PhotoResponse, RespondRequest, StartVerificationRequest,
    StartVerificationResponse, VerificationResultResponse,
};
use crate::AppState;

pub async fn start_verification(
    State(state): State<Arc<AppState>>,
    Path(shipment_id): Path<Uuid>,
    ActorId(actor_id): ActorId,
    Json(req): Json<StartVerificationRequest>,
) -> Result<Json<StartVerificationResponse>, ApiError> {
    let verification = state
        .engine
        .start_verification(shipment_id, actor_id, req.location)
        .await?;
    Ok(Json(StartVerificationResponse {
        verification_id: verification.id,
        shipment_id: verification.shipment_id,
        started_at: verification.started_at,
    }))
}

pub async fn get_verification(
    State(state): State<Arc<AppState>>,
    Path(shipment_id): Path<Uuid>,
) -> Result<Json<PickupVerification>, ApiError> {
    let verification = state.engine.verification_for_shipment(shipment_id).await?;
    Ok(Json(verification))
}

pub async fn attach_photo(
    State(state): State<Arc<AppState>>,
    Path(verification_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<PhotoResponse>, ApiError> {
    let mut angle: Option<PhotoAngle> = None;
    let mut image: Vec<u8> = Vec::new();
    let mut lat: Option<f64> = None;
    let mut lng: Option<f64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_upload(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("angle") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| bad_upload(format!("unreadable angle field: {e}")))?;
                angle = Some(raw.parse().map_err(bad_upload)?);
            }
            Some("file") => {
                image = field
                    .bytes()
                    .await
                    .map_err(|e| bad_upload(format!("unreadable file field: {e}")))?
                    .to_vec();
            }
            Some("lat") => {
                let raw = field.text().await.map_err(|e| bad_upload(e.to_string()))?;
                lat = raw.parse().ok();
            }
            Some("lng") => {
                let raw = field.text().await.map_err(|e| bad_upload(e.to_string()))?;
                lng = raw.parse().ok();
            }
            _ => {}
        }
    }

    let angle = angle.ok_or_else(|| bad_upload("missing angle field".to_string()))?;
    if image.is_empty() {
        return Err(bad_upload("missing file field".to_string()));
    }
    let location = match (lat, lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
        _ => None,
    };

    let photo = state
        .engine
        .attach_photo(verification_id, angle, &image, location)
        .await?;
    Ok(Json(PhotoResponse { photo }))
}

pub async fn submit_decision(
    State(state): State<Arc<AppState>>,
    Path(verification_id): Path<Uuid>,
    ActorId(actor_id): ActorId,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<VerificationResultResponse>, ApiError> {
    let result = state
        .engine
        .submit_decision(
            verification_id,
            actor_id,
            req.decision,
            req.differences,
            req.notes,
            req.location,
            req.fraud_confirmed,
        )
        .await?;
    Ok(Json(result.into()))
}

pub async fn client_respond(
    State(state): State<Arc<AppState>>,
    Path(verification_id): Path<Uuid>,
    ActorId(actor_id): ActorId,
    Json(req): Json<RespondRequest>,
) -> Result<Json<VerificationResultResponse>, ApiError> {
    let result = state
        .engine
        .client_respond(verification_id, actor_id, req.response, req.notes)
        .await?;
    Ok(Json(result.into()))
}

fn bad_upload(detail: String) -> ApiError {
    ApiError(EngineError::Config(detail))
}
