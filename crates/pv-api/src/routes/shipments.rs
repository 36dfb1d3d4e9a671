//! Shipment lifecycle routes

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use pv_core::CancellationRecord;

use crate::actor::ActorId;
use crate::error::ApiError;
use crate::models::{AckResponse, ArrivalResponse, ArrivedRequest, CancelRequest};
use crate::AppState;

pub async fn mark_en_route(
    State(state): State<Arc<AppState>>,
    Path(shipment_id): Path<Uuid>,
    ActorId(actor_id): ActorId,
) -> Result<Json<AckResponse>, ApiError> {
    let shipment = state
        .engine
        .mark_driver_en_route(shipment_id, actor_id)
        .await?;
    Ok(Json(AckResponse {
        shipment_id: shipment.id,
        status: shipment.status,
    }))
}

pub async fn mark_arrived(
    State(state): State<Arc<AppState>>,
    Path(shipment_id): Path<Uuid>,
    ActorId(actor_id): ActorId,
    Json(req): Json<ArrivedRequest>,
) -> Result<Json<ArrivalResponse>, ApiError> {
    let outcome = state
        .engine
        .mark_driver_arrived(shipment_id, actor_id, req.location)
        .await?;
    Ok(Json(ArrivalResponse {
        shipment_id: outcome.shipment.id,
        status: outcome.shipment.status,
        distance_from_pickup_m: outcome.distance_from_pickup_m,
        within_radius: outcome.within_radius,
    }))
}

pub async fn cancel_at_pickup(
    State(state): State<Arc<AppState>>,
    Path(shipment_id): Path<Uuid>,
    ActorId(actor_id): ActorId,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CancellationRecord>, ApiError> {
    let record = state
        .engine
        .cancel_at_pickup(
            shipment_id,
            actor_id,
            req.cancellation_type,
            &req.reason_category,
            req.reason_description,
            req.fraud_confirmed,
            req.verification_id,
        )
        .await?;
    Ok(Json(record))
}
