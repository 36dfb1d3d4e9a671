//! Engine error to HTTP response mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use pv_core::EngineError;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

fn kind(err: &EngineError) -> &'static str {
    match err {
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::InvalidShipmentState { .. } => "invalid_shipment_state",
        EngineError::AlreadyVerifying(_) => "already_verifying",
        EngineError::AlreadySubmitted(_) => "already_submitted",
        EngineError::ResponseNotApplicable(_) => "response_not_applicable",
        EngineError::IncompletePhotoSet { .. } => "incomplete_photo_set",
        EngineError::DuplicateAngle(_) => "duplicate_angle",
        EngineError::InvalidAmount(_) => "invalid_amount",
        EngineError::InvalidRefundTransition { .. } => "invalid_refund_transition",
        EngineError::NotFound { .. } => "not_found",
        EngineError::ActorNotPermitted { .. } => "actor_not_permitted",
        EngineError::OutsidePickupRadius { .. } => "outside_pickup_radius",
        EngineError::Config(_) => "config",
        EngineError::Upstream { .. } => "upstream_unavailable",
    }
}

fn status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::ActorNotPermitted { .. } => StatusCode::FORBIDDEN,
        EngineError::InvalidTransition { .. }
        | EngineError::InvalidShipmentState { .. }
        | EngineError::AlreadyVerifying(_)
        | EngineError::AlreadySubmitted(_)
        | EngineError::ResponseNotApplicable(_)
        | EngineError::InvalidRefundTransition { .. }
        | EngineError::OutsidePickupRadius { .. } => StatusCode::CONFLICT,
        EngineError::IncompletePhotoSet { .. }
        | EngineError::DuplicateAngle(_)
        | EngineError::InvalidAmount(_)
        | EngineError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Upstream { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: kind(&self.0),
            message: self.0.to_string(),
        };
        (status(&self.0), Json(body)).into_response()
    }
}
