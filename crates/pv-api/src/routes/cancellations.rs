//! Settlement webhook routes
//!
//! The payment-settlement service consumes cancellation records
//! asynchronously and reports progress here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use pv_core::CancellationRecord;

use crate::error::ApiError;
use crate::models::RefundStatusRequest;
use crate::AppState;

pub async fn report_refund_status(
    State(state): State<Arc<AppState>>,
    Path(cancellation_id): Path<Uuid>,
    Json(req): Json<RefundStatusRequest>,
) -> Result<Json<CancellationRecord>, ApiError> {
    let record = state
        .engine
        .report_refund_status(cancellation_id, req.refund_status)
        .await?;
    Ok(Json(record))
}
