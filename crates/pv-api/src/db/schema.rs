//! Row types mirroring the migration schema
//!
//! Enums are stored as their snake_case strings; conversion back into
//! domain types fails loudly on values the schema should never contain.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use pv_core::verification::{
    PhotoRef, PickupVerification, VerificationDifference, VerificationPhoto,
};
use pv_core::{CancellationRecord, EngineError, EngineResult, GeoPoint, Shipment};

/// A stored value no longer parses as its domain type.
pub fn corrupt(detail: String) -> EngineError {
    EngineError::Upstream {
        service: "database",
        detail,
    }
}

fn geo(lat: Option<f64>, lng: Option<f64>, accuracy_m: Option<f64>) -> Option<GeoPoint> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint {
            lat,
            lng,
            accuracy_m,
        }),
        _ => None,
    }
}

#[derive(Debug, FromRow)]
pub struct ShipmentRow {
    pub id: Uuid,
    pub status: String,
    pub client_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub original_price: Decimal,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_verified: bool,
    pub pickup_verified_at: Option<DateTime<Utc>>,
    pub pickup_verification_state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ShipmentRow> for Shipment {
    type Error = EngineError;

    fn try_from(row: ShipmentRow) -> EngineResult<Shipment> {
        Ok(Shipment {
            id: row.id,
            status: row.status.parse().map_err(corrupt)?,
            client_id: row.client_id,
            driver_id: row.driver_id,
            original_price: row.original_price,
            pickup_location: GeoPoint::new(row.pickup_lat, row.pickup_lng),
            pickup_verified: row.pickup_verified,
            pickup_verified_at: row.pickup_verified_at,
            pickup_verification_state: row.pickup_verification_state.parse().map_err(corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct VerificationRow {
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub driver_id: Uuid,
    pub decision: Option<String>,
    pub differences: Json<Vec<VerificationDifference>>,
    pub driver_notes: Option<String>,
    pub client_response: Option<String>,
    pub client_notes: Option<String>,
    pub verification_lat: Option<f64>,
    pub verification_lng: Option<f64>,
    pub verification_accuracy_m: Option<f64>,
    pub distance_from_pickup_m: Option<f64>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl VerificationRow {
    /// Joins the verification row with its photo child rows.
    pub fn into_domain(self, photos: Vec<PhotoRow>) -> EngineResult<PickupVerification> {
        let photos = photos
            .into_iter()
            .map(VerificationPhoto::try_from)
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(PickupVerification {
            id: self.id,
            shipment_id: self.shipment_id,
            driver_id: self.driver_id,
            photos,
            decision: self
                .decision
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(corrupt)?,
            differences: self.differences.0,
            driver_notes: self.driver_notes,
            client_response: self
                .client_response
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(corrupt)?,
            client_notes: self.client_notes,
            verification_location: geo(
                self.verification_lat,
                self.verification_lng,
                self.verification_accuracy_m,
            ),
            distance_from_pickup_m: self.distance_from_pickup_m,
            status: self.status.parse().map_err(corrupt)?,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PhotoRow {
    pub id: Uuid,
    pub verification_id: Uuid,
    pub angle: String,
    pub url: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub taken_at: DateTime<Utc>,
}

impl TryFrom<PhotoRow> for VerificationPhoto {
    type Error = EngineError;

    fn try_from(row: PhotoRow) -> EngineResult<VerificationPhoto> {
        Ok(VerificationPhoto {
            id: row.id,
            angle: row.angle.parse().map_err(corrupt)?,
            photo_ref: PhotoRef { url: row.url },
            location: geo(row.lat, row.lng, row.accuracy_m),
            taken_at: row.taken_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct CancellationRow {
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub cancelled_by: Uuid,
    pub canceller_role: String,
    pub cancellation_type: String,
    pub cancellation_stage: String,
    pub reason_category: String,
    pub reason_description: Option<String>,
    pub fraud_confirmed: bool,
    pub original_amount: Decimal,
    pub client_refund_amount: Decimal,
    pub driver_compensation_amount: Decimal,
    pub platform_fee_amount: Decimal,
    pub refund_status: String,
    pub verification_id: Option<Uuid>,
    pub evidence_photos: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<CancellationRow> for CancellationRecord {
    type Error = EngineError;

    fn try_from(row: CancellationRow) -> EngineResult<CancellationRecord> {
        Ok(CancellationRecord {
            id: row.id,
            shipment_id: row.shipment_id,
            cancelled_by: row.cancelled_by,
            canceller_role: row.canceller_role.parse().map_err(corrupt)?,
            cancellation_type: row.cancellation_type.parse().map_err(corrupt)?,
            cancellation_stage: row.cancellation_stage.parse().map_err(corrupt)?,
            reason_category: row.reason_category,
            reason_description: row.reason_description,
            fraud_confirmed: row.fraud_confirmed,
            original_amount: row.original_amount,
            client_refund_amount: row.client_refund_amount,
            driver_compensation_amount: row.driver_compensation_amount,
            platform_fee_amount: row.platform_fee_amount,
            refund_status: row.refund_status.parse().map_err(corrupt)?,
            verification_id: row.verification_id,
            evidence_photos: row.evidence_photos.0,
            created_at: row.created_at,
        })
    }
}
