//! API models

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pv_core::{
    CancellationRecord, CancellationType, ClientResponse, Decision, GeoPoint, PickupVerification,
    RefundStatus, ShipmentStatus, VerificationPhoto,
};
use pv_core::verification::VerificationDifference;

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub shipment_id: Uuid,
    pub status: ShipmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct ArrivedRequest {
    pub location: GeoPoint,
}

#[derive(Debug, Serialize)]
pub struct ArrivalResponse {
    pub shipment_id: Uuid,
    pub status: ShipmentStatus,
    pub distance_from_pickup_m: f64,
    pub within_radius: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartVerificationRequest {
    pub location: GeoPoint,
}

#[derive(Debug, Serialize)]
pub struct StartVerificationResponse {
    pub verification_id: Uuid,
    pub shipment_id: Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct PhotoResponse {
    pub photo: VerificationPhoto,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    #[serde(default)]
    pub differences: Vec<VerificationDifference>,
    pub notes: Option<String>,
    pub location: GeoPoint,
    #[serde(default)]
    pub fraud_confirmed: bool,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub response: ClientResponse,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerificationResultResponse {
    pub verification: PickupVerification,
    pub shipment_status: ShipmentStatus,
    pub cancellation: Option<CancellationRecord>,
}

impl From<pv_core::VerificationResult> for VerificationResultResponse {
    fn from(result: pv_core::VerificationResult) -> Self {
        Self {
            verification: result.verification,
            shipment_status: result.shipment_status,
            cancellation: result.cancellation,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub cancellation_type: CancellationType,
    pub reason_category: String,
    pub reason_description: Option<String>,
    #[serde(default)]
    pub fraud_confirmed: bool,
    pub verification_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RefundStatusRequest {
    pub refund_status: RefundStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_request_defaults() {
        let req: DecisionRequest = serde_json::from_str(
            r#"{
                "decision": "minor_differences",
                "location": { "lat": 48.1, "lng": 11.5, "accuracy_m": 12.0 }
            }"#,
        )
        .unwrap();
        assert_eq!(req.decision, Decision::MinorDifferences);
        assert!(req.differences.is_empty());
        assert!(!req.fraud_confirmed);
    }

    #[test]
    fn cancel_request_parses_snake_case_type() {
        let req: CancelRequest = serde_json::from_str(
            r#"{
                "cancellation_type": "after_acceptance_before_pickup",
                "reason_category": "client_no_show"
            }"#,
        )
        .unwrap();
        assert_eq!(
            req.cancellation_type,
            CancellationType::AfterAcceptanceBeforePickup
        );
        assert!(req.verification_id.is_none());
    }
}
