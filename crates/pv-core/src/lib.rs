//! Pickup Verification & Cancellation Settlement Engine
//!
//! This crate governs how a vehicle-transport shipment moves from "driver
//! assigned" through physical pickup, and how the original price is divided
//! among client, driver, and platform when a job is cancelled or disputed.

pub mod engine;
pub mod geo;
pub mod settlement;
pub mod status;
pub mod store;
pub mod verification;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use engine::{ArrivalOutcome, VerificationEngine, VerificationResult};
pub use settlement::{
    CancellationRecord, CancellationStage, CancellationType, RefundSplit, RefundStatus,
};
pub use settlement::calculator::calculate_refund;
pub use settlement::policy::{CancellationPolicy, PolicyTable};
pub use status::{PickupVerificationState, Shipment, ShipmentStatus};
pub use store::{EngineStore, MemoryStore, PhotoStore, SettlementNotifier};
pub use verification::{
    ClientResponse, Decision, PhotoAngle, PhotoRef, PickupVerification, VerificationPhoto,
    VerificationStatus,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid transition for shipment {shipment_id}: expected {expected}, found {actual}")]
    InvalidTransition {
        shipment_id: Uuid,
        expected: ShipmentStatus,
        actual: ShipmentStatus,
    },

    #[error("operation not valid while shipment {shipment_id} is {status}")]
    InvalidShipmentState {
        shipment_id: Uuid,
        status: ShipmentStatus,
    },

    #[error("shipment {0} already has an open verification")]
    AlreadyVerifying(Uuid),

    #[error("verification {0} already has a submitted decision")]
    AlreadySubmitted(Uuid),

    #[error("client response not applicable for verification {0}")]
    ResponseNotApplicable(Uuid),

    #[error("photo set incomplete, missing required angles: {missing:?}")]
    IncompletePhotoSet { missing: Vec<PhotoAngle> },

    #[error("angle {0} already holds the maximum number of photos")]
    DuplicateAngle(PhotoAngle),

    #[error("amount must not be negative: {0}")]
    InvalidAmount(Decimal),

    #[error("refund status cannot move from {from} to {to}")]
    InvalidRefundTransition { from: RefundStatus, to: RefundStatus },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("actor {actor_id} is not permitted to {action}")]
    ActorNotPermitted {
        actor_id: Uuid,
        action: &'static str,
    },

    #[error("driver is {distance_m:.0}m from the pickup point, outside the {max_m:.0}m radius")]
    OutsidePickupRadius { distance_m: f64, max_m: f64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("upstream {service} unavailable: {detail}")]
    Upstream {
        service: &'static str,
        detail: String,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Caller-supplied coordinate with optional reported accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: Option<f64>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            accuracy_m: None,
        }
    }
}

/// Role of the acting party, resolved server-side from the shipment record.
/// Never accepted as a caller-supplied field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Driver,
    Admin,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Client => "client",
            ActorRole::Driver => "driver",
            ActorRole::Admin => "admin",
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(ActorRole::Client),
            "driver" => Ok(ActorRole::Driver),
            "admin" => Ok(ActorRole::Admin),
            other => Err(format!("unknown actor role: {other}")),
        }
    }
}

/// Engine policy knobs.
///
/// The pickup-radius gate is operator policy: `enforce_pickup_radius = false`
/// records the distance and logs a warning, `true` fails arrival outside the
/// radius with `OutsidePickupRadius`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum straight-line distance between the driver's reported position
    /// and the recorded pickup point, in meters.
    pub pickup_radius_m: f64,
    /// Whether the radius gate is a hard failure or a soft warning.
    pub enforce_pickup_radius: bool,
    /// How many photos a single non-freeform angle may hold.
    pub required_angle_photo_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pickup_radius_m: 500.0,
            enforce_pickup_radius: false,
            required_angle_photo_cap: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_soft_gated() {
        let config = EngineConfig::default();
        assert!(!config.enforce_pickup_radius);
        assert_eq!(config.required_angle_photo_cap, 1);
    }

    #[test]
    fn actor_role_round_trip() {
        for role in [ActorRole::Client, ActorRole::Driver, ActorRole::Admin] {
            assert_eq!(role.as_str().parse::<ActorRole>().unwrap(), role);
        }
    }
}
