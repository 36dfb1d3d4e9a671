//! Shipment status state machine
//!
//! The shipment row is the single source of truth for status. Every
//! transition request carries the expected source state; a mismatch against
//! the persisted state is rejected with `InvalidTransition` so stale reads
//! can never overwrite a newer transition.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::GeoPoint;

/// Lifecycle states of a shipment. `Cancelled` and `Delivered` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    Accepted,
    DriverEnRoute,
    DriverArrived,
    PickupVerificationPending,
    PickupVerified,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "pending",
            ShipmentStatus::Accepted => "accepted",
            ShipmentStatus::DriverEnRoute => "driver_en_route",
            ShipmentStatus::DriverArrived => "driver_arrived",
            ShipmentStatus::PickupVerificationPending => "pickup_verification_pending",
            ShipmentStatus::PickupVerified => "pickup_verified",
            ShipmentStatus::PickedUp => "picked_up",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::Cancelled)
    }

    /// Whether `self -> next` is an allowed transition.
    ///
    /// Cancellation is reachable from any non-terminal state; everything
    /// else follows the pickup lifecycle in order.
    pub fn can_transition_to(self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Accepted)
                | (Accepted, DriverEnRoute)
                | (DriverEnRoute, DriverArrived)
                | (DriverArrived, PickupVerificationPending)
                | (PickupVerificationPending, PickupVerified)
                | (PickupVerified, PickedUp)
                | (PickedUp, InTransit)
                | (InTransit, Delivered)
        )
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ShipmentStatus::*;
        Ok(match s {
            "pending" => Pending,
            "accepted" | "assigned" => Accepted,
            "driver_en_route" => DriverEnRoute,
            "driver_arrived" => DriverArrived,
            "pickup_verification_pending" => PickupVerificationPending,
            "pickup_verified" => PickupVerified,
            "picked_up" => PickedUp,
            "in_transit" => InTransit,
            "delivered" => Delivered,
            "cancelled" => Cancelled,
            other => return Err(format!("unknown shipment status: {other}")),
        })
    }
}

/// Pickup-verification progress stamped onto the shipment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupVerificationState {
    NotStarted,
    InProgress,
    Verified,
    Disputed,
    Cancelled,
}

impl PickupVerificationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickupVerificationState::NotStarted => "not_started",
            PickupVerificationState::InProgress => "in_progress",
            PickupVerificationState::Verified => "verified",
            PickupVerificationState::Disputed => "disputed",
            PickupVerificationState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PickupVerificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PickupVerificationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PickupVerificationState::*;
        Ok(match s {
            "not_started" => NotStarted,
            "in_progress" => InProgress,
            "verified" => Verified,
            "disputed" => Disputed,
            "cancelled" => Cancelled,
            other => return Err(format!("unknown pickup verification state: {other}")),
        })
    }
}

/// Shipment record. Owned by the external shipment store; the engine reads
/// price and party ids and writes status plus the verification fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Uuid,
    pub status: ShipmentStatus,
    pub client_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub original_price: Decimal,
    pub pickup_location: GeoPoint,
    pub pickup_verified: bool,
    pub pickup_verified_at: Option<DateTime<Utc>>,
    pub pickup_verification_state: PickupVerificationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pickup_lifecycle_in_order() {
        use ShipmentStatus::*;
        let path = [
            Pending,
            Accepted,
            DriverEnRoute,
            DriverArrived,
            PickupVerificationPending,
            PickupVerified,
            PickedUp,
            InTransit,
            Delivered,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        use ShipmentStatus::*;
        assert!(!Accepted.can_transition_to(DriverArrived));
        assert!(!DriverArrived.can_transition_to(PickupVerified));
        assert!(!PickupVerificationPending.can_transition_to(InTransit));
        assert!(!DriverArrived.can_transition_to(DriverEnRoute));
    }

    #[test]
    fn cancellation_reachable_from_any_live_state() {
        use ShipmentStatus::*;
        for status in [
            Pending,
            Accepted,
            DriverEnRoute,
            DriverArrived,
            PickupVerificationPending,
            PickupVerified,
            PickedUp,
            InTransit,
        ] {
            assert!(status.can_transition_to(Cancelled), "{status}");
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        use ShipmentStatus::*;
        for next in [Pending, Accepted, DriverEnRoute, Cancelled, Delivered] {
            assert!(!Cancelled.can_transition_to(next));
            assert!(!Delivered.can_transition_to(next));
        }
    }

    #[test]
    fn status_string_round_trip() {
        use ShipmentStatus::*;
        for status in [
            Pending,
            Accepted,
            DriverEnRoute,
            DriverArrived,
            PickupVerificationPending,
            PickupVerified,
            PickedUp,
            InTransit,
            Delivered,
            Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ShipmentStatus>().unwrap(), status);
        }
        // Legacy alias used by the upstream assignment flow.
        assert_eq!("assigned".parse::<ShipmentStatus>().unwrap(), Accepted);
    }
}
