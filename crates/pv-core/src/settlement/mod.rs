//! Cancellation settlement types
//!
//! A `CancellationRecord` is created once per cancellation event and is
//! immutable afterwards except for `refund_status`, which the external
//! payment-settlement collaborator advances asynchronously.

pub mod calculator;
pub mod policy;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ActorRole;

/// Taxonomy key used to look up refund/compensation percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationType {
    BeforeAcceptance,
    AfterAcceptanceBeforePickup,
    AtPickupMismatch,
    AtPickupFraud,
    InTransit,
    ForceMajeure,
}

impl CancellationType {
    pub const ALL: [CancellationType; 6] = [
        CancellationType::BeforeAcceptance,
        CancellationType::AfterAcceptanceBeforePickup,
        CancellationType::AtPickupMismatch,
        CancellationType::AtPickupFraud,
        CancellationType::InTransit,
        CancellationType::ForceMajeure,
    ];

    /// Lifecycle stage at which this cancellation type occurs.
    pub fn stage(self) -> CancellationStage {
        match self {
            CancellationType::BeforeAcceptance
            | CancellationType::AfterAcceptanceBeforePickup
            | CancellationType::ForceMajeure => CancellationStage::BeforePickup,
            CancellationType::AtPickupMismatch | CancellationType::AtPickupFraud => {
                CancellationStage::AtPickup
            }
            CancellationType::InTransit => CancellationStage::InTransit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationType::BeforeAcceptance => "before_acceptance",
            CancellationType::AfterAcceptanceBeforePickup => "after_acceptance_before_pickup",
            CancellationType::AtPickupMismatch => "at_pickup_mismatch",
            CancellationType::AtPickupFraud => "at_pickup_fraud",
            CancellationType::InTransit => "in_transit",
            CancellationType::ForceMajeure => "force_majeure",
        }
    }
}

impl std::fmt::Display for CancellationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CancellationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use CancellationType::*;
        Ok(match s {
            "before_acceptance" => BeforeAcceptance,
            "after_acceptance_before_pickup" => AfterAcceptanceBeforePickup,
            "at_pickup_mismatch" => AtPickupMismatch,
            "at_pickup_fraud" => AtPickupFraud,
            "in_transit" => InTransit,
            "force_majeure" => ForceMajeure,
            other => return Err(format!("unknown cancellation type: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationStage {
    BeforePickup,
    AtPickup,
    InTransit,
}

impl CancellationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationStage::BeforePickup => "before_pickup",
            CancellationStage::AtPickup => "at_pickup",
            CancellationStage::InTransit => "in_transit",
        }
    }
}

impl std::fmt::Display for CancellationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CancellationStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "before_pickup" => CancellationStage::BeforePickup,
            "at_pickup" => CancellationStage::AtPickup,
            "in_transit" => CancellationStage::InTransit,
            other => return Err(format!("unknown cancellation stage: {other}")),
        })
    }
}

/// Settlement progress reported by the external payment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Disputed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Processing => "processing",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
            RefundStatus::Disputed => "disputed",
        }
    }

    /// Allowed settlement progressions. `Completed` and `Disputed` are
    /// terminal; a failed settlement may still be disputed.
    pub fn can_transition_to(self, next: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Disputed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Disputed)
                | (Failed, Disputed)
        )
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use RefundStatus::*;
        Ok(match s {
            "pending" => Pending,
            "processing" => Processing,
            "completed" => Completed,
            "failed" => Failed,
            "disputed" => Disputed,
            other => return Err(format!("unknown refund status: {other}")),
        })
    }
}

/// Computed three-way split for one cancellation event. The three legs sum
/// exactly to the original amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundSplit {
    /// Effective type after the fraud override.
    pub cancellation_type: CancellationType,
    pub client_refund: Decimal,
    pub driver_compensation: Decimal,
    pub platform_fee: Decimal,
}

impl RefundSplit {
    pub fn total(&self) -> Decimal {
        self.client_refund + self.driver_compensation + self.platform_fee
    }
}

/// Intended settlement for a single cancellation event. Fund movement is
/// external; this record is what the payment collaborator consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub cancelled_by: Uuid,
    pub canceller_role: ActorRole,
    pub cancellation_type: CancellationType,
    pub cancellation_stage: CancellationStage,
    pub reason_category: String,
    pub reason_description: Option<String>,
    pub fraud_confirmed: bool,
    pub original_amount: Decimal,
    pub client_refund_amount: Decimal,
    pub driver_compensation_amount: Decimal,
    pub platform_fee_amount: Decimal,
    pub refund_status: RefundStatus,
    pub verification_id: Option<Uuid>,
    pub evidence_photos: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_cover_all_types() {
        assert_eq!(
            CancellationType::AtPickupFraud.stage(),
            CancellationStage::AtPickup
        );
        assert_eq!(
            CancellationType::InTransit.stage(),
            CancellationStage::InTransit
        );
        assert_eq!(
            CancellationType::ForceMajeure.stage(),
            CancellationStage::BeforePickup
        );
    }

    #[test]
    fn refund_status_terminals() {
        use RefundStatus::*;
        for next in [Pending, Processing, Completed, Failed, Disputed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Disputed.can_transition_to(next));
        }
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Failed.can_transition_to(Disputed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn type_string_round_trip() {
        for ty in CancellationType::ALL {
            assert_eq!(ty.as_str().parse::<CancellationType>().unwrap(), ty);
        }
    }
}
