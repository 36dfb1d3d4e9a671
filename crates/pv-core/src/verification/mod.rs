//! Pickup verification session types
//!
//! One in-progress inspection per shipment: an append-only photo sequence
//! over a closed angle vocabulary, the driver's condition decision, and an
//! optional client response when the decision is `minor_differences`.

pub mod resolution;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::GeoPoint;

/// Closed vocabulary of photo angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoAngle {
    Front,
    Rear,
    DriverSide,
    PassengerSide,
    FrontDriverQuarter,
    FrontPassengerQuarter,
    RearDriverQuarter,
    RearPassengerQuarter,
    Dashboard,
    Interior,
    Odometer,
    DamageCloseup,
}

impl PhotoAngle {
    /// The six angles every verification must cover before a decision may
    /// be submitted.
    pub const REQUIRED: [PhotoAngle; 6] = [
        PhotoAngle::Front,
        PhotoAngle::Rear,
        PhotoAngle::DriverSide,
        PhotoAngle::PassengerSide,
        PhotoAngle::Dashboard,
        PhotoAngle::Odometer,
    ];

    pub fn is_required(self) -> bool {
        Self::REQUIRED.contains(&self)
    }

    /// Photo capacity for this angle given the configured per-angle cap.
    /// `None` means unlimited (freeform damage close-ups).
    pub fn capacity(self, cap: usize) -> Option<usize> {
        match self {
            PhotoAngle::DamageCloseup => None,
            _ => Some(cap),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoAngle::Front => "front",
            PhotoAngle::Rear => "rear",
            PhotoAngle::DriverSide => "driver_side",
            PhotoAngle::PassengerSide => "passenger_side",
            PhotoAngle::FrontDriverQuarter => "front_driver_quarter",
            PhotoAngle::FrontPassengerQuarter => "front_passenger_quarter",
            PhotoAngle::RearDriverQuarter => "rear_driver_quarter",
            PhotoAngle::RearPassengerQuarter => "rear_passenger_quarter",
            PhotoAngle::Dashboard => "dashboard",
            PhotoAngle::Interior => "interior",
            PhotoAngle::Odometer => "odometer",
            PhotoAngle::DamageCloseup => "damage_closeup",
        }
    }
}

impl std::fmt::Display for PhotoAngle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhotoAngle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PhotoAngle::*;
        Ok(match s {
            "front" => Front,
            "rear" => Rear,
            "driver_side" => DriverSide,
            "passenger_side" => PassengerSide,
            "front_driver_quarter" => FrontDriverQuarter,
            "front_passenger_quarter" => FrontPassengerQuarter,
            "rear_driver_quarter" => RearDriverQuarter,
            "rear_passenger_quarter" => RearPassengerQuarter,
            "dashboard" => Dashboard,
            "interior" => Interior,
            "odometer" => Odometer,
            "damage_closeup" => DamageCloseup,
            other => return Err(format!("unknown photo angle: {other}")),
        })
    }
}

/// Durable reference to a stored image. The engine never keeps raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRef {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationPhoto {
    pub id: Uuid,
    pub angle: PhotoAngle,
    pub photo_ref: PhotoRef,
    pub location: Option<GeoPoint>,
    pub taken_at: DateTime<Utc>,
}

/// The driver's classification of pickup condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Matches,
    MinorDifferences,
    MajorIssues,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Matches => "matches",
            Decision::MinorDifferences => "minor_differences",
            Decision::MajorIssues => "major_issues",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "matches" => Decision::Matches,
            "minor_differences" => Decision::MinorDifferences,
            "major_issues" => Decision::MajorIssues,
            other => return Err(format!("unknown decision: {other}")),
        })
    }
}

/// Client answer to a `minor_differences` decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientResponse {
    Approved,
    Disputed,
}

impl ClientResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientResponse::Approved => "approved",
            ClientResponse::Disputed => "disputed",
        }
    }
}

impl std::fmt::Display for ClientResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClientResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "approved" => ClientResponse::Approved,
            "disputed" => ClientResponse::Disputed,
            other => return Err(format!("unknown client response: {other}")),
        })
    }
}

/// Session status. Transitions only run forward out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    ApprovedByClient,
    DisputedByClient,
    Cancelled,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::ApprovedByClient => "approved_by_client",
            VerificationStatus::DisputedByClient => "disputed_by_client",
            VerificationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, VerificationStatus::Pending)
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use VerificationStatus::*;
        Ok(match s {
            "pending" => Pending,
            "approved_by_client" => ApprovedByClient,
            "disputed_by_client" => DisputedByClient,
            "cancelled" => Cancelled,
            other => return Err(format!("unknown verification status: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceSeverity {
    Minor,
    Major,
}

/// A condition mismatch the driver records against the listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationDifference {
    pub difference_type: String,
    pub severity: DifferenceSeverity,
    pub description: String,
    pub area: String,
    pub before_photo: Option<Uuid>,
    pub after_photo: Option<Uuid>,
}

/// One pickup-condition inspection. At most one non-terminal instance may
/// exist per shipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupVerification {
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub driver_id: Uuid,
    pub photos: Vec<VerificationPhoto>,
    pub decision: Option<Decision>,
    pub differences: Vec<VerificationDifference>,
    pub driver_notes: Option<String>,
    pub client_response: Option<ClientResponse>,
    pub client_notes: Option<String>,
    pub verification_location: Option<GeoPoint>,
    pub distance_from_pickup_m: Option<f64>,
    pub status: VerificationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PickupVerification {
    pub fn new(shipment_id: Uuid, driver_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            shipment_id,
            driver_id,
            photos: Vec::new(),
            decision: None,
            differences: Vec::new(),
            driver_notes: None,
            client_response: None,
            client_notes: None,
            verification_location: None,
            distance_from_pickup_m: None,
            status: VerificationStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn photos_for_angle(&self, angle: PhotoAngle) -> usize {
        self.photos.iter().filter(|p| p.angle == angle).count()
    }

    /// Required angles not yet covered by at least one photo.
    pub fn missing_required_angles(&self) -> Vec<PhotoAngle> {
        PhotoAngle::REQUIRED
            .into_iter()
            .filter(|angle| self.photos_for_angle(*angle) == 0)
            .collect()
    }

    pub fn has_required_photo_set(&self) -> bool {
        self.missing_required_angles().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_verification_is_pending_and_empty() {
        let v = PickupVerification::new(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(v.status, VerificationStatus::Pending);
        assert!(v.decision.is_none());
        assert_eq!(v.missing_required_angles().len(), 6);
    }

    #[test]
    fn required_set_tracks_coverage() {
        let mut v = PickupVerification::new(Uuid::new_v4(), Uuid::new_v4());
        for angle in PhotoAngle::REQUIRED {
            assert!(!v.has_required_photo_set());
            v.photos.push(VerificationPhoto {
                id: Uuid::new_v4(),
                angle,
                photo_ref: PhotoRef {
                    url: format!("mem://{angle}"),
                },
                location: None,
                taken_at: Utc::now(),
            });
        }
        assert!(v.has_required_photo_set());
    }

    #[test]
    fn damage_closeup_is_unlimited() {
        assert_eq!(PhotoAngle::DamageCloseup.capacity(1), None);
        assert_eq!(PhotoAngle::Front.capacity(1), Some(1));
        assert_eq!(PhotoAngle::Interior.capacity(2), Some(2));
        assert!(!PhotoAngle::DamageCloseup.is_required());
    }

    #[test]
    fn angle_string_round_trip() {
        use PhotoAngle::*;
        for angle in [
            Front,
            Rear,
            DriverSide,
            PassengerSide,
            FrontDriverQuarter,
            FrontPassengerQuarter,
            RearDriverQuarter,
            RearPassengerQuarter,
            Dashboard,
            Interior,
            Odometer,
            DamageCloseup,
        ] {
            assert_eq!(angle.as_str().parse::<PhotoAngle>().unwrap(), angle);
        }
    }
}
