//! Verification engine
//!
//! Orchestrates the pickup lifecycle over injected collaborators. One engine
//! instance is constructed per process with explicit dependencies; there is
//! no global state. Actor roles are resolved from the shipment record, never
//! from caller-supplied fields.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::geo::haversine_distance_m;
use crate::settlement::calculator::calculate_refund_with;
use crate::settlement::policy::PolicyTable;
use crate::settlement::{CancellationRecord, CancellationType, RefundStatus};
use crate::status::{PickupVerificationState, Shipment, ShipmentStatus};
use crate::store::{
    EngineStore, PhotoStore, ResolutionClaim, ResolutionWrites, SettlementNotifier,
    ShipmentTransition,
};
use crate::verification::resolution::{resolve, Resolution};
use crate::verification::{
    ClientResponse, Decision, PhotoAngle, PickupVerification, VerificationDifference,
    VerificationPhoto, VerificationStatus,
};
use crate::{ActorRole, EngineConfig, EngineError, EngineResult, GeoPoint};

/// Outcome of a driver arrival, including the measured proximity.
#[derive(Debug, Clone)]
pub struct ArrivalOutcome {
    pub shipment: Shipment,
    pub distance_from_pickup_m: f64,
    pub within_radius: bool,
}

/// Outcome of a decision submission or client response.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub verification: PickupVerification,
    pub shipment_status: ShipmentStatus,
    pub cancellation: Option<CancellationRecord>,
}

pub struct VerificationEngine {
    store: Arc<dyn EngineStore>,
    photos: Arc<dyn PhotoStore>,
    settlement: Arc<dyn SettlementNotifier>,
    policies: PolicyTable,
    config: EngineConfig,
}

impl VerificationEngine {
    pub fn new(
        store: Arc<dyn EngineStore>,
        photos: Arc<dyn PhotoStore>,
        settlement: Arc<dyn SettlementNotifier>,
    ) -> Self {
        Self::with_config(
            store,
            photos,
            settlement,
            PolicyTable::default(),
            EngineConfig::default(),
        )
    }

    pub fn with_config(
        store: Arc<dyn EngineStore>,
        photos: Arc<dyn PhotoStore>,
        settlement: Arc<dyn SettlementNotifier>,
        policies: PolicyTable,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            photos,
            settlement,
            policies,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Driver marks themselves en route to the pickup point.
    pub async fn mark_driver_en_route(
        &self,
        shipment_id: Uuid,
        actor_id: Uuid,
    ) -> EngineResult<Shipment> {
        let shipment = self.store.shipment(shipment_id).await?;
        require_driver(&shipment, actor_id, "mark the driver en route")?;

        self.store
            .transition_shipment(ShipmentTransition {
                shipment_id,
                actor_id,
                expected: ShipmentStatus::Accepted,
                to: ShipmentStatus::DriverEnRoute,
                pickup_state: None,
            })
            .await
    }

    /// Driver reports arrival. Proximity to the recorded pickup point is
    /// always measured; whether it blocks the transition is policy.
    pub async fn mark_driver_arrived(
        &self,
        shipment_id: Uuid,
        actor_id: Uuid,
        location: GeoPoint,
    ) -> EngineResult<ArrivalOutcome> {
        let shipment = self.store.shipment(shipment_id).await?;
        require_driver(&shipment, actor_id, "mark the driver arrived")?;

        let distance_from_pickup_m = haversine_distance_m(&location, &shipment.pickup_location);
        let within_radius = distance_from_pickup_m <= self.config.pickup_radius_m;
        if !within_radius {
            if self.config.enforce_pickup_radius {
                return Err(EngineError::OutsidePickupRadius {
                    distance_m: distance_from_pickup_m,
                    max_m: self.config.pickup_radius_m,
                });
            }
            warn!(
                %shipment_id,
                distance_m = distance_from_pickup_m,
                radius_m = self.config.pickup_radius_m,
                "driver reported arrival outside the pickup radius"
            );
        }

        let shipment = self
            .store
            .transition_shipment(ShipmentTransition {
                shipment_id,
                actor_id,
                expected: ShipmentStatus::DriverEnRoute,
                to: ShipmentStatus::DriverArrived,
                pickup_state: None,
            })
            .await?;

        Ok(ArrivalOutcome {
            shipment,
            distance_from_pickup_m,
            within_radius,
        })
    }

    /// Opens a verification session for an arrived driver.
    pub async fn start_verification(
        &self,
        shipment_id: Uuid,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> EngineResult<PickupVerification> {
        let shipment = self.store.shipment(shipment_id).await?;
        require_driver(&shipment, driver_id, "start a verification")?;

        let distance_m = haversine_distance_m(&location, &shipment.pickup_location);
        if distance_m > self.config.pickup_radius_m {
            warn!(
                %shipment_id,
                distance_m,
                "verification started away from the pickup location"
            );
        }

        if shipment.status != ShipmentStatus::DriverArrived {
            return Err(EngineError::InvalidShipmentState {
                shipment_id,
                status: shipment.status,
            });
        }
        if self.store.active_verification(shipment_id).await?.is_some() {
            return Err(EngineError::AlreadyVerifying(shipment_id));
        }

        let verification = PickupVerification::new(shipment_id, driver_id);
        let opened = self
            .store
            .open_verification(
                verification,
                ShipmentTransition {
                    shipment_id,
                    actor_id: driver_id,
                    expected: ShipmentStatus::DriverArrived,
                    to: ShipmentStatus::PickupVerificationPending,
                    pickup_state: Some(PickupVerificationState::InProgress),
                },
            )
            .await
            .map_err(|err| match err {
                // A concurrent start won the CAS between our check and write.
                EngineError::InvalidTransition { actual, .. }
                    if actual == ShipmentStatus::PickupVerificationPending =>
                {
                    EngineError::AlreadyVerifying(shipment_id)
                }
                other => other,
            })?;

        info!(%shipment_id, verification_id = %opened.id, "verification session opened");
        Ok(opened)
    }

    /// Uploads the image to the photo store, then appends the resulting
    /// reference as a child row of the verification.
    pub async fn attach_photo(
        &self,
        verification_id: Uuid,
        angle: PhotoAngle,
        image: &[u8],
        location: Option<GeoPoint>,
    ) -> EngineResult<VerificationPhoto> {
        let verification = self.store.verification(verification_id).await?;
        if verification.decision.is_some() {
            return Err(EngineError::AlreadySubmitted(verification_id));
        }
        if let Some(cap) = angle.capacity(self.config.required_angle_photo_cap) {
            if verification.photos_for_angle(angle) >= cap {
                return Err(EngineError::DuplicateAngle(angle));
            }
        }

        let photo_ref = self.photos.store_photo(verification_id, angle, image).await?;
        let photo = VerificationPhoto {
            id: Uuid::new_v4(),
            angle,
            photo_ref,
            location,
            taken_at: Utc::now(),
        };
        // The store re-checks the cap atomically; losing that race leaves an
        // orphaned object in the photo store, which is acceptable.
        self.store
            .append_photo(verification_id, photo.clone(), self.config.required_angle_photo_cap)
            .await?;
        Ok(photo)
    }

    /// Driver submits the condition decision. Applies the full resolution
    /// (verification, shipment, optional cancellation) as one write set.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_decision(
        &self,
        verification_id: Uuid,
        actor_id: Uuid,
        decision: Decision,
        differences: Vec<VerificationDifference>,
        driver_notes: Option<String>,
        location: GeoPoint,
        fraud_confirmed: bool,
    ) -> EngineResult<VerificationResult> {
        let verification = self.store.verification(verification_id).await?;
        if verification.driver_id != actor_id {
            return Err(EngineError::ActorNotPermitted {
                actor_id,
                action: "submit a verification decision",
            });
        }
        if verification.decision.is_some() {
            return Err(EngineError::AlreadySubmitted(verification_id));
        }
        let missing = verification.missing_required_angles();
        if !missing.is_empty() {
            return Err(EngineError::IncompletePhotoSet { missing });
        }

        let shipment = self.store.shipment(verification.shipment_id).await?;
        let distance_from_pickup_m = haversine_distance_m(&location, &shipment.pickup_location);
        let claim = ResolutionClaim::Decision {
            decision,
            differences,
            driver_notes: driver_notes.clone(),
            location,
            distance_from_pickup_m,
        };

        let now = Utc::now();
        let (writes, cancellation) = match resolve(decision, None) {
            Resolution::Approve => (
                ResolutionWrites {
                    verification_id,
                    claim,
                    verification_status: Some(VerificationStatus::ApprovedByClient),
                    completed_at: Some(now),
                    shipment_transition: Some(ShipmentTransition {
                        shipment_id: shipment.id,
                        actor_id,
                        expected: ShipmentStatus::PickupVerificationPending,
                        to: ShipmentStatus::PickupVerified,
                        pickup_state: Some(PickupVerificationState::Verified),
                    }),
                    cancellation: None,
                },
                None,
            ),
            Resolution::AwaitClient => (
                ResolutionWrites {
                    verification_id,
                    claim,
                    verification_status: None,
                    completed_at: None,
                    shipment_transition: None,
                    cancellation: None,
                },
                None,
            ),
            Resolution::Cancel {
                verification_status,
                cancellation_type,
            } => {
                let record = self.build_cancellation(
                    &shipment,
                    &verification,
                    actor_id,
                    ActorRole::Driver,
                    cancellation_type,
                    "pickup_condition_mismatch",
                    driver_notes.clone(),
                    fraud_confirmed,
                )?;
                (
                    ResolutionWrites {
                        verification_id,
                        claim,
                        verification_status: Some(verification_status),
                        completed_at: Some(now),
                        shipment_transition: Some(ShipmentTransition {
                            shipment_id: shipment.id,
                            actor_id,
                            expected: ShipmentStatus::PickupVerificationPending,
                            to: ShipmentStatus::Cancelled,
                            pickup_state: Some(match verification_status {
                                VerificationStatus::DisputedByClient => {
                                    PickupVerificationState::Disputed
                                }
                                _ => PickupVerificationState::Cancelled,
                            }),
                        }),
                        cancellation: Some(record.clone()),
                    },
                    Some(record),
                )
            }
        };

        let verification = self.store.apply_resolution(writes).await?;
        info!(
            %verification_id,
            shipment_id = %verification.shipment_id,
            decision = %decision,
            "verification decision recorded"
        );

        if let Some(record) = &cancellation {
            self.notify_settlement(record).await;
        }

        Ok(VerificationResult {
            shipment_status: self.store.shipment(verification.shipment_id).await?.status,
            cancellation,
            verification,
        })
    }

    /// Client approves or disputes a `minor_differences` decision.
    pub async fn client_respond(
        &self,
        verification_id: Uuid,
        actor_id: Uuid,
        response: ClientResponse,
        notes: Option<String>,
    ) -> EngineResult<VerificationResult> {
        let verification = self.store.verification(verification_id).await?;
        let shipment = self.store.shipment(verification.shipment_id).await?;
        if shipment.client_id != actor_id {
            return Err(EngineError::ActorNotPermitted {
                actor_id,
                action: "respond to a verification",
            });
        }
        if verification.decision != Some(Decision::MinorDifferences)
            || verification.client_response.is_some()
            || verification.status.is_terminal()
        {
            return Err(EngineError::ResponseNotApplicable(verification_id));
        }

        let claim = ResolutionClaim::ClientResponse {
            response,
            client_notes: notes,
        };
        let now = Utc::now();

        let (writes, cancellation) = match resolve(Decision::MinorDifferences, Some(response)) {
            Resolution::Approve => (
                ResolutionWrites {
                    verification_id,
                    claim,
                    verification_status: Some(VerificationStatus::ApprovedByClient),
                    completed_at: Some(now),
                    shipment_transition: Some(ShipmentTransition {
                        shipment_id: shipment.id,
                        actor_id,
                        expected: ShipmentStatus::PickupVerificationPending,
                        to: ShipmentStatus::PickupVerified,
                        pickup_state: Some(PickupVerificationState::Verified),
                    }),
                    cancellation: None,
                },
                None,
            ),
            Resolution::Cancel {
                verification_status,
                cancellation_type,
            } => {
                let record = self.build_cancellation(
                    &shipment,
                    &verification,
                    actor_id,
                    ActorRole::Client,
                    cancellation_type,
                    "client_disputed_condition",
                    None,
                    false,
                )?;
                (
                    ResolutionWrites {
                        verification_id,
                        claim,
                        verification_status: Some(verification_status),
                        completed_at: Some(now),
                        shipment_transition: Some(ShipmentTransition {
                            shipment_id: shipment.id,
                            actor_id,
                            expected: ShipmentStatus::PickupVerificationPending,
                            to: ShipmentStatus::Cancelled,
                            pickup_state: Some(PickupVerificationState::Disputed),
                        }),
                        cancellation: Some(record.clone()),
                    },
                    Some(record),
                )
            }
            // resolve() never returns AwaitClient once a response exists.
            Resolution::AwaitClient => unreachable!("response was provided"),
        };

        let verification = self.store.apply_resolution(writes).await?;
        info!(
            %verification_id,
            shipment_id = %verification.shipment_id,
            response = %response,
            "client response recorded"
        );

        if let Some(record) = &cancellation {
            self.notify_settlement(record).await;
        }

        Ok(VerificationResult {
            shipment_status: self.store.shipment(verification.shipment_id).await?.status,
            cancellation,
            verification,
        })
    }

    /// Cancellation entry point used when no verification drives the event,
    /// e.g. an admin-initiated cancellation at pickup.
    #[allow(clippy::too_many_arguments)]
    pub async fn cancel_at_pickup(
        &self,
        shipment_id: Uuid,
        actor_id: Uuid,
        cancellation_type: CancellationType,
        reason_category: &str,
        reason_description: Option<String>,
        fraud_confirmed: bool,
        verification_id: Option<Uuid>,
    ) -> EngineResult<CancellationRecord> {
        let shipment = self.store.shipment(shipment_id).await?;
        if shipment.status.is_terminal() {
            return Err(EngineError::InvalidShipmentState {
                shipment_id,
                status: shipment.status,
            });
        }

        let role = resolve_role(&shipment, actor_id);
        let verification = match verification_id {
            Some(id) => Some(self.store.verification(id).await?),
            None => None,
        };

        let split = calculate_refund_with(
            &self.policies,
            shipment.original_price,
            cancellation_type,
            fraud_confirmed,
        )?;
        let record = CancellationRecord {
            id: Uuid::new_v4(),
            shipment_id,
            cancelled_by: actor_id,
            canceller_role: role,
            cancellation_type: split.cancellation_type,
            cancellation_stage: split.cancellation_type.stage(),
            reason_category: reason_category.to_string(),
            reason_description,
            fraud_confirmed,
            original_amount: shipment.original_price,
            client_refund_amount: split.client_refund,
            driver_compensation_amount: split.driver_compensation,
            platform_fee_amount: split.platform_fee,
            refund_status: RefundStatus::Pending,
            verification_id,
            evidence_photos: verification
                .map(|v| v.photos.iter().map(|p| p.photo_ref.url.clone()).collect())
                .unwrap_or_default(),
            created_at: Utc::now(),
        };

        let record = self
            .store
            .apply_cancellation(
                ShipmentTransition {
                    shipment_id,
                    actor_id,
                    expected: shipment.status,
                    to: ShipmentStatus::Cancelled,
                    pickup_state: None,
                },
                record,
            )
            .await?;

        info!(
            %shipment_id,
            cancellation_id = %record.id,
            cancellation_type = %record.cancellation_type,
            canceller_role = %record.canceller_role,
            "shipment cancelled"
        );
        self.notify_settlement(&record).await;
        Ok(record)
    }

    /// Latest verification for a shipment.
    pub async fn verification_for_shipment(
        &self,
        shipment_id: Uuid,
    ) -> EngineResult<PickupVerification> {
        self.store
            .latest_verification(shipment_id)
            .await?
            .ok_or(EngineError::NotFound {
                kind: "verification",
                id: shipment_id,
            })
    }

    /// Settlement progress reported back by the payment collaborator.
    pub async fn report_refund_status(
        &self,
        cancellation_id: Uuid,
        next: RefundStatus,
    ) -> EngineResult<CancellationRecord> {
        let record = self.store.update_refund_status(cancellation_id, next).await?;
        info!(%cancellation_id, refund_status = %next, "refund status updated");
        Ok(record)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_cancellation(
        &self,
        shipment: &Shipment,
        verification: &PickupVerification,
        actor_id: Uuid,
        role: ActorRole,
        cancellation_type: CancellationType,
        reason_category: &str,
        reason_description: Option<String>,
        fraud_confirmed: bool,
    ) -> EngineResult<CancellationRecord> {
        let split = calculate_refund_with(
            &self.policies,
            shipment.original_price,
            cancellation_type,
            fraud_confirmed,
        )?;
        Ok(CancellationRecord {
            id: Uuid::new_v4(),
            shipment_id: shipment.id,
            cancelled_by: actor_id,
            canceller_role: role,
            cancellation_type: split.cancellation_type,
            cancellation_stage: split.cancellation_type.stage(),
            reason_category: reason_category.to_string(),
            reason_description,
            fraud_confirmed,
            original_amount: shipment.original_price,
            client_refund_amount: split.client_refund,
            driver_compensation_amount: split.driver_compensation,
            platform_fee_amount: split.platform_fee,
            refund_status: RefundStatus::Pending,
            verification_id: Some(verification.id),
            evidence_photos: verification
                .photos
                .iter()
                .map(|p| p.photo_ref.url.clone())
                .collect(),
            created_at: Utc::now(),
        })
    }

    /// The record is already persisted with `refund_status = pending`;
    /// settlement can pull pending records, so a push failure is logged and
    /// never surfaced to the caller.
    async fn notify_settlement(&self, record: &CancellationRecord) {
        if let Err(err) = self.settlement.submit(record).await {
            warn!(
                cancellation_id = %record.id,
                error = %err,
                "settlement notification failed, record remains pending"
            );
        }
    }
}

fn require_driver(shipment: &Shipment, actor_id: Uuid, action: &'static str) -> EngineResult<()> {
    if shipment.driver_id != Some(actor_id) {
        return Err(EngineError::ActorNotPermitted { actor_id, action });
    }
    Ok(())
}

fn resolve_role(shipment: &Shipment, actor_id: Uuid) -> ActorRole {
    if shipment.driver_id == Some(actor_id) {
        ActorRole::Driver
    } else if shipment.client_id == actor_id {
        ActorRole::Client
    } else {
        // Anything else reached this engine through the admin surface.
        ActorRole::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryPhotoStore, MemoryStore, NoopSettlementNotifier};
    use rust_decimal::Decimal;

    struct Fixture {
        engine: Arc<VerificationEngine>,
        store: Arc<MemoryStore>,
        shipment_id: Uuid,
        driver_id: Uuid,
        client_id: Uuid,
        pickup: GeoPoint,
    }

    fn fixture(status: ShipmentStatus) -> Fixture {
        fixture_with_config(status, EngineConfig::default())
    }

    fn fixture_with_config(status: ShipmentStatus, config: EngineConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let driver_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let pickup = GeoPoint::new(48.1351, 11.5820);
        let now = Utc::now();
        let shipment = Shipment {
            id: Uuid::new_v4(),
            status,
            client_id,
            driver_id: Some(driver_id),
            original_price: Decimal::from_str_exact("1000.00").unwrap(),
            pickup_location: pickup,
            pickup_verified: false,
            pickup_verified_at: None,
            pickup_verification_state: PickupVerificationState::NotStarted,
            created_at: now,
            updated_at: now,
        };
        let shipment_id = shipment.id;
        store.insert_shipment(shipment);

        let engine = Arc::new(VerificationEngine::with_config(
            store.clone(),
            Arc::new(InMemoryPhotoStore),
            Arc::new(NoopSettlementNotifier),
            PolicyTable::default(),
            config,
        ));
        Fixture {
            engine,
            store,
            shipment_id,
            driver_id,
            client_id,
            pickup,
        }
    }

    async fn start_with_photos(fx: &Fixture) -> PickupVerification {
        let verification = fx
            .engine
            .start_verification(fx.shipment_id, fx.driver_id, fx.pickup)
            .await
            .unwrap();
        for angle in PhotoAngle::REQUIRED {
            fx.engine
                .attach_photo(verification.id, angle, b"jpeg-bytes", Some(fx.pickup))
                .await
                .unwrap();
        }
        verification
    }

    #[tokio::test]
    async fn happy_path_matches_verifies_pickup() {
        let fx = fixture(ShipmentStatus::Accepted);
        fx.engine
            .mark_driver_en_route(fx.shipment_id, fx.driver_id)
            .await
            .unwrap();
        let arrival = fx
            .engine
            .mark_driver_arrived(fx.shipment_id, fx.driver_id, fx.pickup)
            .await
            .unwrap();
        assert!(arrival.within_radius);
        assert_eq!(arrival.shipment.status, ShipmentStatus::DriverArrived);

        let verification = start_with_photos(&fx).await;
        let result = fx
            .engine
            .submit_decision(
                verification.id,
                fx.driver_id,
                Decision::Matches,
                Vec::new(),
                None,
                fx.pickup,
                false,
            )
            .await
            .unwrap();

        assert_eq!(result.shipment_status, ShipmentStatus::PickupVerified);
        assert_eq!(
            result.verification.status,
            VerificationStatus::ApprovedByClient
        );
        assert!(result.cancellation.is_none());
        assert!(result.verification.completed_at.is_some());
        assert_eq!(result.verification.distance_from_pickup_m, Some(0.0));

        let shipment = fx.store.shipment(fx.shipment_id).await.unwrap();
        assert!(shipment.pickup_verified);
        assert!(shipment.pickup_verified_at.is_some());
        assert_eq!(
            shipment.pickup_verification_state,
            PickupVerificationState::Verified
        );
    }

    #[tokio::test]
    async fn en_route_requires_the_assigned_driver() {
        let fx = fixture(ShipmentStatus::Accepted);
        let err = fx
            .engine
            .mark_driver_en_route(fx.shipment_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ActorNotPermitted { .. }));
    }

    #[tokio::test]
    async fn hard_radius_gate_blocks_distant_arrival() {
        let fx = fixture_with_config(
            ShipmentStatus::DriverEnRoute,
            EngineConfig {
                pickup_radius_m: 200.0,
                enforce_pickup_radius: true,
                ..EngineConfig::default()
            },
        );
        // ~1.1km north of the pickup point.
        let far = GeoPoint::new(fx.pickup.lat + 0.01, fx.pickup.lng);
        let err = fx
            .engine
            .mark_driver_arrived(fx.shipment_id, fx.driver_id, far)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::OutsidePickupRadius { .. }));
    }

    #[tokio::test]
    async fn soft_radius_gate_records_distance_and_proceeds() {
        let fx = fixture_with_config(
            ShipmentStatus::DriverEnRoute,
            EngineConfig {
                pickup_radius_m: 200.0,
                enforce_pickup_radius: false,
                ..EngineConfig::default()
            },
        );
        let far = GeoPoint::new(fx.pickup.lat + 0.01, fx.pickup.lng);
        let arrival = fx
            .engine
            .mark_driver_arrived(fx.shipment_id, fx.driver_id, far)
            .await
            .unwrap();
        assert!(!arrival.within_radius);
        assert!(arrival.distance_from_pickup_m > 1_000.0);
        assert_eq!(arrival.shipment.status, ShipmentStatus::DriverArrived);
    }

    #[tokio::test]
    async fn start_requires_driver_arrived() {
        let fx = fixture(ShipmentStatus::DriverEnRoute);
        let err = fx
            .engine
            .start_verification(fx.shipment_id, fx.driver_id, fx.pickup)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidShipmentState { .. }));
    }

    #[tokio::test]
    async fn second_start_fails_already_verifying() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        fx.engine
            .start_verification(fx.shipment_id, fx.driver_id, fx.pickup)
            .await
            .unwrap();
        let err = fx
            .engine
            .start_verification(fx.shipment_id, fx.driver_id, fx.pickup)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyVerifying(_)));
    }

    #[tokio::test]
    async fn incomplete_photo_set_blocks_decision() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let verification = fx
            .engine
            .start_verification(fx.shipment_id, fx.driver_id, fx.pickup)
            .await
            .unwrap();
        // Five of six required angles.
        for angle in &PhotoAngle::REQUIRED[..5] {
            fx.engine
                .attach_photo(verification.id, *angle, b"jpeg-bytes", None)
                .await
                .unwrap();
        }
        let err = fx
            .engine
            .submit_decision(
                verification.id,
                fx.driver_id,
                Decision::Matches,
                Vec::new(),
                None,
                fx.pickup,
                false,
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, EngineError::IncompletePhotoSet { ref missing }
                if missing == &vec![PhotoAngle::Odometer])
        );
    }

    #[tokio::test]
    async fn duplicate_required_angle_rejected() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let verification = fx
            .engine
            .start_verification(fx.shipment_id, fx.driver_id, fx.pickup)
            .await
            .unwrap();
        fx.engine
            .attach_photo(verification.id, PhotoAngle::Front, b"a", None)
            .await
            .unwrap();
        let err = fx
            .engine
            .attach_photo(verification.id, PhotoAngle::Front, b"b", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateAngle(PhotoAngle::Front)));
    }

    #[tokio::test]
    async fn second_submission_fails_and_first_decision_stands() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let verification = start_with_photos(&fx).await;
        fx.engine
            .submit_decision(
                verification.id,
                fx.driver_id,
                Decision::Matches,
                Vec::new(),
                None,
                fx.pickup,
                false,
            )
            .await
            .unwrap();

        let err = fx
            .engine
            .submit_decision(
                verification.id,
                fx.driver_id,
                Decision::MajorIssues,
                Vec::new(),
                None,
                fx.pickup,
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadySubmitted(_)));

        let stored = fx.store.verification(verification.id).await.unwrap();
        assert_eq!(stored.decision, Some(Decision::Matches));
    }

    #[tokio::test]
    async fn concurrent_submissions_admit_exactly_one() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let verification = start_with_photos(&fx).await;

        let submit = |decision: Decision| {
            let engine = fx.engine.clone();
            let verification_id = verification.id;
            let driver_id = fx.driver_id;
            let pickup = fx.pickup;
            tokio::spawn(async move {
                engine
                    .submit_decision(
                        verification_id,
                        driver_id,
                        decision,
                        Vec::new(),
                        None,
                        pickup,
                        false,
                    )
                    .await
            })
        };

        let a = submit(Decision::Matches);
        let b = submit(Decision::MajorIssues);
        let results = [a.await.unwrap(), b.await.unwrap()];

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(EngineError::AlreadySubmitted(_)) | Err(EngineError::InvalidTransition { .. })
        )));
    }

    #[tokio::test]
    async fn minor_differences_waits_then_client_approves() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let verification = start_with_photos(&fx).await;

        let result = fx
            .engine
            .submit_decision(
                verification.id,
                fx.driver_id,
                Decision::MinorDifferences,
                Vec::new(),
                Some("small scratch on rear bumper".to_string()),
                fx.pickup,
                false,
            )
            .await
            .unwrap();
        assert_eq!(
            result.shipment_status,
            ShipmentStatus::PickupVerificationPending
        );
        assert_eq!(result.verification.status, VerificationStatus::Pending);
        assert!(result.cancellation.is_none());

        let result = fx
            .engine
            .client_respond(
                verification.id,
                fx.client_id,
                ClientResponse::Approved,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.shipment_status, ShipmentStatus::PickupVerified);
        assert_eq!(
            result.verification.status,
            VerificationStatus::ApprovedByClient
        );
    }

    #[tokio::test]
    async fn minor_differences_disputed_cancels_with_one_record() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let verification = start_with_photos(&fx).await;

        fx.engine
            .submit_decision(
                verification.id,
                fx.driver_id,
                Decision::MinorDifferences,
                Vec::new(),
                None,
                fx.pickup,
                false,
            )
            .await
            .unwrap();
        let result = fx
            .engine
            .client_respond(
                verification.id,
                fx.client_id,
                ClientResponse::Disputed,
                Some("odometer reading does not match the listing".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(result.shipment_status, ShipmentStatus::Cancelled);
        assert_eq!(
            result.verification.status,
            VerificationStatus::DisputedByClient
        );

        let records = fx.store.cancellations_for_shipment(fx.shipment_id);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.cancellation_type, CancellationType::AtPickupMismatch);
        assert_eq!(record.canceller_role, ActorRole::Client);
        assert_eq!(record.verification_id, Some(verification.id));
        // 70 / 20 / 10 of 1000.00
        assert_eq!(
            record.client_refund_amount,
            Decimal::from_str_exact("700.00").unwrap()
        );
        assert_eq!(
            record.driver_compensation_amount,
            Decimal::from_str_exact("200.00").unwrap()
        );
        assert_eq!(
            record.platform_fee_amount,
            Decimal::from_str_exact("100.00").unwrap()
        );
    }

    #[tokio::test]
    async fn client_response_not_applicable_after_matches() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let verification = start_with_photos(&fx).await;
        fx.engine
            .submit_decision(
                verification.id,
                fx.driver_id,
                Decision::Matches,
                Vec::new(),
                None,
                fx.pickup,
                false,
            )
            .await
            .unwrap();

        let err = fx
            .engine
            .client_respond(
                verification.id,
                fx.client_id,
                ClientResponse::Approved,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ResponseNotApplicable(_)));
    }

    #[tokio::test]
    async fn second_client_response_not_applicable() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let verification = start_with_photos(&fx).await;
        fx.engine
            .submit_decision(
                verification.id,
                fx.driver_id,
                Decision::MinorDifferences,
                Vec::new(),
                None,
                fx.pickup,
                false,
            )
            .await
            .unwrap();
        fx.engine
            .client_respond(
                verification.id,
                fx.client_id,
                ClientResponse::Approved,
                None,
            )
            .await
            .unwrap();

        let err = fx
            .engine
            .client_respond(
                verification.id,
                fx.client_id,
                ClientResponse::Disputed,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ResponseNotApplicable(_)));
    }

    #[tokio::test]
    async fn major_issues_cancels_with_mismatch_record() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let verification = start_with_photos(&fx).await;

        let result = fx
            .engine
            .submit_decision(
                verification.id,
                fx.driver_id,
                Decision::MajorIssues,
                vec![VerificationDifference {
                    difference_type: "body_damage".to_string(),
                    severity: crate::verification::DifferenceSeverity::Major,
                    description: "large dent in driver door".to_string(),
                    area: "driver_side".to_string(),
                    before_photo: None,
                    after_photo: None,
                }],
                Some("vehicle condition far below listing".to_string()),
                fx.pickup,
                false,
            )
            .await
            .unwrap();

        assert_eq!(result.shipment_status, ShipmentStatus::Cancelled);
        assert_eq!(result.verification.status, VerificationStatus::Cancelled);
        let record = result.cancellation.expect("cancellation record");
        assert_eq!(record.cancellation_type, CancellationType::AtPickupMismatch);
        assert_eq!(record.canceller_role, ActorRole::Driver);
        assert!(!record.fraud_confirmed);
        assert_eq!(record.evidence_photos.len(), 6);
        assert_eq!(record.refund_status, RefundStatus::Pending);
    }

    #[tokio::test]
    async fn fraud_confirmed_major_issues_uses_fraud_split() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let verification = start_with_photos(&fx).await;

        let result = fx
            .engine
            .submit_decision(
                verification.id,
                fx.driver_id,
                Decision::MajorIssues,
                Vec::new(),
                None,
                fx.pickup,
                true,
            )
            .await
            .unwrap();

        let record = result.cancellation.expect("cancellation record");
        assert_eq!(record.cancellation_type, CancellationType::AtPickupFraud);
        assert!(record.fraud_confirmed);
        assert_eq!(record.client_refund_amount, Decimal::ZERO);
        assert_eq!(
            record.driver_compensation_amount,
            Decimal::from_str_exact("400.00").unwrap()
        );
        assert_eq!(
            record.platform_fee_amount,
            Decimal::from_str_exact("600.00").unwrap()
        );
    }

    #[tokio::test]
    async fn admin_cancel_at_pickup_without_verification() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let admin_id = Uuid::new_v4();

        let record = fx
            .engine
            .cancel_at_pickup(
                fx.shipment_id,
                admin_id,
                CancellationType::AfterAcceptanceBeforePickup,
                "client_no_show",
                Some("client unreachable for 2 hours".to_string()),
                false,
                None,
            )
            .await
            .unwrap();

        assert_eq!(record.canceller_role, ActorRole::Admin);
        assert_eq!(
            record.client_refund_amount,
            Decimal::from_str_exact("800.00").unwrap()
        );
        assert_eq!(record.refund_status, RefundStatus::Pending);
        assert!(record.verification_id.is_none());

        let shipment = fx.store.shipment(fx.shipment_id).await.unwrap();
        assert_eq!(shipment.status, ShipmentStatus::Cancelled);

        // Terminal: nothing moves a cancelled shipment.
        let err = fx
            .engine
            .cancel_at_pickup(
                fx.shipment_id,
                admin_id,
                CancellationType::InTransit,
                "duplicate",
                None,
                false,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidShipmentState { .. }));
    }

    #[tokio::test]
    async fn refund_status_progression_is_guarded() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let record = fx
            .engine
            .cancel_at_pickup(
                fx.shipment_id,
                Uuid::new_v4(),
                CancellationType::ForceMajeure,
                "road_closure",
                None,
                false,
                None,
            )
            .await
            .unwrap();

        let record = fx
            .engine
            .report_refund_status(record.id, RefundStatus::Processing)
            .await
            .unwrap();
        assert_eq!(record.refund_status, RefundStatus::Processing);

        let record = fx
            .engine
            .report_refund_status(record.id, RefundStatus::Completed)
            .await
            .unwrap();
        assert_eq!(record.refund_status, RefundStatus::Completed);

        let err = fx
            .engine
            .report_refund_status(record.id, RefundStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRefundTransition { .. }));
    }

    #[tokio::test]
    async fn get_verification_returns_latest_or_not_found() {
        let fx = fixture(ShipmentStatus::DriverArrived);
        let err = fx
            .engine
            .verification_for_shipment(fx.shipment_id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));

        let verification = fx
            .engine
            .start_verification(fx.shipment_id, fx.driver_id, fx.pickup)
            .await
            .unwrap();
        let found = fx
            .engine
            .verification_for_shipment(fx.shipment_id)
            .await
            .unwrap();
        assert_eq!(found.id, verification.id);
    }
}
