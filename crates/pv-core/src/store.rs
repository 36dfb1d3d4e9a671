//! Storage and collaborator seams
//!
//! The engine is injected with three collaborators: an `EngineStore` for
//! shipments, verifications, and cancellation records; a `PhotoStore` for
//! image bytes; and a `SettlementNotifier` for the payment service.
//!
//! Every mutation that must be serialized per shipment is a single store
//! operation: status transitions are compare-and-swap on the expected source
//! state, photo attachment is an atomic insert-child, and a decision or
//! client response is applied through `apply_resolution` as one all-or-
//! nothing write set.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::settlement::{CancellationRecord, RefundStatus};
use crate::status::{PickupVerificationState, Shipment, ShipmentStatus};
use crate::verification::{
    ClientResponse, Decision, PhotoAngle, PhotoRef, PickupVerification, VerificationDifference,
    VerificationPhoto, VerificationStatus,
};
use crate::{EngineError, EngineResult, GeoPoint};

/// Compare-and-swap status transition. `expected` is the source state the
/// caller read; the store rejects the write if the persisted state differs.
#[derive(Debug, Clone)]
pub struct ShipmentTransition {
    pub shipment_id: Uuid,
    pub actor_id: Uuid,
    pub expected: ShipmentStatus,
    pub to: ShipmentStatus,
    /// Pickup-verification progress stamped alongside the transition.
    /// `Verified` also sets `pickup_verified` and its timestamp.
    pub pickup_state: Option<PickupVerificationState>,
}

/// The write that claims a verification for exactly one submission.
#[derive(Debug, Clone)]
pub enum ResolutionClaim {
    /// Records the driver decision. Fails with `AlreadySubmitted` if a
    /// decision is already present.
    Decision {
        decision: Decision,
        differences: Vec<VerificationDifference>,
        driver_notes: Option<String>,
        location: GeoPoint,
        distance_from_pickup_m: f64,
    },
    /// Records the client response. Fails with `ResponseNotApplicable`
    /// unless the decision is `minor_differences` and no response exists.
    ClientResponse {
        response: ClientResponse,
        client_notes: Option<String>,
    },
}

/// One resolution applied atomically: the claim, the verification status
/// change, the shipment transition, and the cancellation record either all
/// commit or none do.
#[derive(Debug, Clone)]
pub struct ResolutionWrites {
    pub verification_id: Uuid,
    pub claim: ResolutionClaim,
    pub verification_status: Option<VerificationStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub shipment_transition: Option<ShipmentTransition>,
    pub cancellation: Option<CancellationRecord>,
}

#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn shipment(&self, id: Uuid) -> EngineResult<Shipment>;

    async fn transition_shipment(&self, transition: ShipmentTransition) -> EngineResult<Shipment>;

    /// Inserts a new pending verification and transitions the shipment in
    /// one step, so two concurrent starts cannot both succeed.
    async fn open_verification(
        &self,
        verification: PickupVerification,
        transition: ShipmentTransition,
    ) -> EngineResult<PickupVerification>;

    async fn verification(&self, id: Uuid) -> EngineResult<PickupVerification>;

    /// The non-terminal verification for a shipment, if any.
    async fn active_verification(&self, shipment_id: Uuid)
        -> EngineResult<Option<PickupVerification>>;

    /// Most recently started verification for a shipment, terminal or not.
    async fn latest_verification(&self, shipment_id: Uuid)
        -> EngineResult<Option<PickupVerification>>;

    /// Atomic insert-child photo append. Enforces the per-angle cap inside
    /// the store so concurrent uploads cannot lose updates.
    async fn append_photo(
        &self,
        verification_id: Uuid,
        photo: VerificationPhoto,
        angle_cap: usize,
    ) -> EngineResult<PickupVerification>;

    async fn apply_resolution(&self, writes: ResolutionWrites) -> EngineResult<PickupVerification>;

    /// Cancellation without a verification claim: shipment transition and
    /// record insert, all-or-nothing.
    async fn apply_cancellation(
        &self,
        transition: ShipmentTransition,
        record: CancellationRecord,
    ) -> EngineResult<CancellationRecord>;

    async fn cancellation(&self, id: Uuid) -> EngineResult<CancellationRecord>;

    /// Settlement progress reported by the payment collaborator. Guarded by
    /// `RefundStatus::can_transition_to`.
    async fn update_refund_status(
        &self,
        cancellation_id: Uuid,
        next: RefundStatus,
    ) -> EngineResult<CancellationRecord>;
}

/// Persists image bytes and returns a durable reference.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn store_photo(
        &self,
        verification_id: Uuid,
        angle: PhotoAngle,
        bytes: &[u8],
    ) -> EngineResult<PhotoRef>;
}

/// Hands a persisted cancellation record to the payment-settlement service.
/// The engine never blocks a cancellation on this call.
#[async_trait]
pub trait SettlementNotifier: Send + Sync {
    async fn submit(&self, record: &CancellationRecord) -> EngineResult<()>;
}

/// Notifier for deployments where settlement pulls pending records itself.
pub struct NoopSettlementNotifier;

#[async_trait]
impl SettlementNotifier for NoopSettlementNotifier {
    async fn submit(&self, record: &CancellationRecord) -> EngineResult<()> {
        tracing::debug!(
            cancellation_id = %record.id,
            shipment_id = %record.shipment_id,
            "settlement notification skipped (noop notifier)"
        );
        Ok(())
    }
}

#[derive(Default)]
struct MemoryInner {
    shipments: HashMap<Uuid, Shipment>,
    verifications: HashMap<Uuid, PickupVerification>,
    cancellations: HashMap<Uuid, CancellationRecord>,
}

/// In-memory backend. One mutex guards all tables, which gives the
/// per-shipment serialization rules of the trait for free.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a shipment record. Shipments are owned by the external shipment
    /// store; this is the in-process stand-in for that collaborator.
    pub fn insert_shipment(&self, shipment: Shipment) {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .shipments
            .insert(shipment.id, shipment);
    }

    /// All cancellation records for a shipment, for tests and inspection.
    pub fn cancellations_for_shipment(&self, shipment_id: Uuid) -> Vec<CancellationRecord> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .cancellations
            .values()
            .filter(|c| c.shipment_id == shipment_id)
            .cloned()
            .collect()
    }
}

fn apply_transition_locked(
    shipments: &mut HashMap<Uuid, Shipment>,
    transition: &ShipmentTransition,
) -> EngineResult<Shipment> {
    let shipment = shipments
        .get_mut(&transition.shipment_id)
        .ok_or(EngineError::NotFound {
            kind: "shipment",
            id: transition.shipment_id,
        })?;

    if shipment.status != transition.expected {
        return Err(EngineError::InvalidTransition {
            shipment_id: transition.shipment_id,
            expected: transition.expected,
            actual: shipment.status,
        });
    }
    if !transition.expected.can_transition_to(transition.to) {
        return Err(EngineError::InvalidTransition {
            shipment_id: transition.shipment_id,
            expected: transition.expected,
            actual: shipment.status,
        });
    }

    let now = Utc::now();
    shipment.status = transition.to;
    shipment.updated_at = now;
    if let Some(state) = transition.pickup_state {
        shipment.pickup_verification_state = state;
        if state == PickupVerificationState::Verified {
            shipment.pickup_verified = true;
            shipment.pickup_verified_at = Some(now);
        }
    }
    Ok(shipment.clone())
}

fn check_transition_locked(
    shipments: &HashMap<Uuid, Shipment>,
    transition: &ShipmentTransition,
) -> EngineResult<()> {
    let shipment = shipments
        .get(&transition.shipment_id)
        .ok_or(EngineError::NotFound {
            kind: "shipment",
            id: transition.shipment_id,
        })?;
    if shipment.status != transition.expected
        || !transition.expected.can_transition_to(transition.to)
    {
        return Err(EngineError::InvalidTransition {
            shipment_id: transition.shipment_id,
            expected: transition.expected,
            actual: shipment.status,
        });
    }
    Ok(())
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn shipment(&self, id: Uuid) -> EngineResult<Shipment> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .shipments
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound {
                kind: "shipment",
                id,
            })
    }

    async fn transition_shipment(&self, transition: ShipmentTransition) -> EngineResult<Shipment> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        apply_transition_locked(&mut inner.shipments, &transition)
    }

    async fn open_verification(
        &self,
        verification: PickupVerification,
        transition: ShipmentTransition,
    ) -> EngineResult<PickupVerification> {
        let mut inner = self.inner.lock().expect("memory store poisoned");

        let open_exists = inner
            .verifications
            .values()
            .any(|v| v.shipment_id == verification.shipment_id && !v.status.is_terminal());
        if open_exists {
            return Err(EngineError::AlreadyVerifying(verification.shipment_id));
        }

        apply_transition_locked(&mut inner.shipments, &transition)?;
        inner
            .verifications
            .insert(verification.id, verification.clone());
        Ok(verification)
    }

    async fn verification(&self, id: Uuid) -> EngineResult<PickupVerification> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .verifications
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound {
                kind: "verification",
                id,
            })
    }

    async fn active_verification(
        &self,
        shipment_id: Uuid,
    ) -> EngineResult<Option<PickupVerification>> {
        Ok(self
            .inner
            .lock()
            .expect("memory store poisoned")
            .verifications
            .values()
            .find(|v| v.shipment_id == shipment_id && !v.status.is_terminal())
            .cloned())
    }

    async fn latest_verification(
        &self,
        shipment_id: Uuid,
    ) -> EngineResult<Option<PickupVerification>> {
        Ok(self
            .inner
            .lock()
            .expect("memory store poisoned")
            .verifications
            .values()
            .filter(|v| v.shipment_id == shipment_id)
            .max_by_key(|v| v.started_at)
            .cloned())
    }

    async fn append_photo(
        &self,
        verification_id: Uuid,
        photo: VerificationPhoto,
        angle_cap: usize,
    ) -> EngineResult<PickupVerification> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let verification =
            inner
                .verifications
                .get_mut(&verification_id)
                .ok_or(EngineError::NotFound {
                    kind: "verification",
                    id: verification_id,
                })?;

        if verification.decision.is_some() {
            return Err(EngineError::AlreadySubmitted(verification_id));
        }
        if let Some(cap) = photo.angle.capacity(angle_cap) {
            if verification.photos_for_angle(photo.angle) >= cap {
                return Err(EngineError::DuplicateAngle(photo.angle));
            }
        }

        verification.photos.push(photo);
        Ok(verification.clone())
    }

    async fn apply_resolution(&self, writes: ResolutionWrites) -> EngineResult<PickupVerification> {
        let mut inner = self.inner.lock().expect("memory store poisoned");

        // Validate everything before mutating anything.
        {
            let verification =
                inner
                    .verifications
                    .get(&writes.verification_id)
                    .ok_or(EngineError::NotFound {
                        kind: "verification",
                        id: writes.verification_id,
                    })?;

            match &writes.claim {
                ResolutionClaim::Decision { .. } => {
                    if verification.decision.is_some() {
                        return Err(EngineError::AlreadySubmitted(writes.verification_id));
                    }
                }
                ResolutionClaim::ClientResponse { .. } => {
                    if verification.decision != Some(Decision::MinorDifferences)
                        || verification.client_response.is_some()
                        || verification.status.is_terminal()
                    {
                        return Err(EngineError::ResponseNotApplicable(writes.verification_id));
                    }
                }
            }

            if let Some(transition) = &writes.shipment_transition {
                check_transition_locked(&inner.shipments, transition)?;
            }
        }

        if let Some(transition) = &writes.shipment_transition {
            apply_transition_locked(&mut inner.shipments, transition)?;
        }

        let verification = inner
            .verifications
            .get_mut(&writes.verification_id)
            .expect("validated above");
        match writes.claim {
            ResolutionClaim::Decision {
                decision,
                differences,
                driver_notes,
                location,
                distance_from_pickup_m,
            } => {
                verification.decision = Some(decision);
                verification.differences = differences;
                verification.driver_notes = driver_notes;
                verification.verification_location = Some(location);
                verification.distance_from_pickup_m = Some(distance_from_pickup_m);
            }
            ResolutionClaim::ClientResponse {
                response,
                client_notes,
            } => {
                verification.client_response = Some(response);
                verification.client_notes = client_notes;
            }
        }
        if let Some(status) = writes.verification_status {
            verification.status = status;
        }
        if let Some(completed_at) = writes.completed_at {
            verification.completed_at = Some(completed_at);
        }
        let snapshot = verification.clone();

        if let Some(record) = writes.cancellation {
            inner.cancellations.insert(record.id, record);
        }

        Ok(snapshot)
    }

    async fn apply_cancellation(
        &self,
        transition: ShipmentTransition,
        record: CancellationRecord,
    ) -> EngineResult<CancellationRecord> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        apply_transition_locked(&mut inner.shipments, &transition)?;
        inner.cancellations.insert(record.id, record.clone());
        Ok(record)
    }

    async fn cancellation(&self, id: Uuid) -> EngineResult<CancellationRecord> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .cancellations
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound {
                kind: "cancellation",
                id,
            })
    }

    async fn update_refund_status(
        &self,
        cancellation_id: Uuid,
        next: RefundStatus,
    ) -> EngineResult<CancellationRecord> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let record =
            inner
                .cancellations
                .get_mut(&cancellation_id)
                .ok_or(EngineError::NotFound {
                    kind: "cancellation",
                    id: cancellation_id,
                })?;
        if !record.refund_status.can_transition_to(next) {
            return Err(EngineError::InvalidRefundTransition {
                from: record.refund_status,
                to: next,
            });
        }
        record.refund_status = next;
        Ok(record.clone())
    }
}

/// Photo store that fabricates stable references without persisting bytes.
/// Used by tests and local development.
#[derive(Default)]
pub struct InMemoryPhotoStore;

#[async_trait]
impl PhotoStore for InMemoryPhotoStore {
    async fn store_photo(
        &self,
        verification_id: Uuid,
        angle: PhotoAngle,
        _bytes: &[u8],
    ) -> EngineResult<PhotoRef> {
        Ok(PhotoRef {
            url: format!("mem://verifications/{verification_id}/{angle}/{}", Uuid::new_v4()),
        })
    }
}
