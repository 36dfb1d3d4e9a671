//! `EngineStore` backed by Postgres
//!
//! Compare-and-swap transitions are conditional UPDATEs on the expected
//! status; multi-row resolutions run inside one transaction; the partial
//! unique index on pending verifications backs the one-open-session rule.

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use pv_core::store::{EngineStore, ResolutionClaim, ResolutionWrites, ShipmentTransition};
use pv_core::verification::{Decision, PickupVerification, VerificationPhoto};
use pv_core::{
    CancellationRecord, EngineError, EngineResult, PickupVerificationState, RefundStatus, Shipment,
};

use super::schema::{corrupt, CancellationRow, PhotoRow, ShipmentRow, VerificationRow};

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::Upstream {
        service: "database",
        detail: e.to_string(),
    }
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TRANSITION_SQL: &str = "
    UPDATE shipments
    SET status = $1,
        pickup_verification_state = COALESCE($2, pickup_verification_state),
        pickup_verified = pickup_verified OR $3,
        pickup_verified_at = CASE WHEN $3 THEN NOW() ELSE pickup_verified_at END,
        updated_at = NOW()
    WHERE id = $4 AND status = $5
    RETURNING *";

/// Conditional-UPDATE compare-and-swap. Zero rows affected means the
/// persisted status moved underneath the caller; the actual status is
/// re-read to report the conflict.
async fn transition_in(
    conn: &mut PgConnection,
    transition: &ShipmentTransition,
) -> EngineResult<Shipment> {
    let verifies = transition.pickup_state == Some(PickupVerificationState::Verified);

    let row = if transition.expected.can_transition_to(transition.to) {
        sqlx::query_as::<_, ShipmentRow>(TRANSITION_SQL)
            .bind(transition.to.as_str())
            .bind(transition.pickup_state.map(|s| s.as_str()))
            .bind(verifies)
            .bind(transition.shipment_id)
            .bind(transition.expected.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?
    } else {
        None
    };

    match row {
        Some(row) => row.try_into(),
        None => {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT status FROM shipments WHERE id = $1")
                    .bind(transition.shipment_id)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(db_err)?;
            let actual = actual.ok_or(EngineError::NotFound {
                kind: "shipment",
                id: transition.shipment_id,
            })?;
            Err(EngineError::InvalidTransition {
                shipment_id: transition.shipment_id,
                expected: transition.expected,
                actual: actual.parse().map_err(corrupt)?,
            })
        }
    }
}

async fn load_verification(
    conn: &mut PgConnection,
    id: Uuid,
) -> EngineResult<PickupVerification> {
    let row = sqlx::query_as::<_, VerificationRow>(
        "SELECT * FROM pickup_verifications WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?
    .ok_or(EngineError::NotFound {
        kind: "verification",
        id,
    })?;
    assemble(conn, row).await
}

async fn assemble(
    conn: &mut PgConnection,
    row: VerificationRow,
) -> EngineResult<PickupVerification> {
    let photos = sqlx::query_as::<_, PhotoRow>(
        "SELECT * FROM verification_photos WHERE verification_id = $1 ORDER BY taken_at, id",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;
    row.into_domain(photos)
}

async fn insert_cancellation(
    conn: &mut PgConnection,
    record: &CancellationRecord,
) -> EngineResult<()> {
    sqlx::query(
        "INSERT INTO cancellation_records (
            id, shipment_id, cancelled_by, canceller_role, cancellation_type,
            cancellation_stage, reason_category, reason_description, fraud_confirmed,
            original_amount, client_refund_amount, driver_compensation_amount,
            platform_fee_amount, refund_status, verification_id, evidence_photos, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
    )
    .bind(record.id)
    .bind(record.shipment_id)
    .bind(record.cancelled_by)
    .bind(record.canceller_role.as_str())
    .bind(record.cancellation_type.as_str())
    .bind(record.cancellation_stage.as_str())
    .bind(&record.reason_category)
    .bind(&record.reason_description)
    .bind(record.fraud_confirmed)
    .bind(record.original_amount)
    .bind(record.client_refund_amount)
    .bind(record.driver_compensation_amount)
    .bind(record.platform_fee_amount)
    .bind(record.refund_status.as_str())
    .bind(record.verification_id)
    .bind(Json(&record.evidence_photos))
    .bind(record.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl EngineStore for PgStore {
    async fn shipment(&self, id: Uuid) -> EngineResult<Shipment> {
        sqlx::query_as::<_, ShipmentRow>("SELECT * FROM shipments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(EngineError::NotFound {
                kind: "shipment",
                id,
            })?
            .try_into()
    }

    async fn transition_shipment(&self, transition: ShipmentTransition) -> EngineResult<Shipment> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        transition_in(&mut conn, &transition).await
    }

    async fn open_verification(
        &self,
        verification: PickupVerification,
        transition: ShipmentTransition,
    ) -> EngineResult<PickupVerification> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        transition_in(&mut tx, &transition).await?;

        sqlx::query(
            "INSERT INTO pickup_verifications (id, shipment_id, driver_id, differences, status, started_at)
             VALUES ($1, $2, $3, '[]'::jsonb, $4, $5)",
        )
        .bind(verification.id)
        .bind(verification.shipment_id)
        .bind(verification.driver_id)
        .bind(verification.status.as_str())
        .bind(verification.started_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                EngineError::AlreadyVerifying(verification.shipment_id)
            }
            _ => db_err(e),
        })?;

        tx.commit().await.map_err(db_err)?;
        Ok(verification)
    }

    async fn verification(&self, id: Uuid) -> EngineResult<PickupVerification> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_verification(&mut conn, id).await
    }

    async fn active_verification(
        &self,
        shipment_id: Uuid,
    ) -> EngineResult<Option<PickupVerification>> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let row = sqlx::query_as::<_, VerificationRow>(
            "SELECT * FROM pickup_verifications WHERE shipment_id = $1 AND status = 'pending'",
        )
        .bind(shipment_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => Ok(Some(assemble(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn latest_verification(
        &self,
        shipment_id: Uuid,
    ) -> EngineResult<Option<PickupVerification>> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let row = sqlx::query_as::<_, VerificationRow>(
            "SELECT * FROM pickup_verifications WHERE shipment_id = $1
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(shipment_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => Ok(Some(assemble(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn append_photo(
        &self,
        verification_id: Uuid,
        photo: VerificationPhoto,
        angle_cap: usize,
    ) -> EngineResult<PickupVerification> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Row lock serializes concurrent uploads for the same session.
        let row = sqlx::query_as::<_, VerificationRow>(
            "SELECT * FROM pickup_verifications WHERE id = $1 FOR UPDATE",
        )
        .bind(verification_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or(EngineError::NotFound {
            kind: "verification",
            id: verification_id,
        })?;

        if row.decision.is_some() {
            return Err(EngineError::AlreadySubmitted(verification_id));
        }
        if let Some(cap) = photo.angle.capacity(angle_cap) {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM verification_photos
                 WHERE verification_id = $1 AND angle = $2",
            )
            .bind(verification_id)
            .bind(photo.angle.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            if count as usize >= cap {
                return Err(EngineError::DuplicateAngle(photo.angle));
            }
        }

        sqlx::query(
            "INSERT INTO verification_photos (id, verification_id, angle, url, lat, lng, accuracy_m, taken_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(photo.id)
        .bind(verification_id)
        .bind(photo.angle.as_str())
        .bind(&photo.photo_ref.url)
        .bind(photo.location.as_ref().map(|l| l.lat))
        .bind(photo.location.as_ref().map(|l| l.lng))
        .bind(photo.location.as_ref().and_then(|l| l.accuracy_m))
        .bind(photo.taken_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let verification = assemble(&mut tx, row).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(verification)
    }

    async fn apply_resolution(&self, writes: ResolutionWrites) -> EngineResult<PickupVerification> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query_as::<_, VerificationRow>(
            "SELECT * FROM pickup_verifications WHERE id = $1 FOR UPDATE",
        )
        .bind(writes.verification_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or(EngineError::NotFound {
            kind: "verification",
            id: writes.verification_id,
        })?;

        match &writes.claim {
            ResolutionClaim::Decision { .. } => {
                if row.decision.is_some() {
                    return Err(EngineError::AlreadySubmitted(writes.verification_id));
                }
            }
            ResolutionClaim::ClientResponse { .. } => {
                if row.decision.as_deref() != Some(Decision::MinorDifferences.as_str())
                    || row.client_response.is_some()
                    || row.status != "pending"
                {
                    return Err(EngineError::ResponseNotApplicable(writes.verification_id));
                }
            }
        }

        if let Some(transition) = &writes.shipment_transition {
            transition_in(&mut tx, transition).await?;
        }

        let status = writes.verification_status.map(|s| s.as_str());
        match &writes.claim {
            ResolutionClaim::Decision {
                decision,
                differences,
                driver_notes,
                location,
                distance_from_pickup_m,
            } => {
                sqlx::query(
                    "UPDATE pickup_verifications
                     SET decision = $1, differences = $2, driver_notes = $3,
                         verification_lat = $4, verification_lng = $5,
                         verification_accuracy_m = $6, distance_from_pickup_m = $7,
                         status = COALESCE($8, status),
                         completed_at = COALESCE($9, completed_at)
                     WHERE id = $10",
                )
                .bind(decision.as_str())
                .bind(Json(differences))
                .bind(driver_notes)
                .bind(location.lat)
                .bind(location.lng)
                .bind(location.accuracy_m)
                .bind(distance_from_pickup_m)
                .bind(status)
                .bind(writes.completed_at)
                .bind(writes.verification_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
            ResolutionClaim::ClientResponse {
                response,
                client_notes,
            } => {
                sqlx::query(
                    "UPDATE pickup_verifications
                     SET client_response = $1, client_notes = $2,
                         status = COALESCE($3, status),
                         completed_at = COALESCE($4, completed_at)
                     WHERE id = $5",
                )
                .bind(response.as_str())
                .bind(client_notes)
                .bind(status)
                .bind(writes.completed_at)
                .bind(writes.verification_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
        }

        if let Some(record) = &writes.cancellation {
            insert_cancellation(&mut tx, record).await?;
        }

        let verification = load_verification(&mut tx, writes.verification_id).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(verification)
    }

    async fn apply_cancellation(
        &self,
        transition: ShipmentTransition,
        record: CancellationRecord,
    ) -> EngineResult<CancellationRecord> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        transition_in(&mut tx, &transition).await?;
        insert_cancellation(&mut tx, &record).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(record)
    }

    async fn cancellation(&self, id: Uuid) -> EngineResult<CancellationRecord> {
        sqlx::query_as::<_, CancellationRow>("SELECT * FROM cancellation_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(EngineError::NotFound {
                kind: "cancellation",
                id,
            })?
            .try_into()
    }

    async fn update_refund_status(
        &self,
        cancellation_id: Uuid,
        next: RefundStatus,
    ) -> EngineResult<CancellationRecord> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT refund_status FROM cancellation_records WHERE id = $1 FOR UPDATE",
        )
        .bind(cancellation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let current: RefundStatus = current
            .ok_or(EngineError::NotFound {
                kind: "cancellation",
                id: cancellation_id,
            })?
            .parse()
            .map_err(corrupt)?;

        if !current.can_transition_to(next) {
            return Err(EngineError::InvalidRefundTransition {
                from: current,
                to: next,
            });
        }

        let row = sqlx::query_as::<_, CancellationRow>(
            "UPDATE cancellation_records SET refund_status = $1 WHERE id = $2 RETURNING *",
        )
        .bind(next.as_str())
        .bind(cancellation_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        row.try_into()
    }
}
