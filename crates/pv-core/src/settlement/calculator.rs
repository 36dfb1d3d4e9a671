//! Refund calculator
//!
//! Computes the three-way monetary split for one cancellation event.
//! Rounding: each leg is rounded to 2 decimal places half-to-even (banker's
//! rounding), then the platform-fee leg absorbs the residual so the legs sum
//! exactly to the original amount. A confirmed-fraud flag overrides the
//! requested type with `at_pickup_fraud` unconditionally.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::settlement::policy::PolicyTable;
use crate::settlement::{CancellationType, RefundSplit};
use crate::{EngineError, EngineResult};

fn round_leg(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Split `original_amount` across client, driver, and platform according to
/// the policy table.
pub fn calculate_refund_with(
    table: &PolicyTable,
    original_amount: Decimal,
    cancellation_type: CancellationType,
    fraud_confirmed: bool,
) -> EngineResult<RefundSplit> {
    if original_amount.is_sign_negative() && !original_amount.is_zero() {
        return Err(EngineError::InvalidAmount(original_amount));
    }

    // Fraud always dominates the requested type.
    let effective = if fraud_confirmed {
        CancellationType::AtPickupFraud
    } else {
        cancellation_type
    };

    if original_amount.is_zero() {
        return Ok(RefundSplit {
            cancellation_type: effective,
            client_refund: Decimal::ZERO,
            driver_compensation: Decimal::ZERO,
            platform_fee: Decimal::ZERO,
        });
    }

    let policy = table.policy(effective);
    let hundred = Decimal::from(100u32);

    let client_refund = round_leg(original_amount * Decimal::from(policy.client_pct) / hundred);
    let driver_compensation =
        round_leg(original_amount * Decimal::from(policy.driver_pct) / hundred);
    // Residual cent allocation: the platform leg is the exact remainder,
    // which keeps client + driver + platform == original.
    let platform_fee = original_amount - client_refund - driver_compensation;

    Ok(RefundSplit {
        cancellation_type: effective,
        client_refund,
        driver_compensation,
        platform_fee,
    })
}

/// `calculate_refund_with` against the default policy schedule.
pub fn calculate_refund(
    original_amount: Decimal,
    cancellation_type: CancellationType,
    fraud_confirmed: bool,
) -> EngineResult<RefundSplit> {
    calculate_refund_with(
        &PolicyTable::default(),
        original_amount,
        cancellation_type,
        fraud_confirmed,
    )
}
